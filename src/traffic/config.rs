use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// Requests each core issues per pattern.
    pub reqs_per_pattern: u32,
    pub base_addr: u32,
    pub window_bytes: u32,
    /// Cores share one address window (coherence traffic) instead of
    /// working disjoint windows.
    pub shared_window: bool,
    /// Interleave an instruction fetch before every data access.
    pub fetch: bool,
    pub fetch_base: u32,
    pub fetch_window_bytes: u32,
    pub patterns: Vec<TrafficPatternSpec>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            reqs_per_pattern: 512,
            base_addr: 0x0010_0000,
            window_bytes: 1 << 20,
            shared_window: false,
            fetch: true,
            fetch_base: 0x0000_8000,
            fetch_window_bytes: 4 << 10,
            patterns: vec![
                TrafficPatternSpec {
                    name: "stream".to_string(),
                    kind: "strided".to_string(),
                    op: "rw".to_string(),
                    stride: 4,
                    seed: 1,
                },
                TrafficPatternSpec {
                    name: "scatter".to_string(),
                    kind: "random".to_string(),
                    op: "read".to_string(),
                    stride: 4,
                    seed: 2,
                },
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    pub name: String,
    pub kind: String,
    pub op: String,
    /// Byte stride between consecutive requests (strided patterns).
    pub stride: u32,
    pub seed: u64,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "strided".to_string(),
            op: "read".to_string(),
            stride: 4,
            seed: 0,
        }
    }
}
