use serde::Serialize;

use crate::mem::{Cycle, DramStats, L1Stats, LlcStats};
use crate::traffic::DriverStats;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CoreSummary {
    pub core: usize,
    pub driver: DriverStats,
    pub l1i: L1Stats,
    pub l1d: L1Stats,
}

/// End-of-run aggregate, emitted as pretty JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub cycles: Cycle,
    pub finished: bool,
    pub cores: Vec<CoreSummary>,
    pub llc: LlcStats,
    pub dram: DramStats,
}

impl RunSummary {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("summary serialization failed")
    }
}
