use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

/// Config sections deserialize independently out of one parsed TOML
/// document; a missing section falls back to its defaults with a warning.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub timeout: u64,
    /// Write the run summary here instead of stdout.
    pub summary_json: Option<String>,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timeout: 200_000,
            summary_json: None,
        }
    }
}
