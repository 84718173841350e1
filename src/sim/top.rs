use std::fs;
use std::path::Path;

use log::info;
use toml::Value;

use crate::mem::{DramConfig, MemConfig, System};
use crate::sim::config::{Config, SimConfig};
use crate::sim::flat_mem::FlatMemory;
use crate::sim::summary::{CoreSummary, RunSummary};
use crate::traffic::{CoreDriver, TrafficConfig};

#[derive(Debug, Clone, Default)]
pub struct SynchrotronConfig {
    pub sim: SimConfig,
    pub mem: MemConfig,
    pub dram: DramConfig,
    pub traffic: TrafficConfig,
}

impl SynchrotronConfig {
    pub fn from_toml(text: &str) -> Self {
        let value: Value = text.parse().expect("malformed config file");
        Self {
            sim: SimConfig::from_section(value.get("sim")),
            mem: MemConfig::from_section(value.get("mem")),
            dram: DramConfig::from_section(value.get("dram")),
            traffic: TrafficConfig::from_section(value.get("traffic")),
        }
    }

    pub fn from_file(path: &Path) -> Self {
        let text = fs::read_to_string(path).expect("cannot read config file");
        Self::from_toml(&text)
    }
}

pub struct SynchrotronTop {
    pub system: System,
    pub drivers: Vec<CoreDriver>,
    pub timeout: u64,
}

impl SynchrotronTop {
    pub fn new(config: &SynchrotronConfig) -> SynchrotronTop {
        let mem = FlatMemory::new();
        let system = System::new(&config.mem, &config.dram, mem);
        let drivers = CoreDriver::build_all(&config.traffic, config.mem.num_cores);
        SynchrotronTop {
            system,
            drivers,
            timeout: config.sim.timeout,
        }
    }

    pub fn tick_one(&mut self) {
        self.system.pump();
        for driver in &mut self.drivers {
            driver.tick(&mut self.system);
        }
        self.system.advance();
    }

    pub fn finished(&self) -> bool {
        self.drivers.iter().all(|d| d.is_done())
    }

    pub fn run(&mut self) -> RunSummary {
        for _ in 0..self.timeout {
            if self.finished() {
                break;
            }
            self.tick_one();
        }
        info!(
            "run ended at cycle {} (finished: {})",
            self.system.now(),
            self.finished()
        );
        self.summary()
    }

    pub fn summary(&self) -> RunSummary {
        let cores = self
            .drivers
            .iter()
            .map(|driver| {
                let core = driver.core();
                CoreSummary {
                    core,
                    driver: driver.stats,
                    l1i: self.system.l1(core, true).stats,
                    l1d: self.system.l1(core, false).stats,
                }
            })
            .collect();
        RunSummary {
            cycles: self.system.now(),
            finished: self.finished(),
            cores,
            llc: self.system.llc.stats,
            dram: self.system.dram.stats,
        }
    }
}
