//! Per-core in-order driver, the stand-in for the pipeline: it issues one
//! memory reference at a time and re-issues it every cycle until the L1
//! reports a hit, optionally fetching an instruction word first.

use serde::Serialize;

use crate::mem::addr::Addr;
use crate::mem::{Cycle, System};
use crate::traffic::config::TrafficConfig;
use crate::traffic::patterns::{compile_pattern, mix64};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DriverStats {
    pub completed: u64,
    pub loads: u64,
    pub stores: u64,
    pub fetches: u64,
    pub stall_cycles: u64,
    pub latency_sum: u64,
    pub latency_max: u64,
}

#[derive(Debug, Clone, Copy)]
struct TrafficOp {
    addr: Addr,
    write: bool,
    value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Fetch,
    Data,
}

#[derive(Debug)]
pub struct CoreDriver {
    core: usize,
    ops: Vec<TrafficOp>,
    cursor: usize,
    step: Step,
    do_fetch: bool,
    fetch_base: Addr,
    fetch_window: u32,
    issued_at: Option<Cycle>,
    pub stats: DriverStats,
}

impl CoreDriver {
    pub fn new(core: usize, cfg: &TrafficConfig) -> Self {
        let window = cfg.window_bytes.max(4);
        let core_base = if cfg.shared_window {
            cfg.base_addr
        } else {
            cfg.base_addr.wrapping_add(core as u32 * window)
        };

        let mut ops = Vec::new();
        for (idx, spec) in cfg.patterns.iter().enumerate() {
            let pattern = compile_pattern(spec, idx);
            for req in 0..cfg.reqs_per_pattern {
                let addr = core_base + pattern.offset(req, window);
                let write = pattern.is_write(req);
                let value = mix64((core as u64) << 32 | u64::from(req)) as u32;
                ops.push(TrafficOp { addr, write, value });
            }
        }

        Self {
            core,
            ops,
            cursor: 0,
            step: if cfg.fetch { Step::Fetch } else { Step::Data },
            do_fetch: cfg.fetch,
            fetch_base: cfg.fetch_base + core as u32 * cfg.fetch_window_bytes.max(4),
            fetch_window: cfg.fetch_window_bytes.max(4),
            issued_at: None,
            stats: DriverStats::default(),
        }
    }

    pub fn build_all(cfg: &TrafficConfig, num_cores: usize) -> Vec<CoreDriver> {
        (0..num_cores).map(|core| CoreDriver::new(core, cfg)).collect()
    }

    pub fn core(&self) -> usize {
        self.core
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.ops.len()
    }

    fn pc(&self) -> Addr {
        self.fetch_base + (self.cursor as u32 * 4) % self.fetch_window
    }

    /// One cycle of the driver: at most one access issued.
    pub fn tick(&mut self, system: &mut System) {
        if self.is_done() {
            return;
        }
        let now = system.now();
        match self.step {
            Step::Fetch => {
                if system.fetch_word(self.core, self.pc()).is_some() {
                    self.stats.fetches += 1;
                    self.step = Step::Data;
                } else {
                    self.stats.stall_cycles += 1;
                }
            }
            Step::Data => {
                if self.issued_at.is_none() {
                    self.issued_at = Some(now);
                }
                let op = self.ops[self.cursor];
                let done = if op.write {
                    system.store_word(self.core, op.addr, op.value)
                } else {
                    system.load_word(self.core, op.addr).is_some()
                };
                if done {
                    let latency = now - self.issued_at.take().unwrap() + 1;
                    self.stats.completed += 1;
                    if op.write {
                        self.stats.stores += 1;
                    } else {
                        self.stats.loads += 1;
                    }
                    self.stats.latency_sum += latency;
                    self.stats.latency_max = self.stats.latency_max.max(latency);
                    self.cursor += 1;
                    if self.do_fetch {
                        self.step = Step::Fetch;
                    }
                } else {
                    self.stats.stall_cycles += 1;
                }
            }
        }
    }
}
