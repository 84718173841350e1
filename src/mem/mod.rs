pub mod addr;
pub mod block;
pub mod dram;
pub mod l1;
pub mod llc;
pub mod mshr;
pub mod policy;
pub mod system;

#[cfg(test)]
mod unit_tests;

use serde::Deserialize;

use crate::sim::config::Config;

pub use addr::{Addr, AddressMap};
pub use block::{CacheBlock, CacheSet, MesiState};
pub use dram::{DramConfig, DramController, DramStats, PagePolicy, RequestSource};
pub use l1::{L1Cache, L1Probe, L1Stats};
pub use llc::{InclusionPolicy, LlcAccessStatus, LlcStats, SharedCache};
pub use mshr::{MshrState, MshrTable};
pub use policy::{PolicyKind, ReplacementPolicy};
pub use system::{AccessStatus, System};

pub type Cycle = u64;

/// Geometry and policy knobs for the cache hierarchy (the `[mem]` config
/// section). DRAM timing is its own section, `DramConfig`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemConfig {
    pub block_size: u32,
    pub l1_i_sets: u32,
    pub l1_i_ways: usize,
    pub l1_d_sets: u32,
    pub l1_d_ways: usize,
    pub llc_sets: u32,
    pub llc_ways: usize,
    pub llc_mshrs: usize,
    pub llc_hit_latency: Cycle,
    pub l2_to_dram_delay: Cycle,
    pub dram_to_l2_delay: Cycle,
    pub inclusion_policy: InclusionPolicy,
    pub replacement_policy: PolicyKind,
    pub num_cores: usize,
    pub policy_seed: u64,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            block_size: 32,
            // 8 KiB 4-way I, 64 KiB 8-way D, 256 KiB 16-way shared.
            l1_i_sets: 64,
            l1_i_ways: 4,
            l1_d_sets: 256,
            l1_d_ways: 8,
            llc_sets: 512,
            llc_ways: 16,
            llc_mshrs: 16,
            llc_hit_latency: 20,
            l2_to_dram_delay: 5,
            dram_to_l2_delay: 5,
            inclusion_policy: InclusionPolicy::Inclusive,
            replacement_policy: PolicyKind::Lru,
            num_cores: 4,
            policy_seed: 0x5eed_cafe,
        }
    }
}
