//! Shared last-level cache. Hosts the MSHR table and owns the inclusion
//! policy; eviction side effects (back-invalidation, DRAM writebacks) and
//! fill commits reach the L1s and the DRAM controller through explicit
//! `&mut` parameters rather than stored references.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::mem::addr::{Addr, AddressMap};
use crate::mem::block::{CacheSet, MesiState};
use crate::mem::dram::{DramController, RequestSource};
use crate::mem::l1::L1Cache;
use crate::mem::mshr::{MshrEntry, MshrTable, Requester};
use crate::mem::policy::ReplacementPolicy;
use crate::mem::{Cycle, MemConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InclusionPolicy {
    #[serde(alias = "incl")]
    Inclusive,
    #[serde(alias = "excl")]
    Exclusive,
    /// Non-inclusive non-exclusive.
    Nine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlcAccessStatus {
    /// Not pending and no MSHR slot free; retry next cycle.
    Busy,
    Hit,
    /// Pending (merged) or newly allocated.
    Miss,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LlcStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub merges: u64,
    pub busy_rejects: u64,
    pub fills: u64,
    pub evictions: u64,
    pub ownership_transfers: u64,
    pub writebacks_to_dram: u64,
    pub back_invalidations: u64,
}

#[derive(Debug)]
pub struct SharedCache {
    map: AddressMap,
    sets: Vec<CacheSet>,
    policy: ReplacementPolicy,
    pub mshrs: MshrTable,
    inclusion: InclusionPolicy,
    hit_latency: Cycle,
    pub stats: LlcStats,
}

impl SharedCache {
    pub fn new(cfg: &MemConfig) -> Self {
        let map = AddressMap::new(cfg.llc_sets, cfg.block_size);
        let sets = (0..cfg.llc_sets as usize)
            .map(|_| CacheSet::new(cfg.llc_ways, cfg.block_size as usize))
            .collect();
        Self {
            map,
            sets,
            policy: ReplacementPolicy::new(
                cfg.replacement_policy,
                cfg.llc_sets as usize,
                cfg.llc_ways,
                cfg.policy_seed,
            ),
            mshrs: MshrTable::new(
                cfg.llc_mshrs,
                cfg.l2_to_dram_delay,
                cfg.dram_to_l2_delay,
                cfg.block_size as usize,
            ),
            inclusion: cfg.inclusion_policy,
            hit_latency: cfg.llc_hit_latency,
            stats: LlcStats::default(),
        }
    }

    pub fn inclusion(&self) -> InclusionPolicy {
        self.inclusion
    }

    pub fn hit_latency(&self) -> Cycle {
        self.hit_latency
    }

    pub fn block_align(&self, addr: Addr) -> Addr {
        self.map.block_align(addr)
    }

    pub fn lookup(&self, addr: Addr) -> Option<(usize, usize)> {
        let set_idx = self.map.set_index(addr);
        self.sets[set_idx].find(self.map.tag(addr)).map(|way| (set_idx, way))
    }

    pub fn present(&self, addr: Addr) -> bool {
        self.lookup(addr).is_some()
    }

    pub fn state_of(&self, addr: Addr) -> MesiState {
        match self.lookup(addr) {
            Some((set_idx, way)) => self.sets[set_idx].blocks[way].state,
            None => MesiState::Invalid,
        }
    }

    pub fn policy(&self) -> &ReplacementPolicy {
        &self.policy
    }

    /// Test hook: every valid block with its reconstructed address.
    pub fn blocks(&self) -> impl Iterator<Item = (Addr, &crate::mem::block::CacheBlock)> {
        self.sets.iter().enumerate().flat_map(move |(set_idx, set)| {
            set.blocks
                .iter()
                .filter(|b| b.is_valid())
                .map(move |b| (self.map.block_addr(b.tag, set_idx), b))
        })
    }

    /// Demand access from an L1 miss. A free MSHR (or a pending entry to
    /// merge into) is a prerequisite for probing at all.
    pub fn access(&mut self, addr: Addr, is_write: bool, core: usize, is_inst: bool, now: Cycle) -> LlcAccessStatus {
        self.stats.accesses += 1;
        let block_addr = self.map.block_align(addr);
        let pending = self.mshrs.has_entry(block_addr);
        if !pending && !self.mshrs.has_free_slot() {
            self.stats.busy_rejects += 1;
            return LlcAccessStatus::Busy;
        }

        if let Some((set_idx, way)) = self.lookup(block_addr) {
            self.stats.hits += 1;
            self.policy.update_on_hit(&mut self.sets[set_idx], way);
            if self.inclusion == InclusionPolicy::Exclusive {
                // Ownership moves up: the line now lives only in the L1.
                // The store path keeps backing memory current, so dropping
                // a dirty copy here loses no data.
                self.sets[set_idx].blocks[way].invalidate();
                self.stats.ownership_transfers += 1;
            }
            return LlcAccessStatus::Hit;
        }

        if pending {
            self.mshrs.merge(block_addr, Requester { core, is_inst });
            self.stats.merges += 1;
            trace!("llc: merge {block_addr:#010x} core={core} at {now}");
            return LlcAccessStatus::Miss;
        }

        debug_assert!(
            !self.present(block_addr),
            "MSHR allocation for a resident block"
        );
        self.mshrs.allocate(block_addr, is_write, is_inst, core, now);
        self.stats.misses += 1;
        LlcAccessStatus::Miss
    }

    /// Commit a completed MSHR: install the line, then under the exclusive
    /// policy immediately drop it again (it lives only in the requester).
    pub fn install_fill(
        &mut self,
        entry: &MshrEntry,
        now: Cycle,
        l1s: &mut [L1Cache],
        dram: &mut DramController,
    ) {
        self.stats.fills += 1;
        debug_assert!(
            !self.present(entry.addr),
            "MSHR fill for an already-present block"
        );
        self.install_block(entry.addr, &entry.data, false, now, l1s, dram);
        if self.inclusion == InclusionPolicy::Exclusive {
            if let Some((set_idx, way)) = self.lookup(entry.addr) {
                self.sets[set_idx].blocks[way].invalidate();
            }
        }
    }

    /// Victim coming down from an L1. Hits update in place; misses either
    /// allocate (exclusive inclusion refills the LLC on the way down) or
    /// write through to DRAM.
    pub fn handle_l1_writeback(
        &mut self,
        addr: Addr,
        data: &[u8],
        dirty: bool,
        now: Cycle,
        l1s: &mut [L1Cache],
        dram: &mut DramController,
    ) {
        let block_addr = self.map.block_align(addr);
        if let Some((set_idx, way)) = self.lookup(block_addr) {
            let block = &mut self.sets[set_idx].blocks[way];
            block.data.copy_from_slice(data);
            if dirty {
                block.dirty = true;
                block.state = MesiState::Modified;
            }
            self.policy.update_on_hit(&mut self.sets[set_idx], way);
            return;
        }
        match self.inclusion {
            InclusionPolicy::Exclusive => {
                self.install_block(block_addr, data, dirty, now, l1s, dram);
            }
            InclusionPolicy::Inclusive | InclusionPolicy::Nine => {
                dram.enqueue(block_addr, true, RequestSource::Memory, now);
                self.stats.writebacks_to_dram += 1;
            }
        }
    }

    fn install_block(
        &mut self,
        block_addr: Addr,
        data: &[u8],
        dirty: bool,
        now: Cycle,
        l1s: &mut [L1Cache],
        dram: &mut DramController,
    ) {
        let set_idx = self.map.set_index(block_addr);
        let tag = self.map.tag(block_addr);
        let way = self.policy.find_victim(&mut self.sets[set_idx]);

        let victim = &self.sets[set_idx].blocks[way];
        if victim.is_valid() {
            let victim_addr = self.map.block_addr(victim.tag, set_idx);
            let victim_dirty = victim.dirty;
            self.stats.evictions += 1;
            self.policy.note_eviction(victim_addr);
            debug!("llc: evict {victim_addr:#010x} dirty={victim_dirty} at {now}");
            if victim_dirty {
                dram.enqueue(victim_addr, true, RequestSource::Memory, now);
                self.stats.writebacks_to_dram += 1;
            }
            if self.inclusion == InclusionPolicy::Inclusive {
                self.back_invalidate(victim_addr, now, l1s, dram);
            }
        }

        let set = &mut self.sets[set_idx];
        let block = &mut set.blocks[way];
        block.tag = tag;
        block.state = if dirty { MesiState::Modified } else { MesiState::Exclusive };
        block.dirty = dirty;
        block.data.copy_from_slice(data);
        self.policy.insert_on_miss(set, way, set_idx, block_addr);
    }

    /// Inclusive eviction: force the line out of every L1. A MODIFIED L1
    /// copy is pushed to DRAM so the only remaining home stays durable.
    fn back_invalidate(&mut self, victim_addr: Addr, now: Cycle, l1s: &mut [L1Cache], dram: &mut DramController) {
        for l1 in l1s.iter_mut() {
            if let Some(snoop) = l1.probe_coherence(victim_addr, true) {
                self.stats.back_invalidations += 1;
                if snoop.was_modified {
                    dram.enqueue(victim_addr, true, RequestSource::Memory, now);
                    self.stats.writebacks_to_dram += 1;
                }
            }
        }
    }
}
