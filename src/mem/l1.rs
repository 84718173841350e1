//! Per-core split L1 cache. Blocking: a single MSHR tracks the one
//! outstanding miss, and any access while it is pending stalls. Coherence
//! state transitions happen either locally (hits, fills) or through
//! `probe_coherence` when a peer core snoops us.

use log::trace;
use serde::Serialize;

use crate::mem::addr::{Addr, AddressMap};
use crate::mem::block::{CacheSet, MesiState};
use crate::mem::policy::{PolicyKind, ReplacementPolicy};
use crate::mem::Cycle;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct L1Stats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub upgrade_misses: u64,
    pub stalls: u64,
    pub fills: u64,
    pub evictions: u64,
    pub writebacks: u64,
    pub snoop_downgrades: u64,
    pub snoop_invalidations: u64,
}

/// Outcome of the tag probe alone; the full miss protocol lives in the
/// system, which owns the peer caches this one must snoop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1Probe {
    Hit,
    /// Write against a SHARED copy: permission miss, the data is here.
    UpgradeMiss,
    Miss,
}

#[derive(Debug, Clone, Copy)]
pub struct L1Mshr {
    pub addr: Addr,
    pub is_write: bool,
    pub target_state: MesiState,
    /// Cycle the miss resolves locally; None while waiting for the LLC
    /// fill callback.
    pub ready: Option<Cycle>,
}

#[derive(Debug, Clone)]
pub struct SnoopHit {
    pub was_modified: bool,
    /// Dirty line contents, present only when the snooped copy was MODIFIED;
    /// the requester writes these through to memory.
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct L1Writeback {
    pub addr: Addr,
    pub data: Vec<u8>,
    pub dirty: bool,
}

#[derive(Debug)]
pub struct L1Cache {
    core: usize,
    is_icache: bool,
    map: AddressMap,
    sets: Vec<CacheSet>,
    policy: ReplacementPolicy,
    pub mshr: Option<L1Mshr>,
    pub stats: L1Stats,
}

impl L1Cache {
    pub fn new(core: usize, is_icache: bool, num_sets: u32, ways: usize, block_size: u32, seed: u64) -> Self {
        let map = AddressMap::new(num_sets, block_size);
        let sets = (0..num_sets as usize)
            .map(|_| CacheSet::new(ways, block_size as usize))
            .collect();
        Self {
            core,
            is_icache,
            map,
            sets,
            policy: ReplacementPolicy::new(PolicyKind::Lru, num_sets as usize, ways, seed),
            mshr: None,
            stats: L1Stats::default(),
        }
    }

    pub fn core(&self) -> usize {
        self.core
    }

    fn label(&self) -> &'static str {
        if self.is_icache {
            "l1i"
        } else {
            "l1d"
        }
    }

    pub fn block_align(&self, addr: Addr) -> Addr {
        self.map.block_align(addr)
    }

    /// Tag lookup without touching replacement metadata.
    pub fn lookup(&self, addr: Addr) -> Option<(usize, usize)> {
        let set_idx = self.map.set_index(addr);
        self.sets[set_idx].find(self.map.tag(addr)).map(|way| (set_idx, way))
    }

    pub fn state_of(&self, addr: Addr) -> MesiState {
        match self.lookup(addr) {
            Some((set_idx, way)) => self.sets[set_idx].blocks[way].state,
            None => MesiState::Invalid,
        }
    }

    /// Hit path of `access`: replacement update, and for writes the M/E to
    /// M transition. A write against SHARED reports an upgrade miss.
    pub fn try_hit(&mut self, addr: Addr, is_write: bool) -> L1Probe {
        let Some((set_idx, way)) = self.lookup(addr) else {
            return L1Probe::Miss;
        };
        if is_write {
            let state = self.sets[set_idx].blocks[way].state;
            match state {
                MesiState::Modified | MesiState::Exclusive => {
                    let block = &mut self.sets[set_idx].blocks[way];
                    block.state = MesiState::Modified;
                    block.dirty = true;
                }
                MesiState::Shared => return L1Probe::UpgradeMiss,
                MesiState::Invalid => unreachable!("lookup returned an invalid way"),
            }
        }
        self.policy.update_on_hit(&mut self.sets[set_idx], way);
        L1Probe::Hit
    }

    /// Snoop from a peer core. A writing peer invalidates our copy; a
    /// reading peer downgrades M/E to SHARED. Either way the surviving
    /// local copy is clean, and MODIFIED contents are handed back so the
    /// requester can push them to memory.
    pub fn probe_coherence(&mut self, addr: Addr, is_write_req: bool) -> Option<SnoopHit> {
        let (set_idx, way) = self.lookup(addr)?;
        let block = &mut self.sets[set_idx].blocks[way];
        let was_modified = block.state == MesiState::Modified;
        let data = was_modified.then(|| block.data.clone());
        if is_write_req {
            block.invalidate();
            self.stats.snoop_invalidations += 1;
        } else if block.state.is_owned() {
            block.state = MesiState::Shared;
            block.dirty = false;
            self.stats.snoop_downgrades += 1;
        }
        trace!(
            "{}[{}]: snoop {addr:#010x} write={is_write_req} modified={was_modified}",
            self.label(),
            self.core
        );
        Some(SnoopHit { was_modified, data })
    }

    /// Commit a fill for the pending miss. A fill whose address does not
    /// match the MSHR (a squashed fetch, or a merged fill meant for the
    /// sibling cache) is dropped silently. Returns the victim writeback,
    /// if the installation evicted one; `writeback_clean` forces clean
    /// victims out too (exclusive LLC).
    pub fn fill(
        &mut self,
        addr: Addr,
        target_state: MesiState,
        line: &[u8],
        writeback_clean: bool,
    ) -> Option<L1Writeback> {
        let block_addr = self.map.block_align(addr);
        match self.mshr {
            Some(m) if m.addr == block_addr => {}
            _ => return None,
        }
        self.mshr = None;
        self.stats.fills += 1;
        trace!(
            "{}[{}]: fill {block_addr:#010x} as {target_state:?}",
            self.label(),
            self.core
        );
        self.install(block_addr, target_state, line, writeback_clean)
    }

    pub fn invalidate(&mut self, addr: Addr) -> bool {
        match self.lookup(addr) {
            Some((set_idx, way)) => {
                self.sets[set_idx].blocks[way].invalidate();
                true
            }
            None => false,
        }
    }

    /// Drop the outstanding miss (branch squash). Any LLC-side work runs to
    /// completion and its fill will miss the MSHR check above.
    pub fn cancel_miss(&mut self) {
        self.mshr = None;
    }

    /// Peer-side check for the write-exclusion rule: a pending miss on the
    /// same block conflicts when either side wants to write.
    pub fn mshr_conflicts(&self, block_addr: Addr, is_write: bool) -> bool {
        self.mshr
            .map_or(false, |m| m.addr == block_addr && (m.is_write || is_write))
    }

    pub fn set_mshr(&mut self, addr: Addr, is_write: bool, target_state: MesiState, ready: Option<Cycle>) {
        debug_assert!(self.mshr.is_none(), "L1 MSHR already in use");
        self.mshr = Some(L1Mshr {
            addr: self.map.block_align(addr),
            is_write,
            target_state,
            ready,
        });
    }

    /// Word read from a resident block; callers hold a HIT.
    pub fn read_word(&self, addr: Addr) -> u32 {
        let (set_idx, way) = self.lookup(addr).expect("read_word on a non-resident block");
        self.sets[set_idx].blocks[way].read_word(self.map.block_offset(addr))
    }

    pub fn write_word(&mut self, addr: Addr, value: u32) {
        let (set_idx, way) = self.lookup(addr).expect("write_word on a non-resident block");
        let offset = self.map.block_offset(addr);
        self.sets[set_idx].blocks[way].write_word(offset, value);
    }

    fn install(
        &mut self,
        block_addr: Addr,
        target_state: MesiState,
        line: &[u8],
        writeback_clean: bool,
    ) -> Option<L1Writeback> {
        let set_idx = self.map.set_index(block_addr);
        let tag = self.map.tag(block_addr);
        let existing = self.sets[set_idx].find(tag);
        let mut writeback = None;

        let way = match existing {
            // Upgrade in place, no eviction.
            Some(way) => way,
            None => {
                let way = self.policy.find_victim(&mut self.sets[set_idx]);
                let victim = &self.sets[set_idx].blocks[way];
                if victim.is_valid() {
                    let victim_addr = self.map.block_addr(victim.tag, set_idx);
                    if victim.dirty || writeback_clean {
                        writeback = Some(L1Writeback {
                            addr: victim_addr,
                            data: victim.data.clone(),
                            dirty: victim.dirty,
                        });
                        self.stats.writebacks += 1;
                    }
                    self.policy.note_eviction(victim_addr);
                    self.stats.evictions += 1;
                }
                way
            }
        };

        let set = &mut self.sets[set_idx];
        let block = &mut set.blocks[way];
        block.tag = tag;
        block.state = target_state;
        block.dirty = target_state == MesiState::Modified;
        block.data.copy_from_slice(line);
        match existing {
            Some(_) => self.policy.update_on_hit(set, way),
            None => self.policy.insert_on_miss(set, way, set_idx, block_addr),
        }
        writeback
    }

    /// Test hook: every block of every set.
    pub fn blocks(&self) -> impl Iterator<Item = (Addr, &crate::mem::block::CacheBlock)> {
        self.sets.iter().enumerate().flat_map(move |(set_idx, set)| {
            set.blocks
                .iter()
                .filter(|b| b.is_valid())
                .map(move |b| (self.map.block_addr(b.tag, set_idx), b))
        })
    }
}
