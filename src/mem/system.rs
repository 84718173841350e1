//! System root: owns every component of the hierarchy and drives one cycle
//! at a time. Components address each other through indices and explicit
//! `&mut` parameters; there are no stored back-references.
//!
//! Per-cycle phase order (bottom-up visibility): DRAM completion, MSHR
//! sends, DRAM issue, LLC fill commits, then the consumers' L1 accesses.
//! Anything a consumer posts downward this cycle is acted on no earlier
//! than the moment its modelled hop delay elapses.

use log::trace;
use std::collections::{HashMap, HashSet};

use crate::mem::addr::Addr;
use crate::mem::block::MesiState;
use crate::mem::dram::{DramConfig, DramController, RequestSource};
use crate::mem::l1::{L1Cache, L1Probe};
use crate::mem::llc::{InclusionPolicy, LlcAccessStatus, SharedCache};
use crate::mem::{Cycle, MemConfig};
use crate::sim::flat_mem::FlatMemory;

/// Transfer hop between an L1 and the rest of the hierarchy, charged on
/// snoop-supplied and LLC-hit fills.
const L1_FILL_DELAY: Cycle = 5;

/// Consumer-facing status: MISS_PENDING collapses to Stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Hit,
    Stall,
}

/// Full-resolution outcome of one L1 access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1AccessOutcome {
    Hit,
    /// Miss accepted this cycle; an MSHR now tracks it.
    MissPending,
    /// Resource conflict; nothing was allocated, retry next cycle.
    Stall,
}

pub fn l1_index(core: usize, is_inst: bool) -> usize {
    core * 2 + usize::from(!is_inst)
}

pub struct System {
    block_size: usize,
    num_cores: usize,
    pub l1s: Vec<L1Cache>,
    pub llc: SharedCache,
    pub dram: DramController,
    pub mem: FlatMemory,
    now: Cycle,
}

impl System {
    pub fn new(cfg: &MemConfig, dram_cfg: &DramConfig, mem: FlatMemory) -> Self {
        assert!(cfg.num_cores > 0, "need at least one core");
        let mut l1s = Vec::with_capacity(cfg.num_cores * 2);
        for core in 0..cfg.num_cores {
            let seed = cfg.policy_seed.wrapping_add(core as u64 * 2);
            l1s.push(L1Cache::new(core, true, cfg.l1_i_sets, cfg.l1_i_ways, cfg.block_size, seed));
            l1s.push(L1Cache::new(core, false, cfg.l1_d_sets, cfg.l1_d_ways, cfg.block_size, seed + 1));
        }
        Self {
            block_size: cfg.block_size as usize,
            num_cores: cfg.num_cores,
            l1s,
            llc: SharedCache::new(cfg),
            dram: DramController::new(*dram_cfg),
            mem,
            now: 0,
        }
    }

    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn l1(&self, core: usize, is_inst: bool) -> &L1Cache {
        &self.l1s[l1_index(core, is_inst)]
    }

    pub fn l1_mut(&mut self, core: usize, is_inst: bool) -> &mut L1Cache {
        &mut self.l1s[l1_index(core, is_inst)]
    }

    /// Hierarchy phases for the current cycle. Consumers issue their
    /// accesses after this, then `advance` moves the clock.
    pub fn pump(&mut self) {
        let now = self.now;

        // DRAM completion: at most one callback per cycle. The line bytes
        // captured here are what the fill will commit.
        if let Some(done) = self.dram.begin_cycle(now) {
            let line = self.mem.read_line(done.addr, self.block_size);
            self.llc.mshrs.dram_complete(done.addr, now, line);
        }

        // MSHR entries whose send hop elapsed dispatch to the controller.
        for dispatch in self.llc.mshrs.take_sendable(now) {
            let source = if dispatch.is_inst {
                RequestSource::Fetch
            } else {
                RequestSource::Memory
            };
            self.dram.enqueue(dispatch.addr, dispatch.is_write, source, now);
        }

        // DRAM issue: FR-FCFS picks one schedulable request.
        self.dram.schedule(now);

        // Commit ready fills: install into the LLC, then offer the fill to
        // the requester cores. Both caches of a core are offered; each
        // installs only if its own MSHR matches, which is also what makes
        // squashed fetches drop silently.
        while let Some(entry) = self.llc.mshrs.pop_ready(now) {
            self.llc
                .install_fill(&entry, now, &mut self.l1s, &mut self.dram);
            let target = if entry.is_write {
                MesiState::Modified
            } else {
                MesiState::Exclusive
            };
            let wb_clean = self.llc.inclusion() == InclusionPolicy::Exclusive;
            let requesters = std::iter::once(entry.requester).chain(entry.merged.iter().copied());
            for requester in requesters {
                for idx in [l1_index(requester.core, true), l1_index(requester.core, false)] {
                    let writeback = self.l1s[idx].fill(entry.addr, target, &entry.data, wb_clean);
                    if let Some(wb) = writeback {
                        self.llc.handle_l1_writeback(
                            wb.addr,
                            &wb.data,
                            wb.dirty,
                            now,
                            &mut self.l1s,
                            &mut self.dram,
                        );
                    }
                }
            }
        }
    }

    pub fn advance(&mut self) {
        self.now += 1;
    }

    /// Hierarchy-only step, for tests and idle cycles.
    pub fn tick(&mut self) {
        self.pump();
        self.advance();
    }

    /// Consumer entry point; the pipeline re-calls this every cycle while
    /// it stalls.
    pub fn l1_access(&mut self, core: usize, addr: Addr, is_write: bool, is_inst: bool) -> AccessStatus {
        match self.l1_request(core, addr, is_write, is_inst) {
            L1AccessOutcome::Hit => AccessStatus::Hit,
            L1AccessOutcome::MissPending | L1AccessOutcome::Stall => AccessStatus::Stall,
        }
    }

    /// The ordered miss protocol: first applicable step wins.
    pub fn l1_request(&mut self, core: usize, addr: Addr, is_write: bool, is_inst: bool) -> L1AccessOutcome {
        debug_assert!(!(is_inst && is_write), "instruction fetches never write");
        let now = self.now;
        let self_idx = l1_index(core, is_inst);
        let block_addr = self.l1s[self_idx].block_align(addr);
        self.l1s[self_idx].stats.accesses += 1;

        // 1. Pending miss: the L1 is blocking. A fill whose latency has
        // elapsed completes right here and the access hits.
        if let Some(mshr) = self.l1s[self_idx].mshr {
            if mshr.addr == block_addr && mshr.ready.is_some_and(|ready| now >= ready) {
                let wb_clean = self.llc.inclusion() == InclusionPolicy::Exclusive;
                let line = self.mem.read_line(block_addr, self.block_size);
                let writeback = self.l1s[self_idx].fill(block_addr, mshr.target_state, line, wb_clean);
                if let Some(wb) = writeback {
                    self.llc.handle_l1_writeback(
                        wb.addr,
                        &wb.data,
                        wb.dirty,
                        now,
                        &mut self.l1s,
                        &mut self.dram,
                    );
                }
                self.l1s[self_idx].stats.hits += 1;
                return L1AccessOutcome::Hit;
            }
            self.l1s[self_idx].stats.stalls += 1;
            return L1AccessOutcome::Stall;
        }

        // 2. Tag probe.
        match self.l1s[self_idx].try_hit(addr, is_write) {
            L1Probe::Hit => {
                self.l1s[self_idx].stats.hits += 1;
                return L1AccessOutcome::Hit;
            }
            L1Probe::UpgradeMiss => {
                self.l1s[self_idx].stats.upgrade_misses += 1;
            }
            L1Probe::Miss => {}
        }
        self.l1s[self_idx].stats.misses += 1;
        trace!("core {core}: miss {block_addr:#010x} write={is_write} inst={is_inst} at {now}");

        // 3. Write exclusion against peer cores' pending misses.
        for idx in 0..self.l1s.len() {
            if idx / 2 == core {
                continue;
            }
            if self.l1s[idx].mshr_conflicts(block_addr, is_write) {
                self.l1s[self_idx].stats.stalls += 1;
                return L1AccessOutcome::Stall;
            }
        }

        // 4. The LLC must be able to take this request before we disturb
        // any peer state.
        if self.llc.mshrs.has_entry(block_addr) || !self.llc.mshrs.has_free_slot() {
            self.l1s[self_idx].stats.stalls += 1;
            return L1AccessOutcome::Stall;
        }

        // 5. Snoop every peer L1. A writer invalidates peers, a reader
        // joins as SHARED; a MODIFIED supplier's data goes straight to
        // memory, bypassing the LLC.
        let mut found_peer = false;
        let mut found_modified = false;
        for idx in 0..self.l1s.len() {
            if idx / 2 == core {
                continue;
            }
            if let Some(snoop) = self.l1s[idx].probe_coherence(block_addr, is_write) {
                found_peer = true;
                if snoop.was_modified {
                    found_modified = true;
                    if let Some(data) = snoop.data {
                        self.mem.write_line(block_addr, &data);
                    }
                }
            }
        }
        if found_peer {
            if found_modified {
                self.dram.enqueue(block_addr, true, RequestSource::Memory, now);
            }
            let target = if is_write { MesiState::Modified } else { MesiState::Shared };
            self.l1s[self_idx].set_mshr(block_addr, is_write, target, Some(now + L1_FILL_DELAY));
            return L1AccessOutcome::MissPending;
        }

        // 6. No supplier: go to the LLC. A hit resolves after the hop plus
        // the LLC latency; a miss waits for the asynchronous fill.
        let target = if is_write { MesiState::Modified } else { MesiState::Exclusive };
        match self.llc.access(block_addr, is_write, core, is_inst, now) {
            LlcAccessStatus::Hit => {
                let ready = now + L1_FILL_DELAY + self.llc.hit_latency();
                self.l1s[self_idx].set_mshr(block_addr, is_write, target, Some(ready));
                L1AccessOutcome::MissPending
            }
            LlcAccessStatus::Miss => {
                self.l1s[self_idx].set_mshr(block_addr, is_write, target, None);
                L1AccessOutcome::MissPending
            }
            LlcAccessStatus::Busy => {
                // Step 4 reserved a slot, so this is unreachable short of a
                // protocol bug; surface it as a stall either way.
                debug_assert!(false, "LLC busy after MSHR availability check");
                self.l1s[self_idx].stats.stalls += 1;
                L1AccessOutcome::Stall
            }
        }
    }

    /// The driver dropped its fetch intent (branch squash). Any LLC/DRAM
    /// work already in flight completes and fills silently.
    pub fn cancel_fetch(&mut self, core: usize) {
        self.l1s[l1_index(core, true)].cancel_miss();
    }

    // Word and sub-word consumer I/O. The first HIT delivers the data;
    // stores synchronize backing memory at the same moment, which is what
    // keeps DRAM traffic timing-only.

    pub fn fetch_word(&mut self, core: usize, addr: Addr) -> Option<u32> {
        debug_assert!(addr % 4 == 0, "misaligned fetch");
        match self.l1_access(core, addr, false, true) {
            AccessStatus::Hit => Some(self.l1(core, true).read_word(addr)),
            AccessStatus::Stall => None,
        }
    }

    pub fn load_word(&mut self, core: usize, addr: Addr) -> Option<u32> {
        debug_assert!(addr % 4 == 0, "misaligned load");
        match self.l1_access(core, addr, false, false) {
            AccessStatus::Hit => Some(self.l1(core, false).read_word(addr)),
            AccessStatus::Stall => None,
        }
    }

    pub fn store_word(&mut self, core: usize, addr: Addr, value: u32) -> bool {
        debug_assert!(addr % 4 == 0, "misaligned store");
        match self.l1_access(core, addr, true, false) {
            AccessStatus::Hit => {
                self.l1_mut(core, false).write_word(addr, value);
                self.mem.write_word(addr, value);
                true
            }
            AccessStatus::Stall => false,
        }
    }

    pub fn load_byte(&mut self, core: usize, addr: Addr) -> Option<u8> {
        let word = self.load_word(core, addr & !3)?;
        Some((word >> ((addr & 3) * 8)) as u8)
    }

    pub fn load_half(&mut self, core: usize, addr: Addr) -> Option<u16> {
        debug_assert!(addr % 2 == 0, "misaligned halfword load");
        let word = self.load_word(core, addr & !3)?;
        Some((word >> ((addr & 2) * 8)) as u16)
    }

    /// Sub-word stores read-modify-write the containing word.
    pub fn store_byte(&mut self, core: usize, addr: Addr, value: u8) -> bool {
        let word_addr = addr & !3;
        match self.l1_access(core, word_addr, true, false) {
            AccessStatus::Hit => {
                let shift = (addr & 3) * 8;
                let old = self.l1(core, false).read_word(word_addr);
                let merged = (old & !(0xFF << shift)) | ((value as u32) << shift);
                self.l1_mut(core, false).write_word(word_addr, merged);
                self.mem.write_word(word_addr, merged);
                true
            }
            AccessStatus::Stall => false,
        }
    }

    pub fn store_half(&mut self, core: usize, addr: Addr, value: u16) -> bool {
        debug_assert!(addr % 2 == 0, "misaligned halfword store");
        let word_addr = addr & !3;
        match self.l1_access(core, word_addr, true, false) {
            AccessStatus::Hit => {
                let shift = (addr & 2) * 8;
                let old = self.l1(core, false).read_word(word_addr);
                let merged = (old & !(0xFFFF << shift)) | ((value as u32) << shift);
                self.l1_mut(core, false).write_word(word_addr, merged);
                self.mem.write_word(word_addr, merged);
                true
            }
            AccessStatus::Stall => false,
        }
    }

    /// Debug/test helper asserting the universal invariants: block state
    /// consistency, a single system-wide owner per address, per-cache tag
    /// uniqueness, and MSHR address uniqueness.
    pub fn check_invariants(&self) {
        let mut owners: HashMap<Addr, u32> = HashMap::new();
        let mut sharers: HashMap<Addr, u32> = HashMap::new();
        for (idx, l1) in self.l1s.iter().enumerate() {
            let mut seen = HashSet::new();
            for (addr, block) in l1.blocks() {
                assert!(seen.insert(addr), "duplicate tag for {addr:#010x} in L1 {idx}");
                assert!(
                    block.state != MesiState::Modified || block.dirty,
                    "MODIFIED block {addr:#010x} is clean"
                );
                if block.state.is_owned() {
                    *owners.entry(addr).or_default() += 1;
                } else {
                    *sharers.entry(addr).or_default() += 1;
                }
            }
        }
        for (addr, count) in &owners {
            assert!(*count == 1, "{addr:#010x} has {count} M/E owners");
            assert!(
                !sharers.contains_key(addr),
                "{addr:#010x} both owned and shared"
            );
        }
        let mut mshr_addrs = HashSet::new();
        for addr in self.llc.mshrs.addresses() {
            assert!(mshr_addrs.insert(addr), "duplicate LLC MSHR for {addr:#010x}");
        }
        for (addr, block) in self.llc.blocks() {
            assert!(
                block.state != MesiState::Modified || block.dirty,
                "MODIFIED LLC block {addr:#010x} is clean"
            );
        }
    }
}
