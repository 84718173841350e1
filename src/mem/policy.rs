//! Replacement policy engine. Policies are tagged variants dispatched with
//! an exhaustive match; per-block metadata (LRU counter, RRPV) lives in the
//! block arrays, per-policy state (PSEL, Bloom filter, PRNG) lives here.

use bitvec::vec::BitVec;
use serde::Deserialize;

use crate::mem::addr::Addr;
use crate::mem::block::CacheSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Lru,
    Dip,
    Drrip,
    Eaf,
}

pub const RRPV_MAX: u8 = 3;
pub const RRPV_LONG: u8 = 2;
const PSEL_MAX: u16 = 1023;
const PSEL_INIT: u16 = 512;
const PSEL_THRESHOLD: u16 = 512;
const LEADER_SETS: usize = 32;
const BIP_MRU_ONE_IN: u64 = 32;
const BRRIP_LONG_ONE_IN: u64 = 32;

/// Seedable splitmix64 stream. Owned by the policy so BIP/BRRIP coin flips
/// are reproducible per cache instance.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        mix64(self.state)
    }

    pub fn one_in(&mut self, n: u64) -> bool {
        self.next_u64() % n == 0
    }
}

fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Bloom filter over recently evicted block addresses, sized at 8 bits per
/// cache line with two hash functions. Cleared wholesale once the insertion
/// count reaches the line count.
#[derive(Debug, Clone)]
pub struct EvictedAddressFilter {
    bits: BitVec,
    total_lines: usize,
    insertions: usize,
    seed: u64,
}

impl EvictedAddressFilter {
    pub fn new(total_lines: usize, seed: u64) -> Self {
        let total_lines = total_lines.max(1);
        Self {
            bits: BitVec::repeat(false, total_lines * 8),
            total_lines,
            insertions: 0,
            seed,
        }
    }

    fn indices(&self, addr: Addr) -> (usize, usize) {
        let len = self.bits.len();
        let h1 = mix64(self.seed ^ addr as u64);
        let h2 = mix64(self.seed.wrapping_add(0x9e37_79b9_7f4a_7c15) ^ addr as u64);
        ((h1 as usize) % len, (h2 as usize) % len)
    }

    pub fn contains(&self, addr: Addr) -> bool {
        let (a, b) = self.indices(addr);
        self.bits[a] && self.bits[b]
    }

    pub fn insert(&mut self, addr: Addr) {
        let (a, b) = self.indices(addr);
        self.bits.set(a, true);
        self.bits.set(b, true);
        self.insertions += 1;
        if self.insertions >= self.total_lines {
            self.bits.fill(false);
            self.insertions = 0;
        }
    }

    pub fn insertions(&self) -> usize {
        self.insertions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaderRole {
    PolicyA,
    PolicyB,
}

#[derive(Debug)]
pub struct ReplacementPolicy {
    kind: PolicyKind,
    leader_stride: usize,
    psel: u16,
    rng: SplitMix64,
    eaf: Option<EvictedAddressFilter>,
}

impl ReplacementPolicy {
    pub fn new(kind: PolicyKind, sets: usize, ways: usize, seed: u64) -> Self {
        let leader_stride = match kind {
            PolicyKind::Dip | PolicyKind::Drrip => {
                let leaders = LEADER_SETS.min(sets / 2).max(1);
                sets / leaders
            }
            _ => 0,
        };
        let eaf = match kind {
            PolicyKind::Eaf => Some(EvictedAddressFilter::new(sets * ways, seed)),
            _ => None,
        };
        Self {
            kind,
            leader_stride,
            psel: PSEL_INIT,
            rng: SplitMix64::new(seed),
            eaf,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn psel(&self) -> u16 {
        self.psel
    }

    pub fn eaf(&self) -> Option<&EvictedAddressFilter> {
        self.eaf.as_ref()
    }

    fn leader_role(&self, set_idx: usize) -> Option<LeaderRole> {
        if self.leader_stride == 0 {
            return None;
        }
        match set_idx % self.leader_stride {
            0 => Some(LeaderRole::PolicyA),
            1 => Some(LeaderRole::PolicyB),
            _ => None,
        }
    }

    /// Policy B wins follower sets once PSEL crosses the midpoint.
    fn follower_picks_b(&self) -> bool {
        self.psel >= PSEL_THRESHOLD
    }

    fn nudge_psel(&mut self, role: LeaderRole) {
        // A miss in a leader set is evidence against that leader's policy.
        match role {
            LeaderRole::PolicyA => self.psel = (self.psel + 1).min(PSEL_MAX),
            LeaderRole::PolicyB => self.psel = self.psel.saturating_sub(1),
        }
    }

    /// Victim way for a miss in `set`. Invalid ways are always taken first.
    /// RRIP aging mutates the set, which is why this takes `&mut`.
    pub fn find_victim(&mut self, set: &mut CacheSet) -> usize {
        if let Some(way) = set.blocks.iter().position(|b| !b.is_valid()) {
            return way;
        }
        match self.kind {
            PolicyKind::Lru | PolicyKind::Dip | PolicyKind::Eaf => lru_victim(set),
            PolicyKind::Drrip => rrip_victim(set),
        }
    }

    pub fn update_on_hit(&mut self, set: &mut CacheSet, way: usize) {
        match self.kind {
            PolicyKind::Lru | PolicyKind::Dip | PolicyKind::Eaf => touch_mru(set, way),
            PolicyKind::Drrip => set.blocks[way].rrpv = 0,
        }
    }

    /// Insertion bookkeeping for a freshly installed block. Called once per
    /// miss-install, after the block's tag and state are written.
    pub fn insert_on_miss(&mut self, set: &mut CacheSet, way: usize, set_idx: usize, block_addr: Addr) {
        match self.kind {
            PolicyKind::Lru => insert_mru(set, way),
            PolicyKind::Dip => {
                let use_bip = match self.leader_role(set_idx) {
                    Some(role) => {
                        self.nudge_psel(role);
                        role == LeaderRole::PolicyB
                    }
                    None => self.follower_picks_b(),
                };
                if use_bip {
                    self.insert_bip(set, way);
                } else {
                    insert_mru(set, way);
                }
            }
            PolicyKind::Drrip => {
                let use_brrip = match self.leader_role(set_idx) {
                    Some(role) => {
                        self.nudge_psel(role);
                        role == LeaderRole::PolicyB
                    }
                    None => self.follower_picks_b(),
                };
                set.blocks[way].rrpv = if use_brrip && !self.rng.one_in(BRRIP_LONG_ONE_IN) {
                    RRPV_MAX
                } else {
                    RRPV_LONG
                };
            }
            PolicyKind::Eaf => {
                let reuse = self
                    .eaf
                    .as_ref()
                    .map(|f| f.contains(block_addr))
                    .unwrap_or(false);
                if reuse {
                    insert_mru(set, way);
                } else {
                    self.insert_bip(set, way);
                }
            }
        }
    }

    /// Record an eviction; only EAF keeps history.
    pub fn note_eviction(&mut self, block_addr: Addr) {
        if let Some(filter) = self.eaf.as_mut() {
            filter.insert(block_addr);
        }
    }

    fn insert_bip(&mut self, set: &mut CacheSet, way: usize) {
        if self.rng.one_in(BIP_MRU_ONE_IN) {
            insert_mru(set, way);
        } else {
            insert_lru(set, way);
        }
    }
}

fn touch_mru(set: &mut CacheSet, way: usize) {
    let current = set.blocks[way].lru_count;
    for (i, block) in set.blocks.iter_mut().enumerate() {
        if i != way && block.is_valid() && block.lru_count < current {
            block.lru_count += 1;
        }
    }
    set.blocks[way].lru_count = 0;
}

fn insert_mru(set: &mut CacheSet, way: usize) {
    // Start above every peer so the promotion ages all of them.
    set.blocks[way].lru_count = set.blocks.len() as u32;
    touch_mru(set, way);
}

fn insert_lru(set: &mut CacheSet, way: usize) {
    set.blocks[way].lru_count = set.blocks.len() as u32 - 1;
}

fn lru_victim(set: &CacheSet) -> usize {
    let mut victim = 0;
    let mut max_count = 0;
    for (i, block) in set.blocks.iter().enumerate() {
        if block.lru_count >= max_count {
            max_count = block.lru_count;
            victim = i;
        }
    }
    victim
}

fn rrip_victim(set: &mut CacheSet) -> usize {
    loop {
        if let Some(way) = set.blocks.iter().position(|b| b.rrpv >= RRPV_MAX) {
            return way;
        }
        for block in &mut set.blocks {
            block.rrpv += 1;
        }
    }
}
