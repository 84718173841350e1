use crate::mem::block::MesiState;
use crate::mem::l1::{L1Cache, L1Probe};

const BLOCK: usize = 32;

fn cache() -> L1Cache {
    // 4 sets x 2 ways x 32 B; addresses 0x000, 0x080, 0x100 share set 0.
    L1Cache::new(0, false, 4, 2, 32, 0)
}

fn line(byte: u8) -> Vec<u8> {
    vec![byte; BLOCK]
}

fn fill(cache: &mut L1Cache, addr: u32, state: MesiState, byte: u8) {
    cache.set_mshr(addr, state == MesiState::Modified, state, Some(0));
    let _ = cache.fill(addr, state, &line(byte), false);
}

#[test]
fn fill_without_mshr_is_dropped() {
    let mut c = cache();
    assert!(c.fill(0x100, MesiState::Exclusive, &line(1), false).is_none());
    assert_eq!(c.state_of(0x100), MesiState::Invalid);
    assert_eq!(c.stats.fills, 0);
}

#[test]
fn fill_with_mismatched_address_is_dropped() {
    let mut c = cache();
    c.set_mshr(0x100, false, MesiState::Exclusive, None);
    assert!(c.fill(0x200, MesiState::Exclusive, &line(1), false).is_none());
    // The pending miss survives for its own fill.
    assert!(c.mshr.is_some());
    assert_eq!(c.state_of(0x200), MesiState::Invalid);
}

#[test]
fn fill_installs_target_state_and_clears_mshr() {
    let mut c = cache();
    c.set_mshr(0x100, false, MesiState::Exclusive, None);
    assert!(c.fill(0x100, MesiState::Exclusive, &line(0xAB), false).is_none());
    assert!(c.mshr.is_none());
    assert_eq!(c.state_of(0x100), MesiState::Exclusive);
    assert_eq!(c.read_word(0x100), 0xABAB_ABAB);
    assert_eq!(c.stats.fills, 1);
}

#[test]
fn modified_fill_sets_dirty() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Modified, 0xCC);
    let (_, block) = c.blocks().next().unwrap();
    assert_eq!(block.state, MesiState::Modified);
    assert!(block.dirty);
}

#[test]
fn write_hit_on_exclusive_transitions_to_modified() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Exclusive, 0);
    assert_eq!(c.try_hit(0x104, true), L1Probe::Hit);
    assert_eq!(c.state_of(0x100), MesiState::Modified);
}

#[test]
fn write_against_shared_is_an_upgrade_miss() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Shared, 0);
    assert_eq!(c.try_hit(0x100, true), L1Probe::UpgradeMiss);
    // Still SHARED until the upgrade fill lands.
    assert_eq!(c.state_of(0x100), MesiState::Shared);
}

#[test]
fn upgrade_fill_reuses_the_resident_way() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Shared, 0x11);
    c.set_mshr(0x100, true, MesiState::Modified, Some(0));
    let wb = c.fill(0x100, MesiState::Modified, &line(0x11), false);
    assert!(wb.is_none(), "in-place upgrade must not evict");
    assert_eq!(c.state_of(0x100), MesiState::Modified);
    assert_eq!(c.stats.evictions, 0);
}

#[test]
fn read_snoop_downgrades_owner_to_shared() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Exclusive, 0);
    let snoop = c.probe_coherence(0x100, false).unwrap();
    assert!(!snoop.was_modified);
    assert!(snoop.data.is_none());
    assert_eq!(c.state_of(0x100), MesiState::Shared);
}

#[test]
fn read_snoop_on_modified_emits_data_and_cleans() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Modified, 0x77);
    let snoop = c.probe_coherence(0x100, false).unwrap();
    assert!(snoop.was_modified);
    assert_eq!(snoop.data.unwrap(), line(0x77));
    let (_, block) = c.blocks().next().unwrap();
    assert_eq!(block.state, MesiState::Shared);
    assert!(!block.dirty);
}

#[test]
fn write_snoop_invalidates() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Shared, 0);
    assert!(c.probe_coherence(0x100, true).is_some());
    assert_eq!(c.state_of(0x100), MesiState::Invalid);
    assert_eq!(c.stats.snoop_invalidations, 1);
}

#[test]
fn snoop_misses_return_none() {
    let mut c = cache();
    assert!(c.probe_coherence(0x100, false).is_none());
}

#[test]
fn dirty_eviction_hands_back_a_writeback() {
    let mut c = cache();
    fill(&mut c, 0x000, MesiState::Modified, 0xAA);
    fill(&mut c, 0x080, MesiState::Exclusive, 0xBB);
    // Set 0 full; the next fill in set 0 evicts the LRU way (0x000).
    c.set_mshr(0x100, false, MesiState::Exclusive, Some(0));
    let wb = c.fill(0x100, MesiState::Exclusive, &line(0xCC), false).unwrap();
    assert_eq!(wb.addr, 0x000);
    assert!(wb.dirty);
    assert_eq!(wb.data, line(0xAA));
    assert_eq!(c.stats.evictions, 1);
    assert_eq!(c.stats.writebacks, 1);
}

#[test]
fn clean_eviction_is_silent_unless_forced() {
    let mut c = cache();
    fill(&mut c, 0x000, MesiState::Exclusive, 0xAA);
    fill(&mut c, 0x080, MesiState::Exclusive, 0xBB);
    c.set_mshr(0x100, false, MesiState::Exclusive, Some(0));
    assert!(c.fill(0x100, MesiState::Exclusive, &line(0xCC), false).is_none());

    // Under an exclusive LLC the clean victim is written back too.
    let mut c = cache();
    fill(&mut c, 0x000, MesiState::Exclusive, 0xAA);
    fill(&mut c, 0x080, MesiState::Exclusive, 0xBB);
    c.set_mshr(0x100, false, MesiState::Exclusive, Some(0));
    let wb = c.fill(0x100, MesiState::Exclusive, &line(0xCC), true).unwrap();
    assert!(!wb.dirty);
    assert_eq!(wb.data, line(0xAA));
}

#[test]
fn invalidate_reports_presence() {
    let mut c = cache();
    fill(&mut c, 0x100, MesiState::Shared, 0);
    assert!(c.invalidate(0x100));
    assert!(!c.invalidate(0x100));
    assert_eq!(c.state_of(0x100), MesiState::Invalid);
}

#[test]
fn mshr_conflict_needs_a_write_on_either_side() {
    let mut c = cache();
    c.set_mshr(0x100, false, MesiState::Exclusive, None);
    assert!(!c.mshr_conflicts(0x100, false), "read vs read is fine");
    assert!(c.mshr_conflicts(0x100, true), "their read, our write");
    assert!(!c.mshr_conflicts(0x200, true), "different block");

    let mut c = cache();
    c.set_mshr(0x100, true, MesiState::Modified, None);
    assert!(c.mshr_conflicts(0x100, false), "their write, our read");
}

#[test]
fn cancel_miss_frees_the_mshr() {
    let mut c = cache();
    c.set_mshr(0x100, false, MesiState::Exclusive, None);
    c.cancel_miss();
    assert!(c.mshr.is_none());
    // The late fill now drops silently.
    assert!(c.fill(0x100, MesiState::Exclusive, &line(1), false).is_none());
    assert_eq!(c.state_of(0x100), MesiState::Invalid);
}
