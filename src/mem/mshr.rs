//! Miss status handling registers for the shared cache. Entries walk an
//! explicit lifecycle; an address absent from the table is idle.
//!
//!   (idle) -> WaitingSend -> WaitingDram -> WaitingFill -> Ready -> (idle)
//!
//! WaitingSend covers the LLC-to-DRAM hop, WaitingFill the DRAM-to-LLC hop.
//! The line bytes are captured from backing memory when DRAM reports
//! completion, so the fill commits exactly what memory held at that cycle.

use log::trace;

use crate::mem::addr::Addr;
use crate::mem::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrState {
    WaitingSend,
    WaitingDram,
    WaitingFill,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub core: usize,
    pub is_inst: bool,
}

#[derive(Debug)]
pub struct MshrEntry {
    pub addr: Addr,
    pub state: MshrState,
    pub is_write: bool,
    pub is_inst: bool,
    pub requester: Requester,
    pub alloc_cycle: Cycle,
    send_cycle: Cycle,
    completion_cycle: Cycle,
    pub data: Vec<u8>,
    pub merged: Vec<Requester>,
}

/// A request the table wants forwarded to the DRAM controller.
#[derive(Debug, Clone, Copy)]
pub struct DramDispatch {
    pub addr: Addr,
    pub is_write: bool,
    pub is_inst: bool,
}

#[derive(Debug)]
pub struct MshrTable {
    capacity: usize,
    send_delay: Cycle,
    fill_delay: Cycle,
    line_size: usize,
    entries: Vec<MshrEntry>,
}

impl MshrTable {
    pub fn new(capacity: usize, send_delay: Cycle, fill_delay: Cycle, line_size: usize) -> Self {
        Self {
            capacity,
            send_delay,
            fill_delay,
            line_size,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_entry(&self, addr: Addr) -> bool {
        self.entries.iter().any(|e| e.addr == addr)
    }

    pub fn has_free_slot(&self) -> bool {
        self.entries.len() < self.capacity
    }

    pub fn entry(&self, addr: Addr) -> Option<&MshrEntry> {
        self.entries.iter().find(|e| e.addr == addr)
    }

    pub fn addresses(&self) -> impl Iterator<Item = Addr> + '_ {
        self.entries.iter().map(|e| e.addr)
    }

    /// Allocate a new entry. `addr` must be block-aligned and not already
    /// tracked; callers check `has_free_slot` first.
    pub fn allocate(&mut self, addr: Addr, is_write: bool, is_inst: bool, core: usize, now: Cycle) {
        debug_assert!(!self.has_entry(addr), "duplicate MSHR for {addr:#010x}");
        assert!(self.has_free_slot(), "MSHR table overflow");
        trace!("mshr: alloc {addr:#010x} write={is_write} core={core} at {now}");
        self.entries.push(MshrEntry {
            addr,
            state: MshrState::WaitingSend,
            is_write,
            is_inst,
            requester: Requester { core, is_inst },
            alloc_cycle: now,
            send_cycle: now + self.send_delay,
            completion_cycle: 0,
            data: vec![0; self.line_size],
            merged: Vec::new(),
        });
    }

    /// Fold another requester into an in-flight entry. Returns false when no
    /// entry tracks `addr`.
    pub fn merge(&mut self, addr: Addr, requester: Requester) -> bool {
        match self.entries.iter_mut().find(|e| e.addr == addr) {
            Some(entry) => {
                entry.merged.push(requester);
                true
            }
            None => false,
        }
    }

    /// Entries whose LLC-to-DRAM hop elapsed this cycle; each moves to
    /// WaitingDram and yields a dispatch for the controller.
    pub fn take_sendable(&mut self, now: Cycle) -> Vec<DramDispatch> {
        let mut out = Vec::new();
        for entry in &mut self.entries {
            if entry.state == MshrState::WaitingSend && now >= entry.send_cycle {
                entry.state = MshrState::WaitingDram;
                out.push(DramDispatch {
                    addr: entry.addr,
                    is_write: entry.is_write,
                    is_inst: entry.is_inst,
                });
            }
        }
        out
    }

    /// DRAM finished the access for `addr`: start the fill hop and capture
    /// the line bytes backing memory holds right now.
    pub fn dram_complete(&mut self, addr: Addr, now: Cycle, line: &[u8]) {
        for entry in &mut self.entries {
            if entry.addr == addr && entry.state == MshrState::WaitingDram {
                entry.state = MshrState::WaitingFill;
                entry.completion_cycle = now + self.fill_delay;
                entry.data.copy_from_slice(line);
                trace!("mshr: {addr:#010x} filling, ready at {}", entry.completion_cycle);
            }
        }
    }

    /// Promote elapsed fills to Ready and pop one for the LLC to commit.
    /// Called in a loop each cycle until it returns None.
    pub fn pop_ready(&mut self, now: Cycle) -> Option<MshrEntry> {
        for entry in &mut self.entries {
            if entry.state == MshrState::WaitingFill && now >= entry.completion_cycle {
                entry.state = MshrState::Ready;
            }
        }
        let idx = self
            .entries
            .iter()
            .position(|e| e.state == MshrState::Ready)?;
        Some(self.entries.swap_remove(idx))
    }
}
