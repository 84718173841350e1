//! Banked DRAM controller. Eight independent banks share one command bus
//! and one data bus; reservations on those buses are the source of truth
//! for timing. Scheduling is FR-FCFS: row-buffer hits first, then arrival
//! order, then memory-stage requests over instruction fetches.

use std::collections::BTreeMap;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::mem::addr::{decode_dram, Addr};
use crate::mem::Cycle;
use crate::sim::config::Config;

const GC_INTERVAL: Cycle = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagePolicy {
    /// Leave the row open after an access until a conflict displaces it.
    Open,
    /// Auto-precharge: every access finds the row closed.
    Closed,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DramConfig {
    pub banks: usize,
    pub cmd_bus_cycles: Cycle,
    pub data_bus_cycles: Cycle,
    pub bank_busy: Cycle,
    pub page_policy: PagePolicy,
}

impl Config for DramConfig {}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            banks: 8,
            cmd_bus_cycles: 4,
            data_bus_cycles: 50,
            bank_busy: 100,
            page_policy: PagePolicy::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    Fetch,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Hit,
    Closed,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct DramRequest {
    pub addr: Addr,
    pub is_write: bool,
    pub source: RequestSource,
    pub arrival: Cycle,
    pub bank: usize,
    pub row: u32,
    seq: u64,
    scheduled: bool,
    completion: Cycle,
}

#[derive(Debug, Clone, Copy)]
pub struct DramCompletion {
    pub addr: Addr,
    pub is_write: bool,
    pub source: RequestSource,
}

#[derive(Debug)]
struct Bank {
    active_row: Option<u32>,
    busy_until: Cycle,
}

/// Sparse per-cycle occupancy map for a shared bus.
#[derive(Debug, Default)]
struct BusReservations {
    slots: BTreeMap<Cycle, ()>,
}

impl BusReservations {
    fn is_free(&self, start: Cycle, len: Cycle) -> bool {
        self.slots.range(start..start + len).next().is_none()
    }

    fn reserve(&mut self, start: Cycle, len: Cycle) {
        assert!(self.is_free(start, len), "overlapping bus reservation");
        for cycle in start..start + len {
            self.slots.insert(cycle, ());
        }
    }

    fn gc(&mut self, now: Cycle) {
        self.slots = self.slots.split_off(&now);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DramStats {
    pub enqueued: u64,
    pub reads: u64,
    pub writes: u64,
    pub scheduled: u64,
    pub row_hits: u64,
    pub row_opens: u64,
    pub row_conflicts: u64,
    pub completed: u64,
}

/// Up to three command-bus slots plus the data-bus start, all relative to
/// the issue cycle.
#[derive(Debug, Clone, Copy)]
struct AccessPlan {
    cmds: [Cycle; 3],
    num_cmds: usize,
    data_offset: Cycle,
    outcome: RowOutcome,
}

#[derive(Debug)]
pub struct DramController {
    cfg: DramConfig,
    banks: Vec<Bank>,
    queue: Vec<DramRequest>,
    cmd_bus: BusReservations,
    data_bus: BusReservations,
    next_seq: u64,
    pub stats: DramStats,
}

impl DramController {
    pub fn new(cfg: DramConfig) -> Self {
        assert!(cfg.banks.is_power_of_two(), "bank count must be a power of two");
        let banks = (0..cfg.banks)
            .map(|_| Bank {
                active_row: None,
                busy_until: 0,
            })
            .collect();
        Self {
            cfg,
            banks,
            queue: Vec::new(),
            cmd_bus: BusReservations::default(),
            data_bus: BusReservations::default(),
            next_seq: 0,
            stats: DramStats::default(),
        }
    }

    pub fn enqueue(&mut self, addr: Addr, is_write: bool, source: RequestSource, now: Cycle) {
        let decoded = decode_dram(addr);
        trace!(
            "dram: enqueue {addr:#010x} bank={} row={} write={is_write} at {now}",
            decoded.bank,
            decoded.row
        );
        self.stats.enqueued += 1;
        if is_write {
            self.stats.writes += 1;
        } else {
            self.stats.reads += 1;
        }
        self.queue.push(DramRequest {
            addr,
            is_write,
            source,
            arrival: now,
            bank: decoded.bank % self.cfg.banks,
            row: decoded.row,
            seq: self.next_seq,
            scheduled: false,
            completion: 0,
        });
        self.next_seq += 1;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn bank_active_row(&self, bank: usize) -> Option<u32> {
        self.banks[bank].active_row
    }

    /// Completion phase: dequeue at most one finished request per cycle and
    /// hand it upstream.
    pub fn begin_cycle(&mut self, now: Cycle) -> Option<DramCompletion> {
        let idx = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, r)| r.scheduled && r.completion <= now)
            .min_by_key(|(_, r)| (r.completion, r.seq))
            .map(|(i, _)| i)?;
        let req = self.queue.swap_remove(idx);
        self.stats.completed += 1;
        trace!("dram: complete {:#010x} at {now}", req.addr);
        Some(DramCompletion {
            addr: req.addr,
            is_write: req.is_write,
            source: req.source,
        })
    }

    /// Issue phase: pick the best schedulable request (FR-FCFS) and commit
    /// its bus and bank reservations. At most one issue per cycle.
    pub fn schedule(&mut self, now: Cycle) {
        let mut best: Option<usize> = None;
        for idx in 0..self.queue.len() {
            if self.queue[idx].scheduled || !self.is_schedulable(&self.queue[idx], now) {
                continue;
            }
            best = Some(match best {
                None => idx,
                Some(prev) => self.prefer(idx, prev),
            });
        }
        if let Some(idx) = best {
            self.issue(idx, now);
        }
        if now % GC_INTERVAL == 0 {
            self.cmd_bus.gc(now);
            self.data_bus.gc(now);
        }
    }

    /// FR-FCFS priority: row hit, then arrival, then memory over fetch,
    /// then age in the queue.
    fn prefer(&self, a: usize, b: usize) -> usize {
        let hit_a = self.row_outcome(&self.queue[a]) == RowOutcome::Hit;
        let hit_b = self.row_outcome(&self.queue[b]) == RowOutcome::Hit;
        if hit_a != hit_b {
            return if hit_a { a } else { b };
        }
        let ra = &self.queue[a];
        let rb = &self.queue[b];
        if ra.arrival != rb.arrival {
            return if ra.arrival < rb.arrival { a } else { b };
        }
        let fetch_a = ra.source == RequestSource::Fetch;
        let fetch_b = rb.source == RequestSource::Fetch;
        if fetch_a != fetch_b {
            return if fetch_b { a } else { b };
        }
        if ra.seq < rb.seq {
            a
        } else {
            b
        }
    }

    fn row_outcome(&self, req: &DramRequest) -> RowOutcome {
        match self.banks[req.bank].active_row {
            None => RowOutcome::Closed,
            Some(row) if row == req.row => RowOutcome::Hit,
            Some(_) => RowOutcome::Conflict,
        }
    }

    fn plan(&self, req: &DramRequest) -> AccessPlan {
        let busy = self.cfg.bank_busy;
        let outcome = self.row_outcome(req);
        let (cmds, num_cmds) = match outcome {
            RowOutcome::Hit => ([0, 0, 0], 1),
            RowOutcome::Closed => ([0, busy, 0], 2),
            RowOutcome::Conflict => ([0, busy, 2 * busy], 3),
        };
        AccessPlan {
            cmds,
            num_cmds,
            data_offset: cmds[num_cmds - 1] + busy,
            outcome,
        }
    }

    fn is_schedulable(&self, req: &DramRequest, now: Cycle) -> bool {
        if self.banks[req.bank].busy_until > now {
            return false;
        }
        let plan = self.plan(req);
        for &offset in &plan.cmds[..plan.num_cmds] {
            if !self.cmd_bus.is_free(now + offset, self.cfg.cmd_bus_cycles) {
                return false;
            }
        }
        self.data_bus
            .is_free(now + plan.data_offset, self.cfg.data_bus_cycles)
    }

    fn issue(&mut self, idx: usize, now: Cycle) {
        let plan = self.plan(&self.queue[idx]);
        let bank = self.queue[idx].bank;
        assert!(self.banks[bank].busy_until <= now, "bank scheduled while busy");

        for &offset in &plan.cmds[..plan.num_cmds] {
            self.cmd_bus.reserve(now + offset, self.cfg.cmd_bus_cycles);
        }
        self.data_bus
            .reserve(now + plan.data_offset, self.cfg.data_bus_cycles);

        self.banks[bank].busy_until = now + plan.num_cmds as Cycle * self.cfg.bank_busy;
        self.banks[bank].active_row = match self.cfg.page_policy {
            PagePolicy::Open => Some(self.queue[idx].row),
            PagePolicy::Closed => None,
        };

        let req = &mut self.queue[idx];
        req.scheduled = true;
        req.completion = now + plan.data_offset + self.cfg.data_bus_cycles;

        self.stats.scheduled += 1;
        match plan.outcome {
            RowOutcome::Hit => self.stats.row_hits += 1,
            RowOutcome::Closed => self.stats.row_opens += 1,
            RowOutcome::Conflict => self.stats.row_conflicts += 1,
        }
        debug!(
            "dram: issue {:#010x} bank={} {:?} at {now}, done {}",
            req.addr, bank, plan.outcome, req.completion
        );
    }
}
