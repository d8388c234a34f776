//! Log record reassembly
//!
//! The board stamps each record with the low 16 bits of a free-running tick.
//! Reassembly happens in two stages:
//!
//! 1. [`TickExtender`] turns the rolling tick into a monotonic 64-bit tick.
//!    A forward step of less than half the counter period is progress
//!    (wrapping past zero is a rollover). A backward step no larger than the
//!    reorder window is a late record. Anything else is corrupt. The first
//!    record lands in epoch 1 ([`TICK_ORIGIN`]), so a late record from just
//!    before a rollover at the start of a readout is still representable.
//!    Sibling log ids stamp from the same board counter and share one
//!    extender per value set.
//! 2. [`GroupAssembler`] collects the records of one value, which may span
//!    several log ids sharing a tick, and releases complete values in tick
//!    order once they are older than the reorder window. A value still missing
//!    a sibling after the sibling window is discarded.

use std::collections::{BTreeMap, HashMap};

use crate::config::{LogConfig, TICK_ORIGIN, TICK_PERIOD};
use crate::protocol::constants::LOG_RECORD_PAYLOAD;

const HALF_PERIOD: u32 = TICK_PERIOD / 2;

/// Classification of an incoming tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickClass {
    /// At or after the newest tick seen
    Current(u64),
    /// Behind the newest tick but inside the reorder window
    Late(u64),
    /// Implausible backwards jump
    Corrupt,
}

/// Extends one log id's 16-bit tick into a monotonic counter
#[derive(Debug, Clone, Default)]
pub struct TickExtender {
    newest: Option<u64>,
}

impl TickExtender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn newest(&self) -> Option<u64> {
        self.newest
    }

    pub fn extend(&mut self, low: u16, reorder_window: u16) -> TickClass {
        let Some(newest) = self.newest else {
            let first = TICK_ORIGIN + u64::from(low);
            self.newest = Some(first);
            return TickClass::Current(first);
        };

        let d = u32::from(low.wrapping_sub(newest as u16));
        if d < HALF_PERIOD {
            let extended = newest + u64::from(d);
            self.newest = Some(extended);
            return TickClass::Current(extended);
        }

        let behind = u64::from(TICK_PERIOD - d);
        if behind <= u64::from(reorder_window) && behind <= newest {
            TickClass::Late(newest - behind)
        } else {
            TickClass::Corrupt
        }
    }
}

/// A reassembled value ready for decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    /// First log id of the value's set; identifies the subscription
    pub first_log_id: u8,
    pub tick: u64,
    pub bytes: Vec<u8>,
}

/// Counters describing one reassembly run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub records: u64,
    pub late: u64,
    pub corrupt: u64,
    pub unknown: u64,
    pub duplicate: u64,
    pub incomplete: u64,
    pub values: u64,
}

/// Pairs sibling records of one value set by tick
#[derive(Debug, Clone)]
pub struct GroupAssembler {
    log_ids: Vec<u8>,
    ticks: TickExtender,
    pending: BTreeMap<u64, Vec<Option<[u8; LOG_RECORD_PAYLOAD]>>>,
    newest: Option<u64>,
    /// Ticks at or below this have been released or discarded
    released: Option<u64>,
}

impl GroupAssembler {
    pub fn new(log_ids: Vec<u8>) -> Self {
        Self {
            log_ids,
            ticks: TickExtender::new(),
            pending: BTreeMap::new(),
            newest: None,
            released: None,
        }
    }

    pub fn log_ids(&self) -> &[u8] {
        &self.log_ids
    }

    /// Extend a sibling's wire tick on the set's shared counter
    pub fn extend(&mut self, low: u16, reorder_window: u16) -> TickClass {
        self.ticks.extend(low, reorder_window)
    }

    fn first_log_id(&self) -> u8 {
        self.log_ids.first().copied().unwrap_or_default()
    }

    /// Store one record. Returns `false` for a record that arrives too late or twice.
    pub fn insert(
        &mut self,
        slot: usize,
        tick: u64,
        payload: [u8; LOG_RECORD_PAYLOAD],
        stats: &mut ReassemblyStats,
    ) -> bool {
        if self.released.is_some_and(|r| tick <= r) {
            tracing::warn!(
                "Dropping record for log id {} at tick {}: value already released",
                self.log_ids.get(slot).copied().unwrap_or_default(),
                tick
            );
            stats.late += 1;
            return false;
        }
        let width = self.log_ids.len();
        let slots = self.pending.entry(tick).or_insert_with(|| vec![None; width]);
        match slots.get_mut(slot) {
            Some(entry @ None) => *entry = Some(payload),
            _ => {
                tracing::debug!("Duplicate record for log id slot {} at tick {}", slot, tick);
                stats.duplicate += 1;
                return false;
            }
        }
        self.newest = Some(self.newest.map_or(tick, |n| n.max(tick)));
        true
    }

    /// Release complete values old enough that no late sibling can precede them
    pub fn drain(&mut self, config: &LogConfig, stats: &mut ReassemblyStats) -> Vec<Assembled> {
        let Some(newest) = self.newest else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Some((&tick, slots)) = self.pending.iter().next() {
            let age = newest - tick;
            let complete = slots.iter().all(Option::is_some);
            if complete && age >= u64::from(config.reorder_window) {
                let slots = self.pending.remove(&tick).unwrap_or_default();
                out.push(self.assemble(tick, slots));
                stats.values += 1;
            } else if !complete && age > u64::from(config.sibling_window) {
                self.pending.remove(&tick);
                self.discard(tick, stats);
            } else {
                break;
            }
            self.released = Some(tick);
        }
        out
    }

    /// Release every complete value and discard the rest
    pub fn flush(&mut self, stats: &mut ReassemblyStats) -> Vec<Assembled> {
        let mut out = Vec::new();
        for (tick, slots) in std::mem::take(&mut self.pending) {
            if slots.iter().all(Option::is_some) {
                out.push(self.assemble(tick, slots));
                stats.values += 1;
            } else {
                self.discard(tick, stats);
            }
            self.released = Some(tick);
        }
        out
    }

    fn discard(&self, tick: u64, stats: &mut ReassemblyStats) {
        tracing::warn!(
            "Discarding incomplete value for log ids {:?} at tick {}",
            self.log_ids,
            tick
        );
        stats.incomplete += 1;
    }

    fn assemble(&self, tick: u64, slots: Vec<Option<[u8; LOG_RECORD_PAYLOAD]>>) -> Assembled {
        Assembled {
            first_log_id: self.first_log_id(),
            tick,
            bytes: slots.into_iter().flatten().flatten().collect(),
        }
    }
}

/// Reassembles a readout stream for a set of log subscriptions
#[derive(Debug, Clone)]
pub struct LogReassembler {
    config: LogConfig,
    groups: Vec<GroupAssembler>,
    /// Log id to (group, slot)
    owners: HashMap<u8, (usize, usize)>,
    stats: ReassemblyStats,
}

impl LogReassembler {
    pub fn new(config: LogConfig, log_sets: Vec<Vec<u8>>) -> Self {
        let mut owners = HashMap::new();
        let mut groups = Vec::with_capacity(log_sets.len());
        for ids in log_sets {
            let group = groups.len();
            for (slot, id) in ids.iter().enumerate() {
                owners.insert(*id, (group, slot));
            }
            groups.push(GroupAssembler::new(ids));
        }
        Self {
            config,
            groups,
            owners,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Accept one `[log id][tick u16][payload]` record
    pub fn push(&mut self, log_id: u8, tick: u16, payload: [u8; LOG_RECORD_PAYLOAD]) -> Vec<Assembled> {
        self.stats.records += 1;
        let Some(&(group, slot)) = self.owners.get(&log_id) else {
            tracing::debug!("Record for unknown log id {} dropped", log_id);
            self.stats.unknown += 1;
            return Vec::new();
        };

        let assembler = &mut self.groups[group];
        let extended = match assembler.extend(tick, self.config.reorder_window) {
            TickClass::Current(t) => t,
            TickClass::Late(t) => {
                self.stats.late += 1;
                t
            }
            TickClass::Corrupt => {
                tracing::warn!("Dropping record for log id {} with implausible tick {}", log_id, tick);
                self.stats.corrupt += 1;
                return Vec::new();
            }
        };

        assembler.insert(slot, extended, payload, &mut self.stats);
        assembler.drain(&self.config, &mut self.stats)
    }

    /// Parse a readout notification payload into records and push each
    pub fn push_packet(&mut self, payload: &[u8]) -> Vec<Assembled> {
        let record_size = 1 + 2 + LOG_RECORD_PAYLOAD;
        let mut out = Vec::new();
        for record in payload.chunks_exact(record_size) {
            let tick = u16::from_le_bytes([record[1], record[2]]);
            let mut data = [0u8; LOG_RECORD_PAYLOAD];
            data.copy_from_slice(&record[3..record_size]);
            out.extend(self.push(record[0], tick, data));
        }
        let trailing = payload.len() % record_size;
        if trailing != 0 {
            tracing::debug!("Ignoring {} trailing byte(s) in readout packet", trailing);
        }
        out
    }

    /// End of readout: release everything complete, in tick order per group
    pub fn flush(&mut self) -> Vec<Assembled> {
        let mut out = Vec::new();
        for group in &mut self.groups {
            out.extend(group.flush(&mut self.stats));
        }
        out
    }
}
