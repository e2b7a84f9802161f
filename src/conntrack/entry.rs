//! Per-flow record
//!
//! Every mutable field is its own atomic: diagnostics may read an entry
//! while the packet path updates it, and each field is always observed
//! whole. `state` moves only through compare-exchange, so a reader sees
//! the last completed transition and never an intermediate value.

use super::clock::Timestamp;
use super::key::{Direction, FlowKey};
use super::state::{advance, advance_datagram, CtState, Transition};
use crate::protocol::ipv4::PROTO_TCP;
use crate::protocol::tcp::TcpFlags;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Shared reference to a table-owned entry
pub type EntryRef = Arc<FlowEntry>;

/// Packet/byte counters for one direction
#[derive(Debug, Default)]
struct DirectionCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
}

/// Plain copy of one direction's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub packets: u64,
    pub bytes: u64,
}

/// Connection entry
#[derive(Debug)]
pub struct FlowEntry {
    /// Key in the orientation of the initiator
    origin: FlowKey,
    state: AtomicU8,
    created: Timestamp,
    last_seen: AtomicU64,
    counters: [DirectionCounters; 2],
}

impl FlowEntry {
    /// Fresh NONE-state entry opened by `origin.src`
    pub fn new(origin: FlowKey, now: Timestamp) -> Self {
        Self {
            origin,
            state: AtomicU8::new(CtState::None.to_code()),
            created: now,
            last_seen: AtomicU64::new(now.as_millis()),
            counters: Default::default(),
        }
    }

    /// Rebuild an entry from a snapshot record
    pub(crate) fn restored(origin: FlowKey, view: &EntryView) -> Self {
        let entry = Self {
            origin,
            state: AtomicU8::new(view.state.to_code()),
            created: view.created,
            last_seen: AtomicU64::new(view.last_seen.as_millis()),
            counters: Default::default(),
        };
        for (dir, c) in [
            (Direction::Original, view.original),
            (Direction::Reply, view.reply),
        ] {
            let slot = &entry.counters[dir.index()];
            slot.packets.store(c.packets, Ordering::Relaxed);
            slot.bytes.store(c.bytes, Ordering::Relaxed);
        }
        entry
    }

    pub fn origin(&self) -> &FlowKey {
        &self.origin
    }

    pub fn state(&self) -> CtState {
        decode(self.state.load(Ordering::Acquire))
    }

    pub fn created(&self) -> Timestamp {
        self.created
    }

    pub fn last_seen(&self) -> Timestamp {
        Timestamp::from_millis(self.last_seen.load(Ordering::Relaxed))
    }

    /// Direction of a packet carrying `key`
    pub fn direction_of(&self, key: &FlowKey) -> Direction {
        if *key == self.origin {
            Direction::Original
        } else {
            Direction::Reply
        }
    }

    /// Apply one packet to the state
    ///
    /// `flags` only matter for TCP flows. The transition is computed from
    /// the state it replaces; if another thread moved the entry in the
    /// meantime the step is recomputed.
    pub fn advance(&self, flags: TcpFlags, direction: Direction) -> Transition {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let step = match self.origin.protocol {
                PROTO_TCP => advance(decode(current), flags, direction),
                _ => advance_datagram(decode(current), direction),
            };
            let next = step.state.to_code();
            if next == current {
                return step;
            }
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return step,
                Err(actual) => current = actual,
            }
        }
    }

    /// Account a packet and refresh `last_seen`
    pub fn record(&self, direction: Direction, bytes: usize, now: Timestamp) {
        let slot = &self.counters[direction.index()];
        slot.packets.fetch_add(1, Ordering::Relaxed);
        slot.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_seen.fetch_max(now.as_millis(), Ordering::Relaxed);
    }

    pub fn counters(&self, direction: Direction) -> Counters {
        let slot = &self.counters[direction.index()];
        Counters {
            packets: slot.packets.load(Ordering::Relaxed),
            bytes: slot.bytes.load(Ordering::Relaxed),
        }
    }

    /// Point-in-time copy for diagnostics and snapshots
    pub fn view(&self) -> EntryView {
        EntryView {
            origin: self.origin,
            state: self.state(),
            created: self.created,
            last_seen: self.last_seen(),
            original: self.counters(Direction::Original),
            reply: self.counters(Direction::Reply),
        }
    }
}

/// Snapshot of one entry's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryView {
    pub origin: FlowKey,
    pub state: CtState,
    pub created: Timestamp,
    pub last_seen: Timestamp,
    pub original: Counters,
    pub reply: Counters,
}

// Only codes written by `CtState::to_code` are ever stored.
fn decode(code: u8) -> CtState {
    CtState::from_code(code).unwrap_or(CtState::Closed)
}
