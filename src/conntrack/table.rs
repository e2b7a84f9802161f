//! Connection tracking table
//!
//! Flows live in a sharded [`DashMap`] keyed by the canonical flow key, so
//! request and response packets resolve to one entry and operations on
//! different keys rarely contend. Same-key creation is serialized by the
//! shard lock: one caller creates, the others observe its entry.
//!
//! Administrative work (eviction, flush, snapshot, restore) is serialized
//! per table by an internal mutex and never holds a shard lock for longer
//! than one entry.

use super::clock::Timestamp;
use super::entry::{EntryRef, EntryView, FlowEntry};
use super::key::FlowKey;
use super::snapshot;
use super::state::CtState;
use crate::protocol::ipv4::{PROTO_ICMP, PROTO_UDP};
use crate::telemetry::Counter;
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout configuration for connection tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnTrackTimeouts {
    /// Handshake and teardown states (default: 4 minutes)
    pub syn: Duration,
    /// Established connections (default: 2 hours)
    pub established: Duration,
    /// Grace window for CLOSED entries (default: 10 seconds)
    pub closed_grace: Duration,
    /// Idle UDP flows (default: 5 minutes)
    pub udp: Duration,
    /// Idle ICMP echo flows (default: 1 minute)
    pub icmp: Duration,
}

impl Default for ConnTrackTimeouts {
    fn default() -> Self {
        Self {
            syn: Duration::from_secs(240),
            established: Duration::from_secs(7200),
            closed_grace: Duration::from_secs(10),
            udp: Duration::from_secs(300),
            icmp: Duration::from_secs(60),
        }
    }
}

impl ConnTrackTimeouts {
    /// Idle time after which a flow of `protocol` in `state` may be evicted
    pub fn for_flow(&self, protocol: u8, state: CtState) -> Duration {
        match (protocol, state) {
            (PROTO_UDP, _) => self.udp,
            (PROTO_ICMP, _) => self.icmp,
            (_, CtState::Established) => self.established,
            (_, CtState::Closed) => self.closed_grace,
            _ => self.syn,
        }
    }
}

/// Table sizing and aging policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Maximum number of live entries; new flows beyond it are refused
    pub max_entries: usize,
    pub timeouts: ConnTrackTimeouts,
    /// Maximum evictions per [`ConnTrackTable::evict_expired`] call, 0 = unbounded
    pub eviction_batch: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_entries: 65536,
            timeouts: ConnTrackTimeouts::default(),
            eviction_batch: 4096,
        }
    }
}

/// Table-level diagnostics counters
#[derive(Debug, Default)]
pub struct TableStats {
    /// Flows created (connections seen)
    pub created: Counter,
    /// Packets dropped by the admission policy
    pub dropped: Counter,
    /// Entries removed by aging or RST
    pub evicted: Counter,
    /// New flows refused because the table was full
    pub refused: Counter,
}

/// Connection tracking table
#[derive(Debug)]
pub struct ConnTrackTable {
    /// Canonical key -> entry
    entries: DashMap<FlowKey, EntryRef>,
    /// Live entry count, kept apart from the map so capacity checks never
    /// need every shard lock
    live: AtomicUsize,
    config: TableConfig,
    stats: TableStats,
    admin: Mutex<()>,
}

impl ConnTrackTable {
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self {
            entries: DashMap::new(),
            live: AtomicUsize::new(0),
            config,
            stats: TableStats::default(),
            admin: Mutex::new(()),
        }
    }

    /// Rebuild a table from a snapshot produced by [`ConnTrackTable::snapshot`]
    pub fn restore(bytes: &[u8], config: TableConfig) -> Result<Self> {
        snapshot::deserialize(bytes, config)
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    /// Number of live entries
    pub fn size(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Packets dropped by the admission policy so far
    pub fn drop_counter(&self) -> u64 {
        self.stats.dropped.get()
    }

    pub(crate) fn note_drop(&self) {
        self.stats.dropped.inc();
    }

    /// Lookup in either orientation
    pub fn lookup(&self, key: &FlowKey) -> Option<EntryRef> {
        self.entries
            .get(&key.canonical())
            .map(|e| Arc::clone(e.value()))
    }

    /// Get the entry for `key`, creating a NONE-state entry originated by
    /// `key.src` when absent
    pub fn lookup_or_create(&self, key: &FlowKey, now: Timestamp) -> Result<(EntryRef, bool)> {
        match self.entries.entry(key.canonical()) {
            Entry::Occupied(slot) => Ok((Arc::clone(slot.get()), false)),
            Entry::Vacant(slot) => {
                self.reserve_slot()?;
                let entry = Arc::new(FlowEntry::new(*key, now));
                slot.insert(Arc::clone(&entry));
                self.stats.created.inc();
                debug!("conntrack: new flow {}", key);
                Ok((entry, true))
            }
        }
    }

    /// Replace a CLOSED entry with a fresh one originated by `key.src`
    ///
    /// A closed flow is never resurrected in place; a new connection on the
    /// same tuple starts from scratch with zeroed counters. If the entry is
    /// no longer CLOSED (another packet already reopened it) the current
    /// entry is returned unchanged.
    pub fn reopen(&self, key: &FlowKey, now: Timestamp) -> Result<EntryRef> {
        match self.entries.entry(key.canonical()) {
            Entry::Occupied(mut slot) => {
                if slot.get().state() != CtState::Closed {
                    return Ok(Arc::clone(slot.get()));
                }
                let entry = Arc::new(FlowEntry::new(*key, now));
                slot.insert(Arc::clone(&entry));
                self.stats.created.inc();
                debug!("conntrack: reopened closed flow {}", key);
                Ok(entry)
            }
            Entry::Vacant(slot) => {
                self.reserve_slot()?;
                let entry = Arc::new(FlowEntry::new(*key, now));
                slot.insert(Arc::clone(&entry));
                self.stats.created.inc();
                Ok(entry)
            }
        }
    }

    /// Remove the flow for `key`; no-op if absent
    pub fn remove(&self, key: &FlowKey) -> Option<EntryRef> {
        let (_, entry) = self.entries.remove(&key.canonical())?;
        self.live.fetch_sub(1, Ordering::AcqRel);
        Some(entry)
    }

    /// Remove `entry` only if it is still the one stored for its flow
    pub(crate) fn remove_entry(&self, entry: &EntryRef) -> bool {
        let removed = self
            .entries
            .remove_if(&entry.origin().canonical(), |_, current| {
                Arc::ptr_eq(current, entry)
            })
            .is_some();
        if removed {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Remove every entry, returning how many were removed
    pub fn flush(&self) -> usize {
        let _admin = self.admin();
        let mut removed = 0;
        self.entries.retain(|_, _| {
            removed += 1;
            false
        });
        self.live.fetch_sub(removed, Ordering::AcqRel);
        debug!("conntrack: flushed {} entries", removed);
        removed
    }

    /// Whether `entry` has been idle longer than its protocol and state allow
    pub fn is_expired(&self, entry: &FlowEntry, now: Timestamp) -> bool {
        let timeout = self
            .config
            .timeouts
            .for_flow(entry.origin().protocol, entry.state());
        now.saturating_since(entry.last_seen()) > timeout
    }

    /// Remove expired entries, at most `eviction_batch` per call
    ///
    /// Expiry is re-checked under the shard lock, so an entry refreshed by
    /// the packet path between the scan and the removal survives.
    pub fn evict_expired(&self, now: Timestamp) -> usize {
        let _admin = self.admin();
        let limit = match self.config.eviction_batch {
            0 => usize::MAX,
            n => n,
        };

        let candidates: Vec<FlowKey> = self
            .entries
            .iter()
            .filter(|e| self.is_expired(e.value(), now))
            .map(|e| *e.key())
            .take(limit)
            .collect();

        let mut evicted = 0;
        for key in candidates {
            if self
                .entries
                .remove_if(&key, |_, entry| self.is_expired(entry, now))
                .is_some()
            {
                self.live.fetch_sub(1, Ordering::AcqRel);
                self.stats.evicted.inc();
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!("conntrack: evicted {} expired entries", evicted);
        }
        evicted
    }

    /// Point-in-time copies of every entry
    pub fn entries(&self) -> Vec<EntryView> {
        self.entries.iter().map(|e| e.value().view()).collect()
    }

    /// Serialize every live entry
    ///
    /// Take the table out of service first if it must be consistent; the
    /// encoder does not coordinate with the packet path.
    pub fn snapshot(&self) -> Vec<u8> {
        let _admin = self.admin();
        snapshot::serialize(self)
    }

    /// Load a snapshot into this (possibly live) table
    ///
    /// Flows already present are kept as they are. The whole snapshot is
    /// validated before anything is inserted; on error the table is
    /// unchanged. Returns the number of flows added.
    pub fn merge_snapshot(&self, bytes: &[u8]) -> Result<usize> {
        let _admin = self.admin();
        let records = snapshot::decode(bytes)?;

        let fresh: Vec<&EntryView> = records
            .iter()
            .filter(|v| !self.entries.contains_key(&v.origin.canonical()))
            .collect();

        // The packet path keeps creating flows while we merge, so every slot
        // is reserved before the first insert.
        let limit = self.config.max_entries;
        let wanted = fresh.len();
        if self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n + wanted <= limit).then_some(n + wanted)
            })
            .is_err()
        {
            warn!(
                "conntrack: snapshot of {} flows does not fit ({} live, limit {})",
                wanted,
                self.size(),
                limit
            );
            return Err(Error::CapacityExceeded { limit });
        }

        let mut added = 0;
        for view in fresh {
            if let Entry::Vacant(slot) = self.entries.entry(view.origin.canonical()) {
                slot.insert(Arc::new(FlowEntry::restored(view.origin, view)));
                added += 1;
            }
        }
        // slots reserved for flows the packet path created first
        self.live.fetch_sub(wanted - added, Ordering::AcqRel);

        debug!("conntrack: merged {} flows from snapshot", added);
        Ok(added)
    }

    /// Insert a decoded entry into a table under construction
    pub(crate) fn insert_restored(&self, view: &EntryView) {
        let previous = self.entries.insert(
            view.origin.canonical(),
            Arc::new(FlowEntry::restored(view.origin, view)),
        );
        if previous.is_none() {
            self.live.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn reserve_slot(&self) -> Result<()> {
        let limit = self.config.max_entries;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                self.stats.refused.inc();
                Error::CapacityExceeded { limit }
            })
    }

    fn admin(&self) -> MutexGuard<'_, ()> {
        self.admin.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConnTrackTable {
    fn default() -> Self {
        Self::new()
    }
}
