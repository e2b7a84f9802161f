//! Named counters for the prerouting path.
//!
//! Counters are plain atomics so the packet path never takes a lock; the
//! registry's map is only touched when an interface is registered or the
//! counters are exported.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-interface prerouting statistics.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    /// IPv4 packets seen at prerouting.
    pub rx_packets: Counter,
    /// IPv4 bytes seen at prerouting.
    pub rx_bytes: Counter,
    /// Packets admitted by conntrack.
    pub prerouting_accepted: Counter,
    /// Packets refused by conntrack.
    pub prerouting_dropped: Counter,
    /// Packets conntrack could not classify (fallback policy applied).
    pub unclassified: Counter,
    /// Frames larger than the capture buffer (also counted as unclassified).
    pub truncated: Counter,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a packet entering prerouting.
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    /// Exports counters as `<iface>.ip4.<name>` pairs.
    fn export_into(&self, iface: &str, out: &mut Vec<(String, u64)>) {
        for (name, counter) in [
            ("rx_packets", &self.rx_packets),
            ("rx_bytes", &self.rx_bytes),
            ("prerouting_accepted", &self.prerouting_accepted),
            ("prerouting_dropped", &self.prerouting_dropped),
            ("unclassified", &self.unclassified),
            ("truncated", &self.truncated),
        ] {
            out.push((format!("{}.ip4.{}", iface, name), counter.get()));
        }
    }
}

/// Registry of per-interface counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    interfaces: RwLock<BTreeMap<String, Arc<InterfaceStats>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interface, returning its stats block.
    ///
    /// Registering the same name twice returns the existing block.
    pub fn register_interface(&self, name: &str) -> Arc<InterfaceStats> {
        let mut interfaces = self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        interfaces.entry(name.to_string()).or_default().clone()
    }

    /// Stats block for a registered interface.
    pub fn interface(&self, name: &str) -> Option<Arc<InterfaceStats>> {
        self.interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Looks up a single counter by its exported name.
    pub fn get_by_name(&self, name: &str) -> Option<u64> {
        self.export()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Exports all counters as key-value pairs, sorted by interface.
    pub fn export(&self) -> Vec<(String, u64)> {
        let interfaces = self
            .interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut result = Vec::with_capacity(interfaces.len() * 6);
        for (name, stats) in interfaces.iter() {
            stats.export_into(name, &mut result);
        }
        result
    }
}
