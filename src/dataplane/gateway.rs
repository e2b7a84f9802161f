//! Per-interface conntrack wiring
//!
//! The gateway owns one prerouting hook per interface and groups interfaces
//! into zones. Every interface of a zone starts out pointing at the zone's
//! table; administrative operations can later redirect any subset of
//! interfaces to another table.

use super::prerouting::{Prerouting, UnclassifiedPolicy};
use crate::config::Config;
use crate::conntrack::{ConnTrackTable, TableConfig, TableHandle, Timestamp, Verdict};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval};
use tracing::{debug, info};

/// Default pause between aging passes
const AGING_INTERVAL_SECS: u64 = 5;

/// Interfaces and their conntrack tables
#[derive(Debug)]
pub struct Gateway {
    /// Hooks indexed by interface name
    hooks: BTreeMap<String, Prerouting>,
    /// Zone name -> member interfaces
    zones: BTreeMap<String, Vec<String>>,
    /// Policy for tables this gateway creates
    table_config: TableConfig,
    policy: UnclassifiedPolicy,
    aging_every: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl Gateway {
    pub fn new(table_config: TableConfig, policy: UnclassifiedPolicy) -> Self {
        Self {
            hooks: BTreeMap::new(),
            zones: BTreeMap::new(),
            table_config,
            policy,
            aging_every: Duration::from_secs(AGING_INTERVAL_SECS),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Build hooks for every configured interface; one table per zone
    pub fn from_config(config: &Config) -> Result<Self> {
        if let Some(name) = config.zone_name_clashes().first() {
            return Err(Error::Config(format!(
                "interface {} has no zone but zone {} is declared",
                name, name
            )));
        }

        let mut gateway = Self::new(config.conntrack.table_config(), config.conntrack.unclassified);
        gateway.aging_every = config.conntrack.eviction_interval();

        for (zone, members) in config.zones() {
            let table = gateway.new_table();
            for iface in members {
                gateway.attach(iface, zone.name(), table.clone())?;
            }
        }

        info!(
            "Gateway ready: {} interfaces in {} zones",
            gateway.hooks.len(),
            gateway.zones.len()
        );
        Ok(gateway)
    }

    /// Empty table sized like the ones this gateway creates
    pub fn new_table(&self) -> Arc<ConnTrackTable> {
        Arc::new(ConnTrackTable::with_config(self.table_config.clone()))
    }

    /// Add an interface in a zone of its own, tracking against `table`
    ///
    /// Pass the same `table` to several interfaces to share state between
    /// them.
    pub fn add_interface(&mut self, name: &str, table: Arc<ConnTrackTable>) -> Result<()> {
        if self.zones.contains_key(name) {
            return Err(Error::Config(format!("zone {} already exists", name)));
        }
        self.attach(name, name, table)
    }

    fn attach(&mut self, name: &str, zone: &str, table: Arc<ConnTrackTable>) -> Result<()> {
        if self.hooks.contains_key(name) {
            return Err(Error::Config(format!(
                "interface {} is already registered",
                name
            )));
        }

        let stats = self.metrics.register_interface(name);
        let handle = Arc::new(TableHandle::new(table));
        self.hooks.insert(
            name.to_string(),
            Prerouting::new(name, handle, stats, self.policy),
        );
        self.zones
            .entry(zone.to_string())
            .or_default()
            .push(name.to_string());

        debug!("Added interface {} (zone {})", name, zone);
        Ok(())
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.hooks.keys().cloned().collect()
    }

    /// Prerouting hook of an interface
    pub fn hook(&self, iface: &str) -> Result<&Prerouting> {
        self.hooks
            .get(iface)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: iface.to_string(),
            })
    }

    pub fn handle(&self, iface: &str) -> Result<Arc<TableHandle>> {
        self.hook(iface).map(|h| h.handle().clone())
    }

    /// Table currently in effect on an interface
    pub fn table(&self, iface: &str) -> Result<Arc<ConnTrackTable>> {
        self.hook(iface).map(|h| h.handle().get())
    }

    /// Classify an IPv4 packet received on `iface`
    pub fn process_packet(&self, iface: &str, packet: &[u8]) -> Result<Verdict> {
        self.process_packet_at(iface, packet, Timestamp::now())
    }

    pub fn process_packet_at(&self, iface: &str, packet: &[u8], now: Timestamp) -> Result<Verdict> {
        Ok(self.hook(iface)?.inspect(packet, now))
    }

    /// Account an IPv4 packet of `wire_len` bytes that was captured only in part
    pub fn process_truncated(&self, iface: &str, wire_len: usize) -> Result<Verdict> {
        Ok(self.hook(iface)?.inspect_truncated(wire_len))
    }

    /// Point every interface in `ifaces` at `table`
    ///
    /// All names are checked before any handle changes. Returns the
    /// displaced tables in the order of `ifaces`; interfaces that shared a
    /// table hand back clones of the same `Arc`.
    pub fn swap_tables(
        &self,
        ifaces: &[&str],
        table: Arc<ConnTrackTable>,
    ) -> Result<Vec<Arc<ConnTrackTable>>> {
        let hooks = ifaces
            .iter()
            .map(|name| self.hook(name))
            .collect::<Result<Vec<_>>>()?;

        let displaced: Vec<_> = hooks
            .iter()
            .map(|hook| hook.handle().set(table.clone()))
            .collect();

        info!(
            "Swapped conntrack table on {} ({} entries now in effect)",
            ifaces.join(", "),
            table.size()
        );
        Ok(displaced)
    }

    /// Serialize the table in effect on `iface`
    pub fn snapshot(&self, iface: &str) -> Result<Vec<u8>> {
        let table = self.table(iface)?;
        let bytes = table.snapshot();
        info!(
            "Snapshot of {}: {} flows, {} bytes",
            iface,
            table.size(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Load a snapshot into the table in effect on `iface`
    ///
    /// Returns the number of flows added. Flows the live table already
    /// tracks are kept.
    pub fn restore(&self, iface: &str, bytes: &[u8]) -> Result<usize> {
        let table = self.table(iface)?;
        let added = table.merge_snapshot(bytes)?;
        info!("Restored {} flows into the table of {}", added, iface);
        Ok(added)
    }

    /// Age every table in effect once, however many interfaces share it
    pub fn run_aging(&self, now: Timestamp) -> usize {
        let mut seen = HashSet::new();
        let mut evicted = 0;
        for hook in self.hooks.values() {
            let table = hook.handle().get();
            if seen.insert(Arc::as_ptr(&table)) {
                evicted += table.evict_expired(now);
            }
        }
        if evicted > 0 {
            debug!("Aging pass evicted {} flows", evicted);
        }
        evicted
    }

    /// Create an aging timer interval
    pub fn aging_interval(&self) -> Interval {
        interval(self.aging_every)
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Interface counters plus `conntrack.<zone>.*`
    ///
    /// Zone counters sum every distinct table the zone's interfaces
    /// currently use; `tables` tells how many that is.
    pub fn export_metrics(&self) -> Vec<(String, u64)> {
        let mut out = self.metrics.export();
        for (zone, members) in &self.zones {
            let mut seen = HashSet::new();
            let mut totals = [0u64; 5];
            for hook in members.iter().filter_map(|m| self.hooks.get(m)) {
                let table = hook.handle().get();
                if !seen.insert(Arc::as_ptr(&table)) {
                    continue;
                }
                let stats = table.stats();
                for (total, value) in totals.iter_mut().zip([
                    stats.created.get(),
                    stats.dropped.get(),
                    stats.evicted.get(),
                    stats.refused.get(),
                    table.size() as u64,
                ]) {
                    *total += value;
                }
            }

            let names = ["connections_total", "dropped", "evicted", "refused", "entries"];
            for (name, value) in names.iter().zip(totals) {
                out.push((format!("conntrack.{}.{}", zone, name), value));
            }
            out.push((format!("conntrack.{}.tables", zone), seen.len() as u64));
        }
        out
    }
}
