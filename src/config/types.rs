//! Configuration types

use crate::conntrack::{ConnTrackTimeouts, TableConfig};
use crate::dataplane::UnclassifiedPolicy;
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub conntrack: ConntrackConfig,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceConfig {
    /// Interfaces in the same zone share one table; none = private table
    pub zone: Option<String>,
}

/// `[conntrack]` section; durations in seconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConntrackConfig {
    pub max_entries: usize,
    pub syn_timeout: u64,
    pub established_timeout: u64,
    pub closed_grace: u64,
    pub udp_timeout: u64,
    pub icmp_timeout: u64,
    pub eviction_interval: u64,
    pub eviction_batch: usize,
    pub unclassified: UnclassifiedPolicy,
}

impl Default for ConntrackConfig {
    fn default() -> Self {
        Self {
            max_entries: 65536,
            syn_timeout: 240,
            established_timeout: 7200,
            closed_grace: 10,
            udp_timeout: 300,
            icmp_timeout: 60,
            eviction_interval: 5,
            eviction_batch: 4096,
            unclassified: UnclassifiedPolicy::Accept,
        }
    }
}

impl ConntrackConfig {
    /// Sizing and aging policy for tables built from this section
    pub fn table_config(&self) -> TableConfig {
        TableConfig {
            max_entries: self.max_entries,
            timeouts: ConnTrackTimeouts {
                syn: Duration::from_secs(self.syn_timeout),
                established: Duration::from_secs(self.established_timeout),
                closed_grace: Duration::from_secs(self.closed_grace),
                udp: Duration::from_secs(self.udp_timeout),
                icmp: Duration::from_secs(self.icmp_timeout),
            },
            eviction_batch: self.eviction_batch,
        }
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval)
    }
}

/// Group of interfaces sharing one table
///
/// A private zone never merges with a declared zone of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Zone<'a> {
    /// Declared with `zone = "..."`
    Shared(&'a str),
    /// Interface without a `zone`, named after the interface
    Private(&'a str),
}

impl<'a> Zone<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Zone::Shared(name) | Zone::Private(name) => name,
        }
    }
}

impl fmt::Display for Zone<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Config {
    /// Zone of `iface`; interfaces without one form a zone of their own
    pub fn zone_of<'a>(&'a self, iface: &'a str) -> Zone<'a> {
        match self.interfaces.get(iface).and_then(|i| i.zone.as_deref()) {
            Some(zone) => Zone::Shared(zone),
            None => Zone::Private(iface),
        }
    }

    /// Zone -> member interfaces, both sorted
    pub fn zones(&self) -> BTreeMap<Zone<'_>, Vec<&str>> {
        let mut zones: BTreeMap<Zone<'_>, Vec<&str>> = BTreeMap::new();
        for name in self.interfaces.keys() {
            zones.entry(self.zone_of(name)).or_default().push(name);
        }
        zones
    }

    /// Interfaces without a zone whose name is also a declared zone
    pub fn zone_name_clashes(&self) -> Vec<&str> {
        let zones = self.zones();
        zones
            .keys()
            .filter_map(|zone| match zone {
                Zone::Private(name) if zones.contains_key(&Zone::Shared(*name)) => Some(*name),
                _ => None,
            })
            .collect()
    }
}
