//! ctrack - Connection tracking for an IPv4 forwarding path
//!
//! Observes TCP, UDP and ICMP echo traffic at prerouting, keeps per-flow
//! state and decides which packets may cross an interface. Tables can be
//! snapshotted, swapped per interface while traffic flows and restored later.

pub mod capture;
pub mod config;
pub mod conntrack;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
