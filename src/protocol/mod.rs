//! Wire formats the tracker reads
//!
//! Parsers are zero-copy views over captured bytes.

pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod udp;
