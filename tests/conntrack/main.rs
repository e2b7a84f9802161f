//! Conntrack tests driven through the public API
//!
//! Topology:
//! ```text
//!   client 10.0.2.10 -- eth0 -- gateway -- eth1 -- server 10.0.1.10:6666
//! ```
//! eth0 and eth1 share one tracking table unless a test swaps it.

mod eviction;
mod hotswap;
mod lab;
mod scenario;
