//! Data plane components
//!
//! Handles packet admission: per-interface prerouting hooks and the gateway
//! that wires them to conntrack tables.

mod gateway;
mod prerouting;

pub use gateway::Gateway;
pub use prerouting::{Prerouting, Segment, UnclassifiedPolicy};
