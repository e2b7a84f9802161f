//! Connection tracking for stateful prerouting admission
//!
//! Tracks TCP, UDP and ICMP echo flows passively and decides which packets
//! may cross an interface: a packet that belongs to no tracked flow and
//! does not open one is dropped.

mod clock;
mod entry;
mod handle;
mod key;
pub mod snapshot;
mod state;
mod table;

pub use clock::Timestamp;
pub use entry::{Counters, EntryRef, EntryView, FlowEntry};
pub use handle::TableHandle;
pub use key::{Direction, FlowKey};
pub use state::{advance, advance_datagram, CtState, Transition, Verdict};
pub use table::{ConnTrackTable, ConnTrackTimeouts, TableConfig, TableStats};
