//! Swappable reference to the table in effect for an interface
//!
//! A handle never owns flows itself; it names a table. Several handles may
//! name the same table (interfaces sharing conntrack state), and `set`
//! redirects one handle atomically. Packets that already resolved the old
//! table finish against it, since they hold their own `Arc`.
//!
//! The displaced table is handed back to the caller of `set`. Whoever
//! intends to put it back later keeps that `Arc`; nothing else keeps it
//! alive.

use super::table::ConnTrackTable;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct TableHandle {
    current: ArcSwap<ConnTrackTable>,
}

impl TableHandle {
    pub fn new(table: Arc<ConnTrackTable>) -> Self {
        Self {
            current: ArcSwap::new(table),
        }
    }

    /// Table currently in effect
    pub fn get(&self) -> Arc<ConnTrackTable> {
        self.current.load_full()
    }

    /// Point this handle at `table`, returning the table it replaced
    pub fn set(&self, table: Arc<ConnTrackTable>) -> Arc<ConnTrackTable> {
        let old = self.current.swap(table);
        debug!(
            "conntrack: handle switched table ({} entries out, {} in)",
            old.size(),
            self.current.load().size()
        );
        old
    }

    /// Whether this handle currently names `table`
    pub fn points_to(&self, table: &Arc<ConnTrackTable>) -> bool {
        Arc::ptr_eq(&self.current.load(), table)
    }

    /// Whether both handles currently name the same table
    pub fn shares_table_with(&self, other: &TableHandle) -> bool {
        Arc::ptr_eq(&self.current.load(), &other.current.load())
    }
}

impl Default for TableHandle {
    fn default() -> Self {
        Self::new(Arc::new(ConnTrackTable::new()))
    }
}
