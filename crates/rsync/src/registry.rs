//! Handles through which the server observes partitions
//!
//! The server is constructed with an explicit registry rather than a
//! process-wide singleton; the node crate provides the implementation
//! backed by its slots.

use std::path::PathBuf;
use std::sync::Arc;

/// Listing of one snapshot: the files to ship and the uuid binding a
/// transfer to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpMeta {
    pub snapshot_uuid: String,
    pub filenames: Vec<String>,
}

/// Server-facing view of one partition
pub trait SlotView: Send + Sync {
    /// True while a background save is producing a new snapshot
    fn is_bg_saving(&self) -> bool;

    /// Current snapshot listing, if a dump exists
    fn dump_meta(&self) -> Option<DumpMeta>;

    /// Uuid of the current snapshot
    fn dump_uuid(&self) -> Option<String>;

    /// Directory holding the snapshot files
    fn dump_dir(&self) -> Option<PathBuf>;
}

/// Partition lookup by `(db_name, slot_id)`
pub trait SlotRegistry: Send + Sync {
    fn slot(&self, db_name: &str, slot_id: u32) -> Option<Arc<dyn SlotView>>;
}
