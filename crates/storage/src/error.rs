//! Storage error types

use thiserror::Error;

/// Errors surfaced by the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// A meta or data record failed to parse
    #[error("corrupt record: {0}")]
    CorruptRecord(&'static str),

    /// Filesystem error while dumping or listing snapshots
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the underlying engine
    #[error("engine error: {0}")]
    Engine(#[from] rocksdb::Error),

    /// A required column family is missing from the open database
    #[error("column family {0} not found")]
    MissingColumnFamily(&'static str),

    /// A background save is already running for this slot
    #[error("background save in progress")]
    SnapshotBusy,
}

pub type StorageResult<T> = Result<T, StorageError>;
