//! Transfer error types

use thiserror::Error;

/// Errors surfaced by the snapshot transfer service
#[derive(Debug, Error)]
pub enum RsyncError {
    /// File or socket operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or payload; the connection is closed
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote reported an error for this request
    #[error("not found: {0}")]
    NotFound(String),

    /// No response arrived in time (the primary drops requests while a
    /// background save runs; callers retry)
    #[error("timed out waiting for response")]
    Timeout,

    /// The advertised snapshot changed mid-transfer
    #[error("snapshot changed during transfer of {0}")]
    SnapshotChanged(String),

    /// Assembled file does not match the reported digest
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),
}

pub type RsyncResult<T> = Result<T, RsyncError>;
