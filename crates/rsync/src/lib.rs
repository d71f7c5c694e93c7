//! Snapshot transfer for RedRock
//!
//! A chunked, checksummed request/response protocol that ships a
//! consistent on-disk snapshot of a partition from a primary to a replica:
//! length-prefixed frames on TCP, a bounded worker pool behind the
//! connection I/O, positioned file reads capped at 1 MiB per chunk, and an
//! MD5 digest delivered with the final chunk of each file.

pub mod client;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod server;

pub use client::{FileChunk, RsyncClient};
pub use error::{RsyncError, RsyncResult};
pub use registry::{DumpMeta, SlotRegistry, SlotView};
pub use server::{RsyncServer, RsyncServerHandle, RsyncServerOptions};
