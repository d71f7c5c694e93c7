//! Persistent list storage for RedRock
//!
//! Maps Redis lists onto RocksDB with a versioned two-column-family
//! layout: the default family holds per-key meta records, `data_cf` holds
//! the elements. Expired and superseded records are reclaimed in place by
//! compaction filters. Slots wrap one database each and produce the
//! checkpoint dumps the rsync service ships to replicas.

pub mod codec;
pub mod error;
pub mod filter;
pub mod lists;
pub mod slot;

pub use codec::{encode_data_key, parse_data_key, ListMeta, MetaValue};
pub use error::{StorageError, StorageResult};
pub use lists::{ListStorage, DATA_CF, META_CF};
pub use slot::{DumpInfo, Slot, DUMP_UUID_FILE};
