//! Compaction filters for list records
//!
//! Two filters run during background compaction:
//! - the meta filter drops list headers that are empty or past their ttl
//! - the data filter drops elements whose header is gone, expired, or has
//!   moved to a newer generation
//!
//! The engine emits keys in sorted order, so consecutive data records for
//! one user key share a single meta lookup through a one-entry cache. Meta
//! reads are bounded by the number of distinct keys in the compaction.

use std::ffi::CStr;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rocksdb::compaction_filter::{CompactionFilter, Decision};
use rocksdb::compaction_filter_factory::{CompactionFilterContext, CompactionFilterFactory};
use rocksdb::DB;

use crate::codec::{parse_data_key, unix_now, MetaValue};
use crate::error::StorageResult;
use crate::lists::META_CF;

/// Whether a meta record should be dropped: the list is empty, or its
/// deadline has passed. Unparseable values are kept.
pub fn meta_should_drop(value: &[u8], now: i64) -> bool {
    match MetaValue::parse(value) {
        Ok(meta) => meta.is_empty() || meta.is_expired(now),
        Err(_) => false,
    }
}

/// Point lookup into the meta column family
pub trait MetaLookup {
    fn meta(&self, user_key: &[u8]) -> StorageResult<Option<Vec<u8>>>;
}

/// Meta state cached for the most recent user key
#[derive(Debug, Clone)]
enum CachedMeta {
    Missing,
    Corrupt,
    Live { version: i32, ttl: i64 },
}

/// Decision logic of the data filter, generic over the meta source so it
/// can run against a live database or a table fixture.
pub struct ListsDataFilter<L> {
    lookup: L,
    cached_key: Option<Vec<u8>>,
    cached_meta: CachedMeta,
}

impl<L: MetaLookup> ListsDataFilter<L> {
    pub fn new(lookup: L) -> Self {
        Self {
            lookup,
            cached_key: None,
            cached_meta: CachedMeta::Missing,
        }
    }

    /// Whether a data record should be dropped at time `now`
    pub fn should_drop(&mut self, data_key: &[u8], now: i64) -> bool {
        let (user_key, version, _index) = match parse_data_key(data_key) {
            Ok(parts) => parts,
            Err(_) => return true,
        };

        let cached = matches!(&self.cached_key, Some(k) if k.as_slice() == user_key);
        if !cached {
            // Engine errors read as an absent meta; the compaction is
            // idempotent and a later pass sees the real state.
            self.cached_meta = match self.lookup.meta(user_key).unwrap_or(None) {
                None => CachedMeta::Missing,
                Some(bytes) => match MetaValue::parse(&bytes) {
                    Ok(meta) => CachedMeta::Live {
                        version: meta.version,
                        ttl: meta.ttl,
                    },
                    Err(_) => CachedMeta::Corrupt,
                },
            };
            self.cached_key = Some(user_key.to_vec());
        }

        match self.cached_meta {
            CachedMeta::Missing => true,
            CachedMeta::Corrupt => false,
            CachedMeta::Live { version: meta_version, ttl } => {
                if ttl != 0 && ttl < now {
                    return true;
                }
                version < meta_version
            }
        }
    }
}

/// Database handle armed after the engine opens. The factory is installed
/// into the column family options before the database exists, so the slot
/// is filled in later; an unarmed or dead handle reads as an absent meta.
pub type SharedDb = Arc<RwLock<Weak<DB>>>;

/// Meta lookups against the live meta column family
pub struct DbMetaLookup {
    db: SharedDb,
}

impl DbMetaLookup {
    /// Lookup bound to an already-open database
    pub fn new(db: &Arc<DB>) -> Self {
        Self {
            db: Arc::new(RwLock::new(Arc::downgrade(db))),
        }
    }

    fn shared(db: SharedDb) -> Self {
        Self { db }
    }
}

impl MetaLookup for DbMetaLookup {
    fn meta(&self, user_key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let Some(db) = self.db.read().upgrade() else {
            return Ok(None);
        };
        let Some(cf) = db.cf_handle(META_CF) else {
            return Ok(None);
        };
        Ok(db.get_cf(cf, user_key)?)
    }
}

/// Compaction filter over the meta column family
pub struct ListsMetaCompactionFilter;

impl CompactionFilter for ListsMetaCompactionFilter {
    fn filter(&mut self, _level: u32, _key: &[u8], value: &[u8]) -> Decision {
        if meta_should_drop(value, unix_now()) {
            Decision::Remove
        } else {
            Decision::Keep
        }
    }

    fn name(&self) -> &CStr {
        c"redrock.lists-meta-filter"
    }
}

/// Factory handing the engine one meta filter per compaction job
pub struct ListsMetaFilterFactory;

impl CompactionFilterFactory for ListsMetaFilterFactory {
    type Filter = ListsMetaCompactionFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        ListsMetaCompactionFilter
    }

    fn name(&self) -> &CStr {
        c"redrock.lists-meta-filter-factory"
    }
}

/// Compaction filter over the data column family
pub struct ListsDataCompactionFilter {
    inner: ListsDataFilter<DbMetaLookup>,
}

impl CompactionFilter for ListsDataCompactionFilter {
    fn filter(&mut self, _level: u32, key: &[u8], _value: &[u8]) -> Decision {
        if self.inner.should_drop(key, unix_now()) {
            Decision::Remove
        } else {
            Decision::Keep
        }
    }

    fn name(&self) -> &CStr {
        c"redrock.lists-data-filter"
    }
}

/// Factory for data filters. Each compaction job gets a fresh filter with
/// an empty key cache.
pub struct ListsDataFilterFactory {
    db: SharedDb,
}

impl ListsDataFilterFactory {
    /// Returns the factory and the handle through which the opened
    /// database is armed.
    pub fn new() -> (Self, SharedDb) {
        let db: SharedDb = Arc::new(RwLock::new(Weak::new()));
        (Self { db: db.clone() }, db)
    }
}

impl CompactionFilterFactory for ListsDataFilterFactory {
    type Filter = ListsDataCompactionFilter;

    fn create(&mut self, _context: CompactionFilterContext) -> Self::Filter {
        ListsDataCompactionFilter {
            inner: ListsDataFilter::new(DbMetaLookup::shared(self.db.clone())),
        }
    }

    fn name(&self) -> &CStr {
        c"redrock.lists-data-filter-factory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_data_key, ListMeta};
    use std::cell::Cell;
    use std::collections::HashMap;

    struct MapLookup {
        metas: HashMap<Vec<u8>, Vec<u8>>,
        lookups: Cell<usize>,
    }

    impl MapLookup {
        fn new() -> Self {
            Self {
                metas: HashMap::new(),
                lookups: Cell::new(0),
            }
        }

        fn insert(&mut self, key: &[u8], meta: &ListMeta) {
            self.metas.insert(key.to_vec(), meta.encode());
        }
    }

    impl MetaLookup for &MapLookup {
        fn meta(&self, user_key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(self.metas.get(user_key).cloned())
        }
    }

    fn meta(size: u64, version: i32, ttl: i64) -> ListMeta {
        ListMeta {
            size,
            version,
            ttl,
            ..ListMeta::new()
        }
    }

    #[test]
    fn test_meta_filter_drops_empty_list() {
        let value = meta(0, 1, 0).encode();
        assert!(meta_should_drop(&value, 1_000_000));
    }

    #[test]
    fn test_meta_filter_keeps_live_list() {
        let value = meta(1, 7, 0).encode();
        assert!(!meta_should_drop(&value, 1_000_000));
    }

    #[test]
    fn test_meta_filter_respects_deadline() {
        let pending = meta(1, 3, 2_000_000).encode();
        assert!(!meta_should_drop(&pending, 1_000_000));

        let expired = meta(1, 3, 500_000).encode();
        assert!(meta_should_drop(&expired, 1_000_000));
    }

    #[test]
    fn test_meta_filter_keeps_unparseable_value() {
        assert!(!meta_should_drop(&[1, 2, 3], 1_000_000));
    }

    #[test]
    fn test_data_filter_drops_orphaned_record() {
        let lookup = MapLookup::new();
        let mut filter = ListsDataFilter::new(&lookup);
        let key = encode_data_key(b"gone", 5, 1);
        assert!(filter.should_drop(&key, 1_000_000));
    }

    #[test]
    fn test_data_filter_version_decision() {
        let mut lookup = MapLookup::new();
        lookup.insert(b"k", &meta(1, 9, 0));
        let mut filter = ListsDataFilter::new(&lookup);

        let stale = encode_data_key(b"k", 8, 1);
        assert!(filter.should_drop(&stale, 1_000_000));

        let current = encode_data_key(b"k", 9, 1);
        assert!(!filter.should_drop(&current, 1_000_000));

        // a record from a future generation is never stale
        let newer = encode_data_key(b"k", 10, 1);
        assert!(!filter.should_drop(&newer, 1_000_000));
    }

    #[test]
    fn test_data_filter_respects_meta_deadline() {
        let mut lookup = MapLookup::new();
        lookup.insert(b"k", &meta(1, 3, 2_000_000));
        let mut filter = ListsDataFilter::new(&lookup);
        let key = encode_data_key(b"k", 3, 1);
        assert!(!filter.should_drop(&key, 1_000_000));

        let mut lookup = MapLookup::new();
        lookup.insert(b"k", &meta(1, 3, 500_000));
        let mut filter = ListsDataFilter::new(&lookup);
        assert!(filter.should_drop(&key, 1_000_000));
    }

    #[test]
    fn test_data_filter_drops_unparseable_key() {
        let lookup = MapLookup::new();
        let mut filter = ListsDataFilter::new(&lookup);
        assert!(filter.should_drop(&[0u8; 5], 1_000_000));
    }

    #[test]
    fn test_data_filter_keeps_record_under_corrupt_meta() {
        let mut lookup = MapLookup::new();
        lookup.metas.insert(b"k".to_vec(), vec![0u8; 3]);
        let mut filter = ListsDataFilter::new(&lookup);
        let key = encode_data_key(b"k", 1, 1);
        assert!(!filter.should_drop(&key, 1_000_000));
    }

    #[test]
    fn test_data_filter_caches_consecutive_lookups() {
        let mut lookup = MapLookup::new();
        lookup.insert(b"a", &meta(2, 4, 0));
        lookup.insert(b"b", &meta(1, 4, 0));
        let mut filter = ListsDataFilter::new(&lookup);

        assert!(!filter.should_drop(&encode_data_key(b"a", 4, 1), 1_000_000));
        assert!(!filter.should_drop(&encode_data_key(b"a", 4, 2), 1_000_000));
        assert!(filter.should_drop(&encode_data_key(b"a", 3, 7), 1_000_000));
        assert_eq!(lookup.lookups.get(), 1);

        assert!(!filter.should_drop(&encode_data_key(b"b", 4, 1), 1_000_000));
        assert_eq!(lookup.lookups.get(), 2);
    }

    #[test]
    fn test_data_filter_caches_missing_meta() {
        let lookup = MapLookup::new();
        let mut filter = ListsDataFilter::new(&lookup);
        assert!(filter.should_drop(&encode_data_key(b"x", 1, 1), 1_000_000));
        assert!(filter.should_drop(&encode_data_key(b"x", 1, 2), 1_000_000));
        assert_eq!(lookup.lookups.get(), 1);
    }
}
