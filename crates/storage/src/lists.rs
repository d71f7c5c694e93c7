//! Two-column-family list storage on RocksDB
//!
//! The default family holds one meta record per list (size, version, ttl,
//! head/tail fence posts); `data_cf` holds one record per element keyed by
//! `{user_key}{version}{index}`. Logical clears only rewrite the meta
//! record with a bumped version; stale element records are reclaimed in
//! place by the compaction filters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rocksdb::checkpoint::Checkpoint;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use tracing::info;

use crate::codec::{encode_data_key, parse_data_key, unix_now, ListMeta};
use crate::error::{StorageError, StorageResult};
use crate::filter::{ListsDataFilterFactory, ListsMetaFilterFactory};

/// Column family holding meta records
pub const META_CF: &str = "default";
/// Column family holding element records
pub const DATA_CF: &str = "data_cf";

/// Persistent list storage for one slot
pub struct ListStorage {
    db: Arc<DB>,
    path: PathBuf,
    write_opts: WriteOptions,
}

impl ListStorage {
    /// Open (or create) the database at `path`.
    ///
    /// The database is first opened with the default family alone so the
    /// data family can be created, then re-opened listing
    /// `[default, data_cf]` with the compaction filters installed. The
    /// data filter needs the running database for meta lookups, so its
    /// factory is armed with the handle after the second open.
    pub fn open<P: AsRef<Path>>(path: P, write_buffer_size: usize) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let existing = DB::list_cf(&db_opts, &path).unwrap_or_default();
        if !existing.iter().any(|name| name == DATA_CF) {
            let mut db = DB::open(&db_opts, &path)?;
            db.create_cf(DATA_CF, &Options::default())?;
        }

        let mut meta_opts = Options::default();
        meta_opts.set_write_buffer_size(write_buffer_size);
        meta_opts.set_compaction_filter_factory(ListsMetaFilterFactory);

        let (data_factory, db_handle) = ListsDataFilterFactory::new();
        let mut data_opts = Options::default();
        data_opts.set_write_buffer_size(write_buffer_size);
        data_opts.set_compaction_filter_factory(data_factory);

        let descriptors = vec![
            ColumnFamilyDescriptor::new(META_CF, meta_opts),
            ColumnFamilyDescriptor::new(DATA_CF, data_opts),
        ];
        let db = Arc::new(DB::open_cf_descriptors(&db_opts, &path, descriptors)?);
        *db_handle.write() = Arc::downgrade(&db);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);

        info!("list storage opened at {}", path.display());

        Ok(Self {
            db,
            path,
            write_opts,
        })
    }

    /// Database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn meta_cf(&self) -> StorageResult<&ColumnFamily> {
        self.db
            .cf_handle(META_CF)
            .ok_or(StorageError::MissingColumnFamily(META_CF))
    }

    fn data_cf(&self) -> StorageResult<&ColumnFamily> {
        self.db
            .cf_handle(DATA_CF)
            .ok_or(StorageError::MissingColumnFamily(DATA_CF))
    }

    /// Meta record of a live list. Absent, expired and empty records all
    /// read as "no list here".
    fn load_meta(&self, key: &[u8], now: i64) -> StorageResult<Option<ListMeta>> {
        let cf = self.meta_cf()?;
        match self.db.get_cf(cf, key)? {
            None => Ok(None),
            Some(bytes) => {
                let meta = ListMeta::parse(&bytes)?;
                if meta.is_expired(now) || meta.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(meta))
                }
            }
        }
    }

    /// Meta record a push starts from. A missing, expired or empty list is
    /// re-seeded with a bumped version so stale elements stay invisible.
    fn meta_for_push(&self, key: &[u8], now: i64) -> StorageResult<ListMeta> {
        let cf = self.meta_cf()?;
        match self.db.get_cf(cf, key)? {
            None => {
                let mut meta = ListMeta::new();
                meta.update_version();
                Ok(meta)
            }
            Some(bytes) => {
                let mut meta = ListMeta::parse(&bytes)?;
                if meta.is_expired(now) || meta.is_empty() {
                    meta.reset();
                }
                Ok(meta)
            }
        }
    }

    /// Prepend values; returns the resulting length
    pub fn lpush(&self, key: &[u8], values: Vec<Bytes>) -> StorageResult<u64> {
        let now = unix_now();
        let mut meta = self.meta_for_push(key, now)?;
        let data_cf = self.data_cf()?;

        let mut batch = WriteBatch::default();
        for value in &values {
            batch.put_cf(data_cf, encode_data_key(key, meta.version, meta.head), value);
            meta.head -= 1;
            meta.size += 1;
        }
        batch.put_cf(self.meta_cf()?, key, meta.encode());
        self.db.write_opt(batch, &self.write_opts)?;
        Ok(meta.size)
    }

    /// Append values; returns the resulting length
    pub fn rpush(&self, key: &[u8], values: Vec<Bytes>) -> StorageResult<u64> {
        let now = unix_now();
        let mut meta = self.meta_for_push(key, now)?;
        let data_cf = self.data_cf()?;

        let mut batch = WriteBatch::default();
        for value in &values {
            batch.put_cf(data_cf, encode_data_key(key, meta.version, meta.tail), value);
            meta.tail += 1;
            meta.size += 1;
        }
        batch.put_cf(self.meta_cf()?, key, meta.encode());
        self.db.write_opt(batch, &self.write_opts)?;
        Ok(meta.size)
    }

    /// Pop from the head
    pub fn lpop(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let now = unix_now();
        let Some(mut meta) = self.load_meta(key, now)? else {
            return Ok(None);
        };
        let data_cf = self.data_cf()?;

        let index = meta.head + 1;
        let data_key = encode_data_key(key, meta.version, index);
        let Some(value) = self.db.get_cf(data_cf, &data_key)? else {
            return Err(StorageError::CorruptRecord("list element record missing"));
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(data_cf, &data_key);
        meta.head = index;
        meta.size -= 1;
        batch.put_cf(self.meta_cf()?, key, meta.encode());
        self.db.write_opt(batch, &self.write_opts)?;
        Ok(Some(Bytes::from(value)))
    }

    /// Pop from the tail
    pub fn rpop(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let now = unix_now();
        let Some(mut meta) = self.load_meta(key, now)? else {
            return Ok(None);
        };
        let data_cf = self.data_cf()?;

        let index = meta.tail - 1;
        let data_key = encode_data_key(key, meta.version, index);
        let Some(value) = self.db.get_cf(data_cf, &data_key)? else {
            return Err(StorageError::CorruptRecord("list element record missing"));
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(data_cf, &data_key);
        meta.tail = index;
        meta.size -= 1;
        batch.put_cf(self.meta_cf()?, key, meta.encode());
        self.db.write_opt(batch, &self.write_opts)?;
        Ok(Some(Bytes::from(value)))
    }

    /// Number of elements
    pub fn llen(&self, key: &[u8]) -> StorageResult<u64> {
        Ok(self
            .load_meta(key, unix_now())?
            .map(|meta| meta.size)
            .unwrap_or(0))
    }

    /// Elements in `[start, stop]`, both ends inclusive, with negative
    /// offsets counted from the tail
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> StorageResult<Vec<Bytes>> {
        let Some(meta) = self.load_meta(key, unix_now())? else {
            return Ok(Vec::new());
        };
        let len = meta.size as i64;

        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= len {
            stop = len - 1;
        }
        if start > stop {
            return Ok(Vec::new());
        }

        let first = meta.head + 1 + start as u64;
        let wanted = (stop - start + 1) as usize;
        let from = encode_data_key(key, meta.version, first);

        let data_cf = self.data_cf()?;
        let mut out = Vec::with_capacity(wanted);
        let iter = self
            .db
            .iterator_cf(data_cf, IteratorMode::From(&from, Direction::Forward));
        for item in iter {
            let (record_key, value) = item?;
            let (user_key, version, _index) = parse_data_key(&record_key)?;
            if user_key != key || version != meta.version {
                break;
            }
            out.push(Bytes::from(value.into_vec()));
            if out.len() == wanted {
                break;
            }
        }
        Ok(out)
    }

    /// Element at `index`, negative offsets counted from the tail
    pub fn lindex(&self, key: &[u8], index: i64) -> StorageResult<Option<Bytes>> {
        let Some(meta) = self.load_meta(key, unix_now())? else {
            return Ok(None);
        };
        let len = meta.size as i64;
        let index = if index < 0 { len + index } else { index };
        if index < 0 || index >= len {
            return Ok(None);
        }

        let data_key = encode_data_key(key, meta.version, meta.head + 1 + index as u64);
        let value = self.db.get_cf(self.data_cf()?, &data_key)?;
        Ok(value.map(Bytes::from))
    }

    /// Logically delete the list. The meta record is re-seeded with a
    /// bumped version; element records are reclaimed by compaction.
    pub fn del(&self, key: &[u8]) -> StorageResult<bool> {
        let cf = self.meta_cf()?;
        let Some(bytes) = self.db.get_cf(cf, key)? else {
            return Ok(false);
        };
        let mut meta = ListMeta::parse(&bytes)?;
        let now = unix_now();
        if meta.is_expired(now) || meta.is_empty() {
            return Ok(false);
        }
        meta.reset();
        self.db
            .put_cf_opt(cf, key, meta.encode(), &self.write_opts)?;
        Ok(true)
    }

    /// Set an absolute deadline `secs` from now. Values of zero or below
    /// expire the list immediately.
    pub fn expire(&self, key: &[u8], secs: i64) -> StorageResult<bool> {
        let now = unix_now();
        let Some(mut meta) = self.load_meta(key, now)? else {
            return Ok(false);
        };
        meta.set_relative_ttl(secs);
        self.db
            .put_cf_opt(self.meta_cf()?, key, meta.encode(), &self.write_opts)?;
        Ok(true)
    }

    /// Flush both families' memtables to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush_cf(self.meta_cf()?)?;
        self.db.flush_cf(self.data_cf()?)?;
        Ok(())
    }

    /// Run a full compaction over both families, applying the filters to
    /// every record
    pub fn compact(&self) -> StorageResult<()> {
        self.db
            .compact_range_cf(self.meta_cf()?, None::<&[u8]>, None::<&[u8]>);
        self.db
            .compact_range_cf(self.data_cf()?, None::<&[u8]>, None::<&[u8]>);
        Ok(())
    }

    /// Physical record count in the data family. Diagnostic helper for
    /// tooling; stale generations show up here until compaction runs.
    pub fn data_entry_count(&self) -> StorageResult<u64> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(self.data_cf()?, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Write a consistent on-disk copy of the database into `dir`
    pub fn checkpoint<P: AsRef<Path>>(&self, dir: P) -> StorageResult<()> {
        let checkpoint = Checkpoint::new(&self.db)?;
        checkpoint.create_checkpoint(dir.as_ref())?;
        info!("created checkpoint at {}", dir.as_ref().display());
        Ok(())
    }
}
