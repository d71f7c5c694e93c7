//! Slot: one partition of the keyspace
//!
//! A slot owns its list storage and the dump directory a replica pulls
//! from. Background saves checkpoint the engine into the dump directory
//! and bind the result to a fresh snapshot uuid.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::lists::ListStorage;

/// Sentinel file carrying the snapshot uuid inside a dump directory
pub const DUMP_UUID_FILE: &str = "DUMP_UUID";

/// One finished dump: where it lives, what it contains, and the uuid that
/// binds a transfer to it
#[derive(Debug, Clone)]
pub struct DumpInfo {
    pub snapshot_uuid: String,
    pub dir: PathBuf,
    pub filenames: Vec<String>,
}

/// A keyspace partition with independent storage and snapshot
pub struct Slot {
    db_name: String,
    slot_id: u32,
    storage: ListStorage,
    dump_dir: PathBuf,
    bg_saving: AtomicBool,
    dump_info: RwLock<Option<DumpInfo>>,
}

impl Slot {
    /// Open the slot's database under `db_root` and adopt a dump left by a
    /// previous run, if one exists.
    pub fn open(
        db_name: &str,
        slot_id: u32,
        db_root: &Path,
        dump_root: &Path,
        dump_prefix: &str,
        write_buffer_size: usize,
    ) -> StorageResult<Self> {
        let db_path = db_root.join(db_name).join(slot_id.to_string());
        let storage = ListStorage::open(&db_path, write_buffer_size)?;
        let dump_dir = dump_root
            .join(format!("{}{}", dump_prefix, db_name))
            .join(slot_id.to_string());

        let slot = Self {
            db_name: db_name.to_string(),
            slot_id,
            storage,
            dump_dir,
            bg_saving: AtomicBool::new(false),
            dump_info: RwLock::new(None),
        };
        if let Some(info) = slot.recover_dump() {
            info!(
                "slot {}:{} adopted existing dump {}",
                slot.db_name, slot.slot_id, info.snapshot_uuid
            );
            *slot.dump_info.write() = Some(info);
        }
        Ok(slot)
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn slot_id(&self) -> u32 {
        self.slot_id
    }

    pub fn storage(&self) -> &ListStorage {
        &self.storage
    }

    /// True while a background save is producing a new dump
    pub fn is_bg_saving(&self) -> bool {
        self.bg_saving.load(Ordering::SeqCst)
    }

    /// Current dump, if any
    pub fn dump_info(&self) -> Option<DumpInfo> {
        self.dump_info.read().clone()
    }

    /// Uuid of the current dump, if any
    pub fn dump_uuid(&self) -> Option<String> {
        self.dump_info.read().as_ref().map(|i| i.snapshot_uuid.clone())
    }

    /// Checkpoint the slot into its dump directory, replacing any previous
    /// dump, and advertise the result under a fresh uuid. A save already in
    /// flight is reported as `SnapshotBusy`.
    pub fn bgsave(&self) -> StorageResult<DumpInfo> {
        if self.bg_saving.swap(true, Ordering::SeqCst) {
            return Err(StorageError::SnapshotBusy);
        }
        let result = self.bgsave_inner();
        self.bg_saving.store(false, Ordering::SeqCst);
        result
    }

    fn bgsave_inner(&self) -> StorageResult<DumpInfo> {
        if self.dump_dir.exists() {
            fs::remove_dir_all(&self.dump_dir)?;
        }
        if let Some(parent) = self.dump_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        self.storage.flush()?;
        self.storage.checkpoint(&self.dump_dir)?;

        let snapshot_uuid = Uuid::new_v4().to_string();
        fs::write(self.dump_dir.join(DUMP_UUID_FILE), &snapshot_uuid)?;

        let filenames = list_dump_files(&self.dump_dir)?;
        let info = DumpInfo {
            snapshot_uuid,
            dir: self.dump_dir.clone(),
            filenames,
        };
        info!(
            "slot {}:{} background save finished, uuid: {} files: {}",
            self.db_name,
            self.slot_id,
            info.snapshot_uuid,
            info.filenames.len()
        );
        *self.dump_info.write() = Some(info.clone());
        Ok(info)
    }

    /// Dump left behind by a previous process, identified by its sentinel
    fn recover_dump(&self) -> Option<DumpInfo> {
        let uuid_path = self.dump_dir.join(DUMP_UUID_FILE);
        let snapshot_uuid = fs::read_to_string(&uuid_path).ok()?;
        let snapshot_uuid = snapshot_uuid.trim().to_string();
        if snapshot_uuid.is_empty() {
            return None;
        }
        match list_dump_files(&self.dump_dir) {
            Ok(filenames) => Some(DumpInfo {
                snapshot_uuid,
                dir: self.dump_dir.clone(),
                filenames,
            }),
            Err(e) => {
                warn!(
                    "slot {}:{} failed to list recovered dump: {}",
                    self.db_name, self.slot_id, e
                );
                None
            }
        }
    }
}

fn list_dump_files(dir: &Path) -> StorageResult<Vec<String>> {
    let mut filenames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            filenames.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    filenames.sort();
    Ok(filenames)
}
