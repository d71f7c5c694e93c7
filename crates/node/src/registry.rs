//! Slot registry backing the rsync server
//!
//! Maps `(db_name, slot_id)` to the open slots of this node and adapts
//! them to the view the transfer service expects.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use rsync::registry::{DumpMeta, SlotRegistry, SlotView};
use storage::Slot;

/// Adapter exposing one storage slot through the server-facing view
struct SlotHandle(Arc<Slot>);

impl SlotView for SlotHandle {
    fn is_bg_saving(&self) -> bool {
        self.0.is_bg_saving()
    }

    fn dump_meta(&self) -> Option<DumpMeta> {
        self.0.dump_info().map(|info| DumpMeta {
            snapshot_uuid: info.snapshot_uuid,
            filenames: info.filenames,
        })
    }

    fn dump_uuid(&self) -> Option<String> {
        self.0.dump_uuid()
    }

    fn dump_dir(&self) -> Option<PathBuf> {
        self.0.dump_info().map(|info| info.dir)
    }
}

/// All slots served by this node
#[derive(Default)]
pub struct Registry {
    slots: RwLock<HashMap<(String, u32), Arc<Slot>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, slot: Arc<Slot>) {
        let key = (slot.db_name().to_string(), slot.slot_id());
        self.slots.write().insert(key, slot);
    }

    pub fn get(&self, db_name: &str, slot_id: u32) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .get(&(db_name.to_string(), slot_id))
            .cloned()
    }

    pub fn slots(&self) -> Vec<Arc<Slot>> {
        self.slots.read().values().cloned().collect()
    }
}

impl SlotRegistry for Registry {
    fn slot(&self, db_name: &str, slot_id: u32) -> Option<Arc<dyn SlotView>> {
        self.get(db_name, slot_id)
            .map(|slot| Arc::new(SlotHandle(slot)) as Arc<dyn SlotView>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_registered_slots() {
        let path = format!("/tmp/redrock_registry_test_{}", rand::random::<u64>());
        let db_root = PathBuf::from(&path).join("db");
        let dump_root = PathBuf::from(&path).join("dump");

        let slot =
            Slot::open("db0", 3, &db_root, &dump_root, "", 4 * 1024 * 1024).expect("open failed");
        slot.bgsave().expect("bgsave failed");

        let registry = Registry::new();
        registry.insert(Arc::new(slot));

        assert!(registry.get("db0", 3).is_some());
        assert!(registry.get("db0", 4).is_none());
        assert!(registry.get("db1", 3).is_none());
        assert_eq!(registry.slots().len(), 1);

        let view = SlotRegistry::slot(&registry, "db0", 3).expect("view missing");
        assert!(!view.is_bg_saving());
        let meta = view.dump_meta().expect("dump meta missing");
        assert!(!meta.snapshot_uuid.is_empty());
        assert!(meta
            .filenames
            .contains(&storage::DUMP_UUID_FILE.to_string()));
        assert_eq!(view.dump_uuid(), Some(meta.snapshot_uuid));

        let _ = std::fs::remove_dir_all(&path);
    }
}
