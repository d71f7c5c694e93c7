//! List engine behavior, including compaction reclaim

use bytes::Bytes;
use storage::ListStorage;

fn open_temp_storage() -> (ListStorage, String) {
    let path = format!("/tmp/redrock_lists_test_{}", rand::random::<u64>());
    let storage = ListStorage::open(&path, 4 * 1024 * 1024).expect("open failed");
    (storage, path)
}

fn values(items: &[&str]) -> Vec<Bytes> {
    items.iter().map(|s| Bytes::from(s.to_string())).collect()
}

#[test]
fn test_push_pop_roundtrip() {
    let (storage, path) = open_temp_storage();

    assert_eq!(storage.lpush(b"mylist", values(&["a", "b"])).unwrap(), 2);
    assert_eq!(storage.rpush(b"mylist", values(&["c"])).unwrap(), 3);
    assert_eq!(storage.llen(b"mylist").unwrap(), 3);

    let range = storage.lrange(b"mylist", 0, -1).unwrap();
    assert_eq!(range, values(&["b", "a", "c"]));

    assert_eq!(storage.lpop(b"mylist").unwrap(), Some(Bytes::from("b")));
    assert_eq!(storage.rpop(b"mylist").unwrap(), Some(Bytes::from("c")));
    assert_eq!(storage.llen(b"mylist").unwrap(), 1);

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}

#[test]
fn test_pop_on_missing_list() {
    let (storage, path) = open_temp_storage();

    assert_eq!(storage.lpop(b"nope").unwrap(), None);
    assert_eq!(storage.rpop(b"nope").unwrap(), None);
    assert_eq!(storage.llen(b"nope").unwrap(), 0);
    assert!(storage.lrange(b"nope", 0, -1).unwrap().is_empty());

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}

#[test]
fn test_lrange_offsets() {
    let (storage, path) = open_temp_storage();

    storage.rpush(b"k", values(&["a", "b", "c", "d", "e"])).unwrap();

    assert_eq!(storage.lrange(b"k", 1, 3).unwrap(), values(&["b", "c", "d"]));
    assert_eq!(storage.lrange(b"k", -2, -1).unwrap(), values(&["d", "e"]));
    assert_eq!(storage.lrange(b"k", -100, 100).unwrap().len(), 5);
    assert!(storage.lrange(b"k", 3, 1).unwrap().is_empty());

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}

#[test]
fn test_lindex_offsets() {
    let (storage, path) = open_temp_storage();

    storage.rpush(b"k", values(&["a", "b", "c"])).unwrap();

    assert_eq!(storage.lindex(b"k", 0).unwrap(), Some(Bytes::from("a")));
    assert_eq!(storage.lindex(b"k", 2).unwrap(), Some(Bytes::from("c")));
    assert_eq!(storage.lindex(b"k", -1).unwrap(), Some(Bytes::from("c")));
    assert_eq!(storage.lindex(b"k", 3).unwrap(), None);
    assert_eq!(storage.lindex(b"k", -4).unwrap(), None);

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}

#[test]
fn test_del_invalidates_and_reseeds() {
    let (storage, path) = open_temp_storage();

    storage.rpush(b"k", values(&["a", "b"])).unwrap();
    assert!(storage.del(b"k").unwrap());
    assert_eq!(storage.llen(b"k").unwrap(), 0);
    assert!(storage.lrange(b"k", 0, -1).unwrap().is_empty());
    assert!(!storage.del(b"k").unwrap());

    // pushing again starts a fresh generation with none of the old elements
    storage.rpush(b"k", values(&["x"])).unwrap();
    assert_eq!(storage.lrange(b"k", 0, -1).unwrap(), values(&["x"]));

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}

#[test]
fn test_expire_hides_list() {
    let (storage, path) = open_temp_storage();

    storage.rpush(b"k", values(&["a"])).unwrap();
    assert!(storage.expire(b"k", 1000).unwrap());
    assert_eq!(storage.llen(b"k").unwrap(), 1);

    // a deadline already in the past makes the list invisible
    assert!(storage.expire(b"k", -1).unwrap());
    assert_eq!(storage.llen(b"k").unwrap(), 0);
    assert_eq!(storage.lpop(b"k").unwrap(), None);
    assert!(!storage.expire(b"k", 10).unwrap());

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}

#[test]
fn test_compaction_reclaims_stale_generations() {
    let (storage, path) = open_temp_storage();

    storage.rpush(b"k", values(&["a", "b", "c"])).unwrap();
    storage.flush().unwrap();

    assert!(storage.del(b"k").unwrap());
    storage.rpush(b"k", values(&["d", "e"])).unwrap();
    storage.flush().unwrap();

    // both generations are still physically present before compaction
    assert_eq!(storage.data_entry_count().unwrap(), 5);

    storage.compact().unwrap();
    assert_eq!(storage.data_entry_count().unwrap(), 2);
    assert_eq!(storage.lrange(b"k", 0, -1).unwrap(), values(&["d", "e"]));

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}

#[test]
fn test_compaction_reclaims_expired_list() {
    let (storage, path) = open_temp_storage();

    storage.rpush(b"k", values(&["x", "y"])).unwrap();
    storage.expire(b"k", -1).unwrap();
    storage.flush().unwrap();

    storage.compact().unwrap();
    assert_eq!(storage.data_entry_count().unwrap(), 0);
    assert_eq!(storage.llen(b"k").unwrap(), 0);

    drop(storage);
    let _ = std::fs::remove_dir_all(&path);
}
