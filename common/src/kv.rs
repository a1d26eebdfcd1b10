//! Ordered key-value persistence.
//!
//! Ledger handlers only ever talk to `KvStore`. Two backends are provided:
//! - `MemoryStore`: a `BTreeMap` behind a lock, for tests and embedded use
//! - `SledStore`: one sled tree, for the operator binaries
//!
//! `CacheStore` buffers writes on top of any store. Handlers run against a cache and the
//! caller commits it only when the handler succeeds, so a rejected call leaves the
//! underlying store untouched.

use crate::error::StoreError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;

/// Buffered writes: `Some(value)` sets, `None` removes.
pub type WriteBatch = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Ordered map with prefix walks.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn remove(&self, key: &[u8]) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn walk(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply every write in `batch` as one unit.
    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError>;

    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Typed access on top of `KvStore`, values encoded with bincode.
pub trait KvStoreExt: KvStore {
    fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        self.get(key)?
            .map(|bytes| bincode::deserialize(&bytes).map_err(StoreError::from))
            .transpose()
    }

    fn set_value<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), StoreError> {
        let bytes = bincode::serialize(value)?;
        self.set(key, &bytes)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Copy of the full contents, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.map.read().clone()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn walk(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .map
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut map = self.map.write();
        for (key, value) in batch {
            match value {
                Some(v) => map.insert(key, v),
                None => map.remove(&key),
            };
        }
        Ok(())
    }
}

// ============================================================================
// Sled backend
// ============================================================================

/// A single sled tree used as the ledger's key space.
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStore {
    /// Open (or create) the database at `path` and the named tree inside it.
    pub fn open(path: &Path, tree_name: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let db = sled::open(path)?;
        let tree = db.open_tree(tree_name)?;
        Ok(Self { db, tree })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.tree.contains_key(key)?)
    }

    fn walk(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.tree
            .scan_prefix(prefix)
            .map(|entry| {
                entry
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(StoreError::from)
            })
            .collect()
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch {
            match value {
                Some(v) => sled_batch.insert(key, v),
                None => sled_batch.remove(key),
            }
        }
        self.tree.apply_batch(sled_batch)?;
        Ok(())
    }
}

// ============================================================================
// Write-buffering overlay
// ============================================================================

/// Buffers writes over a parent store until `commit`.
pub struct CacheStore<'a, S: KvStore + ?Sized> {
    parent: &'a S,
    writes: Mutex<WriteBatch>,
}

impl<'a, S: KvStore + ?Sized> CacheStore<'a, S> {
    pub fn new(parent: &'a S) -> Self {
        Self {
            parent,
            writes: Mutex::new(WriteBatch::new()),
        }
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.writes.lock().len()
    }

    /// Write the buffered delta through to the parent in one batch.
    pub fn commit(self) -> Result<(), StoreError> {
        let writes = self.writes.into_inner();
        if writes.is_empty() {
            return Ok(());
        }
        self.parent.apply_batch(writes)
    }
}

impl<S: KvStore + ?Sized> KvStore for CacheStore<'_, S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(buffered) = self.writes.lock().get(key) {
            return Ok(buffered.clone());
        }
        self.parent.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.writes.lock().insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.writes.lock().insert(key.to_vec(), None);
        Ok(())
    }

    fn walk(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self.parent.walk(prefix)?.into_iter().collect();
        let writes = self.writes.lock();
        for (key, value) in writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => merged.insert(key.clone(), v.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.writes.lock().extend(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    fn exercise_store(store: &dyn KvStore) {
        store.set(b"a/1", b"one").unwrap();
        store.set(b"a/2", b"two").unwrap();
        store.set(b"b/1", b"other").unwrap();

        assert_eq!(store.get(b"a/1").unwrap(), Some(b"one".to_vec()));
        assert!(store.has(b"a/2").unwrap());
        assert!(!store.has(b"a/3").unwrap());

        let walked: Vec<Vec<u8>> = store.walk(b"a/").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(walked, vec![b"a/1".to_vec(), b"a/2".to_vec()]);

        store.remove(b"a/1").unwrap();
        assert_eq!(store.get(b"a/1").unwrap(), None);

        let mut batch = WriteBatch::new();
        batch.insert(b"c/1".to_vec(), Some(b"x".to_vec()));
        batch.insert(b"a/2".to_vec(), None);
        store.apply_batch(batch).unwrap();
        assert!(store.has(b"c/1").unwrap());
        assert!(!store.has(b"a/2").unwrap());
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn test_sled_store() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(&dir.path().join("kv.db"), "test").unwrap();
        exercise_store(&store);
        store.flush().unwrap();
    }

    #[test]
    fn test_sled_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let store = SledStore::open(&path, "test").unwrap();
            store.set(b"k", b"v").unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(&path, "test").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_cache_store_isolated_until_commit() {
        let base = MemoryStore::new();
        base.set(b"k/1", b"old").unwrap();
        base.set(b"k/2", b"keep").unwrap();

        let cache = CacheStore::new(&base);
        cache.set(b"k/1", b"new").unwrap();
        cache.remove(b"k/2").unwrap();
        cache.set(b"k/3", b"added").unwrap();

        assert_eq!(cache.get(b"k/1").unwrap(), Some(b"new".to_vec()));
        assert_eq!(cache.get(b"k/2").unwrap(), None);
        let keys: Vec<Vec<u8>> = cache.walk(b"k/").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"k/1".to_vec(), b"k/3".to_vec()]);

        // Parent untouched before commit
        assert_eq!(base.get(b"k/1").unwrap(), Some(b"old".to_vec()));
        assert_eq!(base.len(), 2);

        cache.commit().unwrap();
        assert_eq!(base.get(b"k/1").unwrap(), Some(b"new".to_vec()));
        assert_eq!(base.get(b"k/2").unwrap(), None);
        assert_eq!(base.get(b"k/3").unwrap(), Some(b"added".to_vec()));
    }

    #[test]
    fn test_cache_store_dropped_discards() {
        let base = MemoryStore::new();
        let before = base.snapshot();
        {
            let cache = CacheStore::new(&base);
            cache.set(b"x", b"y").unwrap();
            assert_eq!(cache.pending_writes(), 1);
        }
        assert_eq!(base.snapshot(), before);
    }

    #[test]
    fn test_typed_values() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Record {
            name: String,
            count: u64,
        }

        let store = MemoryStore::new();
        let record = Record {
            name: "r".to_string(),
            count: 3,
        };
        store.set_value(b"rec", &record).unwrap();
        assert_eq!(store.get_value::<Record>(b"rec").unwrap(), Some(record));
        assert_eq!(store.get_value::<Record>(b"missing").unwrap(), None);

        store.set(b"junk", &[0xff]).unwrap();
        assert!(matches!(
            store.get_value::<Record>(b"junk"),
            Err(StoreError::Codec(_))
        ));
    }
}
