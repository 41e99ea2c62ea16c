//! In-memory storage backend.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::{PersistentStorage, StorageResult};

/// Process-local storage. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl PersistentStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(storage.len(), 1);

        assert!(storage.delete("k").unwrap());
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn memory_storage_prefix_listing() {
        let storage = MemoryStorage::new();
        storage.set("b:1", "x").unwrap();
        storage.set("a:2", "x").unwrap();
        storage.set("a:1", "x").unwrap();
        storage.set("ab", "x").unwrap();

        assert_eq!(storage.list_keys_with_prefix("a:").unwrap(), vec!["a:1", "a:2"]);
        assert!(storage.list_keys_with_prefix("z").unwrap().is_empty());
    }
}
