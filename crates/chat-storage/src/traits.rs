//! Storage trait definitions.

use crate::StorageResult;

/// Trait for string key/value backends.
pub trait PersistentStorage: Send + Sync {
    /// Store a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether anything was removed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List all keys that start with a given prefix, sorted.
    fn list_keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
