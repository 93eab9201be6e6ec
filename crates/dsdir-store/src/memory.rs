//! In-memory local cache

use crate::{LocalCache, StoreResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Local cache that keeps entries in process memory
///
/// Nothing survives a restart; useful for tests and throwaway nodes.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl LocalCache for MemoryCache {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn list_all(&self) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cache_basic() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());
        cache.put(b"k", b"v").unwrap();
        assert_eq!(cache.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.len(), 1);
        cache.delete(b"k").unwrap();
        assert!(cache.get(b"k").unwrap().is_none());
    }
}
