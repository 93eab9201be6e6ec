//! Persistent local cache backed by redb.
//!
//! All writes are synchronous (write txn + commit), so a successful `put`
//! has reached disk before it returns.

use crate::LocalCache;
use crate::tables;
use redb::{Database, ReadableTable};
use std::path::Path;
use tracing::debug;

/// Error type for local cache operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<StoreError> for dsdir_common::Error {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Local cache persisted in a single redb file.
pub struct RedbCache {
    db: Database,
}

impl RedbCache {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::DATASET_METAS)?;
        }
        write_txn.commit()?;

        debug!("Opened local dataset cache at {}", path.display());
        Ok(Self { db })
    }
}

impl LocalCache for RedbCache {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::DATASET_METAS)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::DATASET_METAS)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::DATASET_METAS)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_all(&self) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::DATASET_METAS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            result.push((entry.0.value().to_vec(), entry.1.value().to_vec()));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let cache = RedbCache::open(dir.path().join("datasets.redb")).unwrap();

        cache.put(b"testkey", b"testvalue").unwrap();
        assert_eq!(cache.get(b"testkey").unwrap(), Some(b"testvalue".to_vec()));

        cache.delete(b"testkey").unwrap();
        assert_eq!(cache.get(b"testkey").unwrap(), None);
    }

    #[test]
    fn test_missing_key_is_not_an_error() {
        let dir = tempdir().unwrap();
        let cache = RedbCache::open(dir.path().join("datasets.redb")).unwrap();
        assert!(cache.get(b"absent").unwrap().is_none());
        // Deleting an absent key is fine too
        cache.delete(b"absent").unwrap();
    }

    #[test]
    fn test_put_overwrites() {
        let dir = tempdir().unwrap();
        let cache = RedbCache::open(dir.path().join("datasets.redb")).unwrap();
        cache.put(b"k", b"v1").unwrap();
        cache.put(b"k", b"v2").unwrap();
        assert_eq!(cache.get(b"k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(cache.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_list_all_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("datasets.redb");
        {
            let cache = RedbCache::open(&path).unwrap();
            cache.put(b"b", b"2").unwrap();
            cache.put(b"a", b"1").unwrap();
        }
        let cache = RedbCache::open(&path).unwrap();
        let all = cache.list_all().unwrap();
        assert_eq!(
            all,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
            ]
        );
    }
}
