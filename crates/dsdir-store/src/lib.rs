//! DSDir Store - durable local metadata cache
//!
//! Byte-oriented key/value storage that every directory backend writes
//! through. [`RedbCache`] persists to disk; [`MemoryCache`] keeps
//! everything in process memory.

pub mod memory;
pub mod store;
pub mod tables;

pub use memory::MemoryCache;
pub use store::{RedbCache, StoreError, StoreResult};

/// Key/value contract of the local cache
///
/// `get` reports an absent key as `Ok(None)`, never as an error.
pub trait LocalCache: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Every entry, in key order
    fn list_all(&self) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}
