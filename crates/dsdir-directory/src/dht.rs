//! Peer-to-peer directory backend over a distributed hash table
//!
//! Writes go to the local cache first and are then published to the DHT
//! in the background; a failed publish is only logged. [`DhtBackend`]
//! keeps the publish tasks so a node can wait for them before it exits.
//! Reads are served
//! from the local cache when possible, otherwise from a DHT lookup whose
//! result is cached locally.

use crate::backend::{DirectoryBackend, MetaCache};
use async_trait::async_trait;
use dsdir_common::{DatasetId, DatasetMeta, Error, Result};
use dsdir_store::LocalCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Key/value operations of a distributed hash table
#[async_trait]
pub trait DhtNetwork: Send + Sync {
    /// Publish a value under a key. Best effort, eventually consistent.
    async fn put_value(&self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Look a key up across the network.
    ///
    /// Implementations must eventually complete, either with a value,
    /// `None`, or an error.
    async fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Directory backend publishing records to a DHT
pub struct DhtBackend {
    cache: MetaCache,
    dht: Arc<dyn DhtNetwork>,
    publishes: Mutex<Vec<JoinHandle<()>>>,
}

impl DhtBackend {
    pub fn new(cache: Arc<dyn LocalCache>, dht: Arc<dyn DhtNetwork>) -> Self {
        Self {
            cache: MetaCache::new(cache),
            dht,
            publishes: Mutex::new(Vec::new()),
        }
    }

    /// Publishes started and not yet reaped
    #[must_use]
    pub fn pending_publishes(&self) -> usize {
        let mut publishes = self.publishes.lock();
        publishes.retain(|handle| !handle.is_finished());
        publishes.len()
    }
}

#[async_trait]
impl DirectoryBackend for DhtBackend {
    fn name(&self) -> &'static str {
        "dht"
    }

    async fn put(&self, meta: &DatasetMeta) -> Result<()> {
        let encoded = meta.to_json()?;
        info!("<< Put meta: {}", encoded);

        self.cache.put_encoded(meta.id(), &encoded)?;

        let dht = Arc::clone(&self.dht);
        let id = meta.id().clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = dht.put_value(id.as_bytes(), encoded.into_bytes()).await {
                error!("Publish meta {} to DHT failed: {}", id, e);
            }
        });
        let mut publishes = self.publishes.lock();
        publishes.retain(|handle| !handle.is_finished());
        publishes.push(handle);
        Ok(())
    }

    async fn get(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        match self.cache.get(id) {
            Ok(Some(meta)) => return Ok(Some(meta)),
            Ok(None) => {}
            Err(e) => warn!("Local meta for {} unreadable, asking DHT: {}", id, e),
        }

        let bytes = match self.dht.get_value(id.as_bytes()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Meta {} not found in DHT", id);
                return Ok(None);
            }
            Err(e) => {
                error!("<< Get meta {} from DHT failed: {}", id, e);
                return Err(e);
            }
        };

        let meta = match DatasetMeta::from_slice(&bytes) {
            Ok(meta) => meta,
            Err(e) => {
                error!("<< Get meta failed: {}", e);
                return Err(e);
            }
        };
        info!("Found remote meta: {}", String::from_utf8_lossy(&bytes));

        if let Err(e) = self.cache.put(&meta) {
            warn!("Failed to cache remote meta {}: {}", id, e);
        }
        Ok(Some(meta))
    }

    fn get_local(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        self.cache.get(id)
    }

    fn list_local(&self) -> Result<Vec<DatasetMeta>> {
        self.cache.list()
    }

    async fn flush(&self) {
        let publishes = std::mem::take(&mut *self.publishes.lock());
        if publishes.is_empty() {
            return;
        }
        info!("Waiting for {} DHT publishes", publishes.len());
        for handle in publishes {
            if let Err(e) = handle.await {
                warn!("DHT publish task failed: {}", e);
            }
        }
    }
}

/// How a [`MemoryDht`] answers requests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DhtMode {
    #[default]
    Normal,
    /// Every request fails
    Failing,
    /// Lookups never complete; publishes are dropped
    Unresponsive,
}

/// DHT living in process memory
///
/// Clones share the same table, so several nodes in one process see each
/// other's publications.
#[derive(Clone, Default)]
pub struct MemoryDht {
    table: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
    mode: Arc<Mutex<DhtMode>>,
    lookups: Arc<AtomicUsize>,
}

impl MemoryDht {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: DhtMode) {
        *self.mode.lock() = mode;
    }

    /// Number of `get_value` calls served so far
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.table.read().contains_key(key)
    }

    /// Store raw bytes, bypassing any node
    pub fn insert_raw(&self, key: &[u8], value: &[u8]) {
        self.table.write().insert(key.to_vec(), value.to_vec());
    }

    fn mode(&self) -> DhtMode {
        *self.mode.lock()
    }
}

#[async_trait]
impl DhtNetwork for MemoryDht {
    async fn put_value(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        match self.mode() {
            DhtMode::Normal => {
                self.table.write().insert(key.to_vec(), value);
                Ok(())
            }
            DhtMode::Failing => Err(Error::ConnectionFailed("no DHT peers reachable".into())),
            DhtMode::Unresponsive => Ok(()),
        }
    }

    async fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            DhtMode::Normal => Ok(self.table.read().get(key).cloned()),
            DhtMode::Failing => Err(Error::ConnectionFailed("no DHT peers reachable".into())),
            DhtMode::Unresponsive => std::future::pending().await,
        }
    }
}
