//! Backend-agnostic directory contract

use crate::cache_service::{CacheServiceBackend, RedisConnector};
use crate::dht::DhtBackend;
use crate::peer_dht::PeerDht;
use crate::registry::{GrpcRegistryClient, RegistryBackend};
use async_trait::async_trait;
use dsdir_common::config::BackendKind;
use dsdir_common::{Config, DatasetId, DatasetMeta, Result};
use dsdir_store::LocalCache;
use std::sync::Arc;
use tracing::{error, info};

/// One way of keeping dataset metadata in sync with the rest of the
/// federation.
///
/// Every backend writes the node's local cache; they differ in whether the
/// remote write must succeed first and whether reads consult the local
/// cache at all. Remote failures are logged, never returned from `put`.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Idempotent upsert of a record.
    ///
    /// Returns an error only when the local cache write itself fails.
    async fn put(&self, meta: &DatasetMeta) -> Result<()>;

    /// Look a record up.
    ///
    /// `Ok(None)` means nobody has the id. Transport and decode failures
    /// come back as `Err` after being logged.
    async fn get(&self, id: &DatasetId) -> Result<Option<DatasetMeta>>;

    /// Record held in the local cache, without any remote traffic
    fn get_local(&self, id: &DatasetId) -> Result<Option<DatasetMeta>>;

    /// Every record in the local cache, without any remote traffic
    fn list_local(&self) -> Result<Vec<DatasetMeta>>;

    /// Wait for background remote writes started by `put`
    async fn flush(&self) {}
}

/// Typed view of the local cache holding JSON-encoded records keyed by id
#[derive(Clone)]
pub struct MetaCache {
    inner: Arc<dyn LocalCache>,
}

impl MetaCache {
    #[must_use]
    pub fn new(inner: Arc<dyn LocalCache>) -> Self {
        Self { inner }
    }

    /// Store an already-encoded record
    pub fn put_encoded(&self, id: &DatasetId, encoded: &str) -> Result<()> {
        self.inner.put(id.as_bytes(), encoded.as_bytes())?;
        Ok(())
    }

    pub fn put(&self, meta: &DatasetMeta) -> Result<()> {
        self.put_encoded(meta.id(), &meta.to_json()?)
    }

    /// Raw encoded value, if present
    pub fn get_encoded(&self, id: &DatasetId) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get(id.as_bytes())?)
    }

    pub fn get(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        self.get_encoded(id)?
            .map(|bytes| DatasetMeta::from_slice(&bytes))
            .transpose()
    }

    /// Decode every cached record, skipping entries that fail to decode
    pub fn list(&self) -> Result<Vec<DatasetMeta>> {
        let mut metas = Vec::new();
        for (key, value) in self.inner.list_all()? {
            match DatasetMeta::from_slice(&value) {
                Ok(meta) => metas.push(meta),
                Err(e) => error!(
                    "Failed to decode cached meta '{}': {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(metas)
    }
}

/// Build the backend selected by the node configuration
///
/// Remote connections are opened lazily, so this must run inside a Tokio
/// runtime but never waits on the network.
pub fn build_backend(
    config: &Config,
    cache: Arc<dyn LocalCache>,
) -> Result<Arc<dyn DirectoryBackend>> {
    let backend: Arc<dyn DirectoryBackend> = match config.directory.backend {
        BackendKind::Dht => {
            let dht = PeerDht::connect_lazy(
                &config.dht.peers,
                config.dht.replicas,
                config.dht.rpc_timeout(),
            )?;
            Arc::new(DhtBackend::new(cache, Arc::new(dht)))
        }
        BackendKind::Registry => {
            let client = GrpcRegistryClient::connect_lazy(&config.registry.endpoint)?;
            Arc::new(RegistryBackend::new(cache, Arc::new(client)))
        }
        BackendKind::CacheService => {
            let connector = RedisConnector::new(
                &config.cache_service.address,
                &config.cache_service.password,
            )?;
            Arc::new(CacheServiceBackend::new(cache, Arc::new(connector)))
        }
    };
    info!("Using {} directory backend", backend.name());
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdir_common::{Error, Visibility};
    use dsdir_store::MemoryCache;

    fn meta(name: &str) -> DatasetMeta {
        DatasetMeta::new(name, Visibility::Public, "csv", "node0:127.0.0.1:50050:/tmp/a.csv")
    }

    #[test]
    fn test_meta_cache_round_trip() {
        let cache = MetaCache::new(Arc::new(MemoryCache::new()));
        let m = meta("guest_train");
        cache.put(&m).unwrap();
        assert_eq!(cache.get(m.id()).unwrap(), Some(m));
        assert!(cache.get(&DatasetId::new("absent")).unwrap().is_none());
    }

    #[test]
    fn test_meta_cache_decode_failure_is_distinct() {
        let raw = Arc::new(MemoryCache::new());
        raw.put(b"broken", b"not json").unwrap();
        let cache = MetaCache::new(raw);
        let err = cache.get(&DatasetId::new("broken")).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_meta_cache_list_skips_garbage() {
        let raw = Arc::new(MemoryCache::new());
        let cache = MetaCache::new(raw.clone());
        cache.put(&meta("a")).unwrap();
        cache.put(&meta("b")).unwrap();
        raw.put(b"zzz", b"{").unwrap();
        assert_eq!(cache.list().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_build_dht_backend() {
        let config = Config::default();
        let backend = build_backend(&config, Arc::new(MemoryCache::new())).unwrap();
        assert_eq!(backend.name(), "dht");

        let mut config = Config::default();
        config.dht.peers = vec!["not a uri".to_string()];
        let err = build_backend(&config, Arc::new(MemoryCache::new())).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_build_registry_backend() {
        let mut config = Config::default();
        config.directory.backend = BackendKind::Registry;
        let backend = build_backend(&config, Arc::new(MemoryCache::new())).unwrap();
        assert_eq!(backend.name(), "registry");
    }

    #[tokio::test]
    async fn test_build_cache_service_backend() {
        let mut config = Config::default();
        config.directory.backend = BackendKind::CacheService;
        config.cache_service.password = "pa/ss#1".to_string();
        let backend = build_backend(&config, Arc::new(MemoryCache::new())).unwrap();
        assert_eq!(backend.name(), "cache_service");
    }
}
