//! Shared remote cache service backend
//!
//! Each operation opens its own session to the cache service and closes
//! it when done. Writes reach the local cache only after the service
//! accepted them; reads always go to the service. A failed connection
//! ends the operation and is not retried.

use crate::backend::{DirectoryBackend, MetaCache};
use async_trait::async_trait;
use dsdir_common::{DatasetId, DatasetMeta, Error, Result};
use dsdir_store::LocalCache;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Opens sessions to the remote cache service
#[async_trait]
pub trait CacheConnector: Send + Sync {
    /// Address used in log lines
    fn address(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn CacheSession>>;
}

/// One open connection to the remote cache service
#[async_trait]
pub trait CacheSession: Send {
    async fn set(&mut self, key: &str, value: &str) -> Result<()>;

    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Close the connection
    async fn disconnect(self: Box<Self>);
}

/// Redis implementation of the cache service protocol
pub struct RedisConnector {
    address: String,
    client: redis::Client,
}

impl RedisConnector {
    /// `address` is `host:port`; an empty password disables AUTH
    ///
    /// The password is passed through as is, it never goes through URL
    /// parsing.
    pub fn new(address: &str, password: &str) -> Result<Self> {
        let info = ConnectionInfo {
            addr: parse_tcp_addr(address)?,
            redis: RedisConnectionInfo {
                password: (!password.is_empty()).then(|| password.to_string()),
                ..RedisConnectionInfo::default()
            },
        };
        let client = redis::Client::open(info)
            .map_err(|e| Error::Configuration(format!("cache service address {address}: {e}")))?;
        Ok(Self {
            address: address.to_string(),
            client,
        })
    }
}

/// Split `host:port`, accepting a bracketed IPv6 host
fn parse_tcp_addr(address: &str) -> Result<ConnectionAddr> {
    let invalid = || Error::Configuration(format!("cache service address {address} is not host:port"));
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(ConnectionAddr::Tcp(host.to_string(), port))
}

#[async_trait]
impl CacheConnector for RedisConnector {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<Box<dyn CacheSession>> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {e}", self.address)))?;
        Ok(Box::new(RedisSession { conn }))
    }
}

struct RedisSession {
    conn: redis::aio::MultiplexedConnection,
}

fn redis_error(e: &redis::RedisError) -> Error {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        Error::ConnectionFailed(e.to_string())
    } else if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Rpc(e.to_string())
    }
}

#[async_trait]
impl CacheSession for RedisSession {
    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn
            .set::<_, _, ()>(key, value)
            .await
            .map_err(|e| redis_error(&e))
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.conn
            .get::<_, Option<String>>(key)
            .await
            .map_err(|e| redis_error(&e))
    }

    async fn disconnect(self: Box<Self>) {
        // Dropping the last handle closes the socket
        drop(self);
    }
}

/// Directory backend backed by a shared remote cache service
pub struct CacheServiceBackend {
    cache: MetaCache,
    connector: Arc<dyn CacheConnector>,
}

impl CacheServiceBackend {
    pub fn new(cache: Arc<dyn LocalCache>, connector: Arc<dyn CacheConnector>) -> Self {
        Self {
            cache: MetaCache::new(cache),
            connector,
        }
    }

    async fn connect(&self) -> Result<Box<dyn CacheSession>> {
        self.connector.connect().await.inspect_err(|e| {
            error!(
                "Connect to cache service {} failed: {}",
                self.connector.address(),
                e
            );
        })
    }
}

#[async_trait]
impl DirectoryBackend for CacheServiceBackend {
    fn name(&self) -> &'static str {
        "cache_service"
    }

    async fn put(&self, meta: &DatasetMeta) -> Result<()> {
        let Ok(mut session) = self.connect().await else {
            return Ok(());
        };

        let encoded = meta.to_json()?;
        info!("<< Put meta to cache service, meta {}", encoded);

        let stored = session.set(meta.id().as_str(), &encoded).await;
        session.disconnect().await;
        if let Err(e) = stored {
            error!(
                "Save dataset {} and its meta to cache service failed, dataset id is {}: {}",
                meta.description(),
                meta.id(),
                e
            );
            return Ok(());
        }

        self.cache.put_encoded(meta.id(), &encoded)?;
        info!("Save dataset {}'s meta to cache service finish.", meta.description());
        Ok(())
    }

    async fn get(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        let mut session = self.connect().await?;
        let fetched = session.get(id.as_str()).await;
        session.disconnect().await;

        let encoded = match fetched {
            Ok(Some(encoded)) => encoded,
            Ok(None) => {
                debug!("Meta for dataset id {} not in cache service", id);
                return Ok(None);
            }
            Err(e) => {
                error!("Get meta for dataset id {} from cache service failed: {}", id, e);
                return Err(e);
            }
        };

        let meta = DatasetMeta::from_json(&encoded).inspect_err(|e| {
            error!("Cache service returned undecodable meta for {}: {}", id, e);
        })?;
        info!("Get dataset meta with dataset id {} from cache service finish.", id);
        Ok(Some(meta))
    }

    fn get_local(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        self.cache.get(id)
    }

    fn list_local(&self) -> Result<Vec<DatasetMeta>> {
        self.cache.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::BulkResolver;
    use dsdir_common::{DatasetRef, Visibility};
    use dsdir_store::MemoryCache;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeCacheService {
        entries: Arc<Mutex<HashMap<String, String>>>,
        down: Mutex<bool>,
        read_only: Mutex<bool>,
        open_sessions: Arc<AtomicUsize>,
    }

    struct FakeSession {
        entries: Arc<Mutex<HashMap<String, String>>>,
        read_only: bool,
        open_sessions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CacheConnector for FakeCacheService {
        fn address(&self) -> &str {
            "fake:6379"
        }

        async fn connect(&self) -> Result<Box<dyn CacheSession>> {
            if *self.down.lock() {
                return Err(Error::ConnectionFailed("fake:6379 refused".into()));
            }
            self.open_sessions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                entries: Arc::clone(&self.entries),
                read_only: *self.read_only.lock(),
                open_sessions: Arc::clone(&self.open_sessions),
            }))
        }
    }

    #[async_trait]
    impl CacheSession for FakeSession {
        async fn set(&mut self, key: &str, value: &str) -> Result<()> {
            if self.read_only {
                return Err(Error::Rpc("READONLY replica".into()));
            }
            self.entries.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get(&mut self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.lock().get(key).cloned())
        }

        async fn disconnect(self: Box<Self>) {
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn meta() -> DatasetMeta {
        DatasetMeta::new("guest_train", Visibility::Private, "csv", "node1:10.0.0.2:50050:/d/g.csv")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = Arc::new(MemoryCache::new());
        let service = Arc::new(FakeCacheService::default());
        let backend = CacheServiceBackend::new(cache.clone(), service.clone());

        let m = meta();
        backend.put(&m).await.unwrap();
        assert!(cache.get(m.id().as_bytes()).unwrap().is_some());
        assert_eq!(backend.get(m.id()).await.unwrap(), Some(m));
        assert_eq!(service.open_sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_put_connection_failure_leaves_local_empty() {
        let cache = Arc::new(MemoryCache::new());
        let service = Arc::new(FakeCacheService::default());
        *service.down.lock() = true;
        let backend = CacheServiceBackend::new(cache.clone(), service);

        backend.put(&meta()).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_put_set_failure_leaves_local_empty() {
        let cache = Arc::new(MemoryCache::new());
        let service = Arc::new(FakeCacheService::default());
        *service.read_only.lock() = true;
        let backend = CacheServiceBackend::new(cache.clone(), service.clone());

        backend.put(&meta()).await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(service.open_sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_skips_local_and_distinguishes_failures() {
        let cache = Arc::new(MemoryCache::new());
        let service = Arc::new(FakeCacheService::default());
        let backend = CacheServiceBackend::new(cache.clone(), service.clone());

        let m = meta();
        MetaCache::new(cache.clone()).put(&m).unwrap();
        assert!(backend.get(m.id()).await.unwrap().is_none());

        service
            .entries
            .lock()
            .insert(m.id().to_string(), "not json".to_string());
        assert!(backend.get(m.id()).await.unwrap_err().is_decode_failure());

        *service.down.lock() = true;
        let err = backend.get(m.id()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }

    #[test]
    fn test_redis_connector_builds_without_connecting() {
        let connector = RedisConnector::new("127.0.0.1:6379", "secret").unwrap();
        assert_eq!(connector.address(), "127.0.0.1:6379");
        let info = connector.client.get_connection_info();
        assert_eq!(info.addr, ConnectionAddr::Tcp("127.0.0.1".into(), 6379));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));

        let connector = RedisConnector::new("127.0.0.1:6379", "").unwrap();
        assert!(connector.client.get_connection_info().redis.password.is_none());
    }

    #[test]
    fn test_redis_password_is_kept_verbatim() {
        for password in ["pa/ss", "p%40ss", "a#b?c", "x@y:z"] {
            let connector = RedisConnector::new("10.0.0.9:6379", password).unwrap();
            let info = connector.client.get_connection_info();
            assert_eq!(info.redis.password.as_deref(), Some(password));
        }
    }

    #[test]
    fn test_redis_address_parsing() {
        let connector = RedisConnector::new("[::1]:6380", "").unwrap();
        assert_eq!(
            connector.client.get_connection_info().addr,
            ConnectionAddr::Tcp("::1".into(), 6380)
        );
        for bad in ["localhost", "localhost:port", ":6379", "host:70000"] {
            let err = RedisConnector::new(bad, "").err().unwrap();
            assert!(matches!(err, Error::Configuration(_)), "{bad}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_resolve_over_cache_service() {
        let service = Arc::new(FakeCacheService::default());
        let publisher = CacheServiceBackend::new(Arc::new(MemoryCache::new()), service.clone());
        let m = meta();
        publisher.put(&m).await.unwrap();

        let reader = Arc::new(CacheServiceBackend::new(Arc::new(MemoryCache::new()), service.clone()));
        let resolver = BulkResolver::new(reader).with_timeout(Duration::from_secs(3));

        let entries = resolver
            .resolve(vec![DatasetRef::new("guest_train", "guest")])
            .await
            .into_complete()
            .unwrap();
        assert_eq!(entries, vec![(m, "guest")]);

        // Service outage: every round fails to connect until the deadline
        *service.down.lock() = true;
        let resolution = resolver
            .resolve(vec![DatasetRef::new("guest_train", "guest")])
            .await;
        assert!(!resolution.is_complete());
        assert_eq!(service.open_sessions.load(Ordering::SeqCst), 0);
    }
}
