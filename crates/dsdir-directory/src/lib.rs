//! DSDir Directory - dataset metadata directory
//!
//! Maps dataset ids to [`DatasetMeta`] records and keeps that mapping
//! consistent between the node's local cache and one remote directory
//! channel:
//!
//! - [`DhtBackend`]: write-through to the local cache, best-effort publish
//!   to a distributed hash table, remote lookup on local miss. [`PeerDht`]
//!   is the DHT formed by the nodes' [`DhtPeerService`]s.
//! - [`RegistryBackend`]: write-after-confirm against a centralized gRPC
//!   registry; reads always go to the registry.
//! - [`CacheServiceBackend`]: write-after-confirm against a shared remote
//!   cache service; reads always go to the cache service.
//!
//! [`BulkResolver`] resolves a whole group of dataset names against any
//! backend under one timeout. [`DatasetService`] is the dataset-facing
//! API and [`DataGateway`] turns transfer tickets into record batches.
//!
//! [`DatasetMeta`]: dsdir_common::DatasetMeta

pub mod backend;
pub mod cache_service;
pub mod dht;
pub mod gateway;
pub mod peer_dht;
pub mod registry;
pub mod resolver;
pub mod service;

pub use backend::{DirectoryBackend, MetaCache, build_backend};
pub use cache_service::{CacheConnector, CacheServiceBackend, CacheSession, RedisConnector};
pub use dht::{DhtBackend, DhtMode, DhtNetwork, MemoryDht};
pub use gateway::{DataGateway, DatasetStream};
pub use peer_dht::{DhtPeerService, PeerDht};
pub use registry::{GrpcRegistryClient, RegistryBackend, RegistryClient, RegistryReply};
pub use resolver::{BulkResolver, Resolution};
pub use service::DatasetService;
