//! Configuration types for a directory node
//!
//! The node reads a TOML file into [`Config`]. Every section has defaults,
//! so a partial (or empty) file is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a directory node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub dht: DhtConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cache_service: CacheServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Datasets registered on startup
    #[serde(default)]
    pub datasets: Vec<DefaultDataset>,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values that parse but cannot drive a node
    pub fn validate(&self) -> Result<()> {
        if self.directory.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "directory.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.directory.backend == BackendKind::Dht && self.dht.peers.is_empty() {
            return Err(Error::Configuration(
                "the dht backend needs at least one entry in dht.peers".into(),
            ));
        }
        if self.dht.replicas == 0 {
            return Err(Error::Configuration("dht.replicas must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Node identity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,
    #[serde(default = "default_node_ip")]
    pub ip: String,
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
}

impl NodeConfig {
    /// Address other nodes use to reach this node's data: `id:ip:port`
    #[must_use]
    pub fn nodelet_addr(&self) -> String {
        format!("{}:{}:{}", self.id, self.ip, self.grpc_port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            ip: default_node_ip(),
            grpc_port: default_grpc_port(),
        }
    }
}

/// Local cache storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Path of the redb file holding the local metadata cache
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("datasets.redb")
    }

    /// Path of the redb file holding values this node stores as a DHT peer
    #[must_use]
    pub fn dht_path(&self) -> PathBuf {
        self.data_dir.join("dht.redb")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Which remote directory channel a node uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Dht,
    Registry,
    CacheService,
}

/// Directory behaviour shared by every backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Budget for resolving a whole group of datasets
    #[serde(default = "default_resolution_timeout_secs")]
    pub resolution_timeout_secs: u64,
    /// Delay between polling rounds of a bulk resolution
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl DirectoryConfig {
    #[must_use]
    pub const fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            resolution_timeout_secs: default_resolution_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// DHT peer network
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhtConfig {
    /// Address the `serve` command binds the peer service to
    #[serde(default = "default_dht_listen")]
    pub listen: String,
    /// gRPC endpoints of every peer, this node's own included
    #[serde(default = "default_dht_peers")]
    pub peers: Vec<String>,
    /// Number of peers each value is stored on
    #[serde(default = "default_dht_replicas")]
    pub replicas: usize,
    #[serde(default = "default_dht_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl DhtConfig {
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            listen: default_dht_listen(),
            peers: default_dht_peers(),
            replicas: default_dht_replicas(),
            rpc_timeout_ms: default_dht_rpc_timeout_ms(),
        }
    }
}

/// Centralized registry service endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_endpoint")]
    pub endpoint: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_registry_endpoint(),
        }
    }
}

/// Shared remote cache service endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheServiceConfig {
    #[serde(default = "default_cache_address")]
    pub address: String,
    #[serde(default)]
    pub password: String,
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            address: default_cache_address(),
            password: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A dataset to register when the node starts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultDataset {
    pub description: String,
    /// Driver type, e.g. "csv"
    pub model: String,
    /// Path handed to the driver
    pub source: String,
}

fn default_node_id() -> String {
    "node0".to_string()
}

fn default_node_ip() -> String {
    "127.0.0.1".to_string()
}

const fn default_grpc_port() -> u16 {
    50050
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./dsdir-data")
}

const fn default_resolution_timeout_secs() -> u64 {
    20
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_dht_listen() -> String {
    "0.0.0.0:7980".to_string()
}

fn default_dht_peers() -> Vec<String> {
    vec!["http://127.0.0.1:7980".to_string()]
}

const fn default_dht_replicas() -> usize {
    3
}

const fn default_dht_rpc_timeout_ms() -> u64 {
    2000
}

fn default_registry_endpoint() -> String {
    "http://127.0.0.1:7977".to_string()
}

fn default_cache_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
