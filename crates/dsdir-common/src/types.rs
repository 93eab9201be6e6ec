//! Core type definitions for the dataset directory
//!
//! This module defines the dataset identifier, the metadata record that
//! every backend exchanges, and the data URL that locates a dataset's bytes.

use crate::error::{Error, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque, content-derived dataset identifier
///
/// The textual form is the key used by the local cache, every remote
/// backend and the transfer ticket payload.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct DatasetId(String);

impl DatasetId {
    /// Wrap an already-encoded identifier
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derive the identifier from a dataset's logical name
    ///
    /// The same name always yields the same id on every node.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        Self(hex::encode(digest))
    }

    /// Get the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the identifier as raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({})", self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Who may read a dataset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Metadata record for a registered dataset
///
/// Records are immutable once built: changing the location produces a new
/// record carrying the same id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMeta {
    id: DatasetId,
    description: String,
    visibility: Visibility,
    #[serde(rename = "driverType")]
    driver_type: String,
    #[serde(rename = "dataURL")]
    data_url: String,
}

impl DatasetMeta {
    /// Build a record, deriving the id from the description
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        visibility: Visibility,
        driver_type: impl Into<String>,
        data_url: impl Into<String>,
    ) -> Self {
        let description = description.into();
        Self {
            id: DatasetId::from_name(&description),
            description,
            visibility,
            driver_type: driver_type.into(),
            data_url: data_url.into(),
        }
    }

    /// Build a record with an explicit id
    #[must_use]
    pub fn with_id(
        id: DatasetId,
        description: impl Into<String>,
        visibility: Visibility,
        driver_type: impl Into<String>,
        data_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            visibility,
            driver_type: driver_type.into(),
            data_url: data_url.into(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &DatasetId {
        &self.id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub const fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[must_use]
    pub fn driver_type(&self) -> &str {
        &self.driver_type
    }

    #[must_use]
    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// Copy of this record pointing at a new location
    #[must_use]
    pub fn relocated(&self, data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
            ..self.clone()
        }
    }

    /// Encode to the JSON wire/storage format
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode from the JSON wire/storage format
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Decode from raw bytes holding the JSON encoding
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Parsed dataset location
///
/// Canonical text form is `node_id:address:port:path`. The short form
/// `host:port:path` is also accepted, with the host doubling as node id.
/// The canonical form wins whenever the third segment is a port, so an
/// all-digit address parses as an address. Addresses containing `:`
/// (bare IPv6) cannot be expressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataUrl {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub path: String,
}

impl DataUrl {
    /// Parse a data URL
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::InvalidDataUrl(url.to_string());

        let (first, rest) = url.split_once(':').ok_or_else(invalid)?;
        let (second, rest) = rest.split_once(':').ok_or_else(invalid)?;
        if first.is_empty() {
            return Err(invalid());
        }

        // node_id:address:port:path
        if let Some((port, path)) = rest.split_once(':')
            && let Ok(port) = port.parse::<u16>()
        {
            if second.is_empty() || path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self {
                node_id: first.to_string(),
                address: second.to_string(),
                port,
                path: path.to_string(),
            });
        }

        // host:port:path
        let port = second.parse::<u16>().map_err(|_| invalid())?;
        if rest.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            node_id: first.to_string(),
            address: first.to_string(),
            port,
            path: rest.to_string(),
        })
    }

    /// Build the URL of `path` served by the given nodelet address
    #[must_use]
    pub fn with_nodelet(nodelet_addr: &str, path: &str) -> String {
        format!("{nodelet_addr}:{path}")
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.node_id, self.address, self.port, self.path)
    }
}

/// A dataset name paired with the caller-defined role it plays
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetRef<T> {
    pub name: String,
    pub tag: T,
}

impl<T> DatasetRef<T> {
    pub fn new(name: impl Into<String>, tag: T) -> Self {
        Self {
            name: name.into(),
            tag,
        }
    }

    /// Identifier this reference resolves under
    #[must_use]
    pub fn id(&self) -> DatasetId {
        DatasetId::from_name(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> DatasetMeta {
        DatasetMeta::with_id(
            DatasetId::new("A"),
            "sales-q1",
            Visibility::Public,
            "csv",
            "node1:9000:/data/sales.csv",
        )
    }

    #[test]
    fn test_dataset_id_is_deterministic() {
        let a = DatasetId::from_name("train_party_0");
        let b = DatasetId::from_name("train_party_0");
        let c = DatasetId::from_name("train_party_1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_meta_derives_id_from_description() {
        let meta = DatasetMeta::new("sales-q1", Visibility::Public, "csv", "n:h:1:/x");
        assert_eq!(meta.id(), &DatasetId::from_name("sales-q1"));
    }

    #[test]
    fn test_meta_json_round_trip() {
        let meta = sales();
        let json = meta.to_json().unwrap();
        assert_eq!(DatasetMeta::from_json(&json).unwrap(), meta);
        assert_eq!(DatasetMeta::from_slice(json.as_bytes()).unwrap(), meta);
    }

    #[test]
    fn test_meta_json_field_names() {
        let json = sales().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], "A");
        assert_eq!(value["visibility"], "PUBLIC");
        assert_eq!(value["driverType"], "csv");
        assert_eq!(value["dataURL"], "node1:9000:/data/sales.csv");
    }

    #[test]
    fn test_meta_decode_failure() {
        let err = DatasetMeta::from_json("{\"id\": 3}").unwrap_err();
        assert!(err.is_decode_failure());
    }

    #[test]
    fn test_relocated_keeps_id() {
        let meta = sales();
        let moved = meta.relocated("node2:10.0.0.2:50050:/data/sales.csv");
        assert_eq!(moved.id(), meta.id());
        assert_eq!(moved.description(), meta.description());
        assert_ne!(moved.data_url(), meta.data_url());
    }

    #[test]
    fn test_data_url_full_form() {
        let url = DataUrl::parse("node0:127.0.0.1:50050:/tmp/train.csv").unwrap();
        assert_eq!(url.node_id, "node0");
        assert_eq!(url.address, "127.0.0.1");
        assert_eq!(url.port, 50050);
        assert_eq!(url.path, "/tmp/train.csv");
        assert_eq!(url.to_string(), "node0:127.0.0.1:50050:/tmp/train.csv");
    }

    #[test]
    fn test_data_url_short_form() {
        let url = DataUrl::parse("node1:9000:/data/sales.csv").unwrap();
        assert_eq!(url.node_id, "node1");
        assert_eq!(url.address, "node1");
        assert_eq!(url.port, 9000);
        assert_eq!(url.path, "/data/sales.csv");
    }

    #[test]
    fn test_data_url_path_with_colon() {
        let url = DataUrl::parse("n:10.0.0.1:1:C:/data/x.csv").unwrap();
        assert_eq!(url.path, "C:/data/x.csv");
    }

    #[test]
    fn test_data_url_numeric_address() {
        let url = DataUrl::parse("node7:2130706433:50050:/tmp/x.csv").unwrap();
        assert_eq!(url.node_id, "node7");
        assert_eq!(url.address, "2130706433");
        assert_eq!(url.port, 50050);
        assert_eq!(url.path, "/tmp/x.csv");

        let url = DataUrl::parse("7:8080:9090:/d").unwrap();
        assert_eq!((url.address.as_str(), url.port), ("8080", 9090));
    }

    #[test]
    fn test_data_url_invalid() {
        assert!(DataUrl::parse("no-colons").is_err());
        assert!(DataUrl::parse("a:b").is_err());
        assert!(DataUrl::parse("a:b:notaport:/x").is_err());
        assert!(DataUrl::parse("a:9000:").is_err());
    }

    #[test]
    fn test_with_nodelet() {
        let url = DataUrl::with_nodelet("node0:127.0.0.1:50050", "/tmp/a.csv");
        assert_eq!(url, "node0:127.0.0.1:50050:/tmp/a.csv");
        assert!(DataUrl::parse(&url).is_ok());
    }
}
