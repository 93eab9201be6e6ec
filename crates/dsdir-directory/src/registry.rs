//! Centralized registry backend
//!
//! Writes are confirmed by the registry service before the record is put
//! in the local cache (write-after-confirm). Reads skip the local cache
//! and always ask the registry.

use crate::backend::{DirectoryBackend, MetaCache};
use async_trait::async_trait;
use dsdir_common::{DatasetId, DatasetMeta, Error, Result};
use dsdir_proto::registry::registry_service_client::RegistryServiceClient;
use dsdir_proto::registry::{FindDatasetRequest, RegisterDatasetRequest, RequestStatus};
use dsdir_store::LocalCache;
use std::sync::Arc;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error, info};

/// Status and message returned by a registry call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryReply {
    pub status: RequestStatus,
    pub msg: String,
}

impl RegistryReply {
    #[must_use]
    pub fn finished(msg: impl Into<String>) -> Self {
        Self {
            status: RequestStatus::Finish,
            msg: msg.into(),
        }
    }

    #[must_use]
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            status: RequestStatus::Fail,
            msg: msg.into(),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == RequestStatus::Finish
    }

    /// `Err(RemoteRejected)` unless the request finished
    pub fn check(&self) -> Result<()> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(Error::RemoteRejected(format!(
                "{}: {}",
                self.status.as_str_name(),
                self.msg
            )))
        }
    }
}

/// Calls exposed by the centralized registry service
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn register_dataset(&self, name: &str, encoded: &str) -> Result<RegistryReply>;

    async fn find_dataset(&self, name: &str) -> Result<RegistryReply>;
}

/// Registry client speaking gRPC
#[derive(Clone)]
pub struct GrpcRegistryClient {
    client: RegistryServiceClient<Channel>,
}

impl GrpcRegistryClient {
    /// Client that connects on first call
    pub fn connect_lazy(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::Configuration(format!("registry endpoint {endpoint}: {e}")))?
            .connect_lazy();
        Ok(Self {
            client: RegistryServiceClient::new(channel),
        })
    }
}

pub(crate) fn status_to_error(status: &tonic::Status) -> Error {
    match status.code() {
        tonic::Code::Unavailable => Error::ConnectionFailed(status.message().to_string()),
        tonic::Code::DeadlineExceeded => Error::Timeout,
        _ => Error::Rpc(status.message().to_string()),
    }
}

#[async_trait]
impl RegistryClient for GrpcRegistryClient {
    async fn register_dataset(&self, name: &str, encoded: &str) -> Result<RegistryReply> {
        let request = RegisterDatasetRequest {
            name: name.to_string(),
            dataset_url: encoded.to_string(),
        };
        let response = self
            .client
            .clone()
            .register_dataset(request)
            .await
            .map_err(|s| status_to_error(&s))?
            .into_inner();
        Ok(RegistryReply {
            status: response.status(),
            msg: response.msg,
        })
    }

    async fn find_dataset(&self, name: &str) -> Result<RegistryReply> {
        let request = FindDatasetRequest {
            name: name.to_string(),
        };
        let response = self
            .client
            .clone()
            .find_dataset(request)
            .await
            .map_err(|s| status_to_error(&s))?
            .into_inner();
        Ok(RegistryReply {
            status: response.status(),
            msg: response.msg,
        })
    }
}

/// Directory backend backed by a centralized registry service
pub struct RegistryBackend {
    cache: MetaCache,
    client: Arc<dyn RegistryClient>,
}

impl RegistryBackend {
    pub fn new(cache: Arc<dyn LocalCache>, client: Arc<dyn RegistryClient>) -> Self {
        Self {
            cache: MetaCache::new(cache),
            client,
        }
    }
}

#[async_trait]
impl DirectoryBackend for RegistryBackend {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn put(&self, meta: &DatasetMeta) -> Result<()> {
        let encoded = meta.to_json()?;
        info!("<< Put meta to centralized dataset meta service, meta {}", encoded);

        let reply = match self.client.register_dataset(meta.id().as_str(), &encoded).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Issue RegisterDataset for {} failed, {}", meta.id(), e);
                return Ok(());
            }
        };
        if let Err(e) = reply.check() {
            error!("Register dataset {} failed, {}", meta.id(), e);
            return Ok(());
        }

        self.cache.put_encoded(meta.id(), &encoded)?;
        info!(
            "Register dataset {} to remote service finish.",
            meta.description()
        );
        Ok(())
    }

    async fn get(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        let reply = match self.client.find_dataset(id.as_str()).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Issue FindDataset for {} failed, {}", id, e);
                return Err(e);
            }
        };
        if !reply.is_finished() {
            debug!("Find dataset {} failed, {}.", id, reply.msg);
            return Ok(None);
        }

        let meta = DatasetMeta::from_json(&reply.msg).inspect_err(|e| {
            error!("Registry returned undecodable meta for {}: {}", id, e);
        })?;
        info!("Get meta with dataset id {} finish.", id);
        Ok(Some(meta))
    }

    fn get_local(&self, id: &DatasetId) -> Result<Option<DatasetMeta>> {
        self.cache.get(id)
    }

    fn list_local(&self) -> Result<Vec<DatasetMeta>> {
        self.cache.list()
    }
}
