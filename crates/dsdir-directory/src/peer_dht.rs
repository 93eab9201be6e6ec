//! DHT spread over the federation's nodes
//!
//! Every node runs a [`DhtPeerService`] that stores values on behalf of
//! the others. [`PeerDht`] places each key on the `replicas` peers whose
//! id is closest to the key by XOR distance, ids being SHA-256 of the peer
//! endpoint and of the key. Lookups ask the same peers, closest first.

use crate::dht::DhtNetwork;
use crate::registry::status_to_error;
use async_trait::async_trait;
use dsdir_common::{Error, Result};
use dsdir_proto::dht::dht_service_client::DhtServiceClient;
use dsdir_proto::dht::dht_service_server::DhtService;
use dsdir_proto::dht::{FindValueRequest, FindValueResponse, StoreRequest, StoreResponse};
use dsdir_store::LocalCache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

type NodeId = [u8; 32];

fn node_id(bytes: &[u8]) -> NodeId {
    Sha256::digest(bytes).into()
}

fn distance(a: &NodeId, b: &NodeId) -> NodeId {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = x ^ y;
    }
    out
}

// ── Server side ─────────────────────────────────────────────────────────────

/// Stores values published by other nodes
pub struct DhtPeerService {
    values: Arc<dyn LocalCache>,
}

impl DhtPeerService {
    pub fn new(values: Arc<dyn LocalCache>) -> Self {
        Self { values }
    }
}

#[tonic::async_trait]
impl DhtService for DhtPeerService {
    async fn store(
        &self,
        request: Request<StoreRequest>,
    ) -> std::result::Result<Response<StoreResponse>, Status> {
        let req = request.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("empty key"));
        }
        self.values
            .put(&req.key, &req.value)
            .map_err(|e| Status::internal(e.to_string()))?;
        debug!("Stored {} bytes under {}", req.value.len(), String::from_utf8_lossy(&req.key));
        Ok(Response::new(StoreResponse {}))
    }

    async fn find_value(
        &self,
        request: Request<FindValueRequest>,
    ) -> std::result::Result<Response<FindValueResponse>, Status> {
        let req = request.into_inner();
        let value = self
            .values
            .get(&req.key)
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(FindValueResponse {
            found: value.is_some(),
            value: value.unwrap_or_default(),
        }))
    }
}

// ── Client side ─────────────────────────────────────────────────────────────

struct Peer {
    endpoint: String,
    id: NodeId,
    client: DhtServiceClient<Channel>,
}

/// [`DhtNetwork`] talking to the peers' [`DhtPeerService`]s over gRPC
pub struct PeerDht {
    peers: Vec<Peer>,
    replicas: usize,
    rpc_timeout: Duration,
}

impl PeerDht {
    /// Peer set whose connections open on first use
    pub fn connect_lazy(endpoints: &[String], replicas: usize, rpc_timeout: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::Configuration("DHT needs at least one peer".into()));
        }
        let mut peers = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let channel = Endpoint::from_shared(endpoint.clone())
                .map_err(|e| Error::Configuration(format!("DHT peer {endpoint}: {e}")))?
                .connect_timeout(rpc_timeout)
                .connect_lazy();
            peers.push(Peer {
                endpoint: endpoint.clone(),
                id: node_id(endpoint.as_bytes()),
                client: DhtServiceClient::new(channel),
            });
        }
        info!("DHT over {} peers, {} replicas per key", peers.len(), replicas);
        Ok(Self {
            peers,
            replicas: replicas.max(1),
            rpc_timeout,
        })
    }

    /// Peers responsible for `key`, closest first
    fn closest(&self, key: &[u8]) -> Vec<&Peer> {
        let target = node_id(key);
        let mut peers: Vec<&Peer> = self.peers.iter().collect();
        peers.sort_by_key(|peer| distance(&peer.id, &target));
        peers.truncate(self.replicas);
        peers
    }

    /// Endpoints responsible for `key`, closest first
    #[must_use]
    pub fn responsible_peers(&self, key: &[u8]) -> Vec<&str> {
        self.closest(key)
            .into_iter()
            .map(|peer| peer.endpoint.as_str())
            .collect()
    }

    async fn call<T>(
        &self,
        endpoint: &str,
        call: impl Future<Output = std::result::Result<Response<T>, Status>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(status_to_error(&status)),
            Err(_) => {
                warn!("DHT peer {} did not answer within {:?}", endpoint, self.rpc_timeout);
                Err(Error::Timeout)
            }
        }
    }
}

#[async_trait]
impl DhtNetwork for PeerDht {
    async fn put_value(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let mut stores = JoinSet::new();
        for peer in self.closest(key) {
            let mut client = peer.client.clone();
            let endpoint = peer.endpoint.clone();
            let request = StoreRequest {
                key: key.to_vec(),
                value: value.clone(),
            };
            let rpc_timeout = self.rpc_timeout;
            stores.spawn(async move {
                let outcome = match tokio::time::timeout(rpc_timeout, client.store(request)).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(status)) => Err(status_to_error(&status)),
                    Err(_) => Err(Error::Timeout),
                };
                (endpoint, outcome)
            });
        }

        let mut stored = 0;
        let mut last_error = None;
        while let Some(joined) = stores.join_next().await {
            match joined {
                Ok((_, Ok(()))) => stored += 1,
                Ok((endpoint, Err(e))) => {
                    warn!("Store on DHT peer {} failed: {}", endpoint, e);
                    last_error = Some(e);
                }
                Err(e) => last_error = Some(Error::Rpc(e.to_string())),
            }
        }

        if stored == 0 {
            return Err(last_error.unwrap_or_else(|| Error::ConnectionFailed("no DHT peers".into())));
        }
        debug!("Value stored on {} DHT peers", stored);
        Ok(())
    }

    async fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut answered = false;
        let mut last_error = None;
        for peer in self.closest(key) {
            let mut client = peer.client.clone();
            let request = FindValueRequest { key: key.to_vec() };
            match self.call(&peer.endpoint, client.find_value(request)).await {
                Ok(resp) if resp.found => return Ok(Some(resp.value)),
                Ok(_) => answered = true,
                Err(e) => {
                    warn!("FindValue on DHT peer {} failed: {}", peer.endpoint, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }
}
