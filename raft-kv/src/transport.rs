//! Outbound RPCs to peers.
//!
//! [`PeerTransport`] is the seam between the consensus core and the network.
//! [`HttpTransport`] speaks the JSON protocol served by [`crate::server`];
//! [`LocalNetwork`] routes calls between nodes in the same process and can
//! cut nodes off to simulate partitions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::TransportError;
use crate::message::{AppendRequest, AppendResponse, VoteRequest, VoteResponse};
use crate::node::ConsensusNode;

/// Sends consensus RPCs to a peer identified by its address.
///
/// Implementations should not retry: the caller bounds every call with a
/// timeout and treats any error as a denial.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn request_vote(
        &self,
        peer: &str,
        request: &VoteRequest,
    ) -> Result<VoteResponse, TransportError>;

    async fn append_entries(
        &self,
        peer: &str,
        request: &AppendRequest,
    ) -> Result<AppendResponse, TransportError>;
}

/// JSON over HTTP, one POST per call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn post<Req, Resp>(&self, peer: &str, path: &str, body: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("http://{peer}{path}"))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn request_vote(
        &self,
        peer: &str,
        request: &VoteRequest,
    ) -> Result<VoteResponse, TransportError> {
        self.post(peer, "/vote", request).await
    }

    async fn append_entries(
        &self,
        peer: &str,
        request: &AppendRequest,
    ) -> Result<AppendResponse, TransportError> {
        self.post(peer, "/append", request).await
    }
}

/// In-process network connecting [`ConsensusNode`]s by address.
///
/// Calls are delivered by invoking the target node's handlers directly.
/// Isolated nodes can neither send nor receive.
#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<String, Arc<ConsensusNode>>>,
    isolated: RwLock<HashSet<String>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the transport a node at `address` should be built with.
    pub fn transport_for(self: &Arc<Self>, address: impl Into<String>) -> Arc<dyn PeerTransport> {
        Arc::new(LocalTransport {
            network: Arc::clone(self),
            from: address.into(),
        })
    }

    /// Makes `node` reachable under its own address.
    pub fn register(&self, node: Arc<ConsensusNode>) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.address().to_string(), node);
    }

    /// Cuts `address` off from every other node.
    pub fn isolate(&self, address: &str) {
        self.isolated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string());
    }

    /// Reconnects a previously isolated node.
    pub fn heal(&self, address: &str) {
        self.isolated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }

    fn route(&self, from: &str, to: &str) -> Result<Arc<ConsensusNode>, TransportError> {
        let unreachable = || TransportError::Unreachable {
            peer: to.to_string(),
        };
        {
            let isolated = self.isolated.read().unwrap_or_else(PoisonError::into_inner);
            if isolated.contains(from) || isolated.contains(to) {
                return Err(unreachable());
            }
        }
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(to)
            .cloned()
            .ok_or_else(unreachable)
    }
}

struct LocalTransport {
    network: Arc<LocalNetwork>,
    from: String,
}

#[async_trait]
impl PeerTransport for LocalTransport {
    async fn request_vote(
        &self,
        peer: &str,
        request: &VoteRequest,
    ) -> Result<VoteResponse, TransportError> {
        let node = self.network.route(&self.from, peer)?;
        Ok(node.request_vote(request).await)
    }

    async fn append_entries(
        &self,
        peer: &str,
        request: &AppendRequest,
    ) -> Result<AppendResponse, TransportError> {
        let node = self.network.route(&self.from, peer)?;
        Ok(node.append_entries(request).await)
    }
}
