//! HTTP client for talking to other VNS nodes.

use crate::models::{
    EntriesResponse, MutationResponse, PeersResponse, PushDeltaResponse, RegisterRequest,
    ResolveResponse,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use vns_registry::{Delta, PeerDescriptor};

/// Errors from a single outbound call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("peer answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connection(e.to_string())
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Http(e)
        }
    }
}

impl TransportError {
    /// HTTP status, if the peer answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Peer API client. Every call carries its own timeout.
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: Client,
    timeout: Duration,
}

impl PeerClient {
    /// Create a new client with the given per-call timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Push one delta to a peer.
    pub async fn push_delta(
        &self,
        peer: &str,
        delta: &Delta,
    ) -> Result<PushDeltaResponse, TransportError> {
        let response = self
            .client
            .post(endpoint(peer, "/api/vns/push-delta"))
            .json(delta)
            .send()
            .await?;
        decode(response).await
    }

    /// Pull the peer's signed snapshot.
    pub async fn fetch_entries(&self, peer: &str) -> Result<Vec<Delta>, TransportError> {
        let response = self.client.get(endpoint(peer, "/api/vns/entries")).send().await?;
        let body: EntriesResponse = decode(response).await?;
        Ok(body.deltas)
    }

    /// Pull the peer's advertised peer list.
    pub async fn fetch_peers(&self, peer: &str) -> Result<Vec<PeerDescriptor>, TransportError> {
        let response = self.client.get(endpoint(peer, "/api/vns/peers")).send().await?;
        let body: PeersResponse = decode(response).await?;
        Ok(body.peers)
    }

    /// Resolve a name at a peer.
    pub async fn resolve(&self, peer: &str, name: &str) -> Result<ResolveResponse, TransportError> {
        let path = format!("/api/vns/resolve/{}", name);
        let response = self.client.get(endpoint(peer, &path)).send().await?;
        decode(response).await
    }

    /// Submit a registration to a peer.
    pub async fn register(
        &self,
        peer: &str,
        request: &RegisterRequest,
    ) -> Result<MutationResponse, TransportError> {
        let response = self
            .client
            .post(endpoint(peer, "/api/vns/register"))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }
}

fn endpoint(peer: &str, path: &str) -> String {
    format!("{}{}", peer.trim_end_matches('/'), path)
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_paths() {
        assert_eq!(endpoint("http://a:1", "/api/vns/peers"), "http://a:1/api/vns/peers");
        assert_eq!(endpoint("http://a:1/", "/api/vns/peers"), "http://a:1/api/vns/peers");
    }

    #[tokio::test]
    async fn connection_refused_is_structured() {
        // Bind and drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = PeerClient::new(Duration::from_secs(2)).unwrap();
        let err = client.fetch_peers(&format!("http://{}", addr)).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_) | TransportError::Http(_)));
        assert!(err.status().is_none());
    }

    #[tokio::test]
    async fn hanging_peer_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without answering.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = PeerClient::new(Duration::from_millis(200)).unwrap();
        let err = client.fetch_entries(&format!("http://{}", addr)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }
}
