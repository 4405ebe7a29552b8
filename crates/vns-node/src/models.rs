//! Wire types shared by the HTTP API and the peer client.

use crate::discovery::DiscoveryStatus;
use crate::peer_table::KnownPeer;
use serde::{Deserialize, Serialize};
use vns_registry::{Delta, DeltaKind, Entry, PeerDescriptor};

/// Response to `POST /api/vns/push-delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushDeltaResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `GET /api/vns/peers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersResponse {
    pub success: bool,
    #[serde(default)]
    pub peers: Vec<PeerDescriptor>,
}

/// Response to `GET /api/vns/discovered`: the unauthenticated peer cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPeersResponse {
    pub success: bool,
    #[serde(default)]
    pub peers: Vec<KnownPeer>,
}

/// Endpoints field of a resolve response: a single URL or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoints {
    One(String),
    Many(Vec<String>),
}

impl Endpoints {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Endpoints::One(url) => vec![url],
            Endpoints::Many(urls) => urls,
        }
    }
}

/// Response to `GET /api/vns/resolve/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub entry: Entry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
}

impl ResolveResponse {
    /// Advertised endpoint URLs, falling back to the entry's ENDPOINT records.
    pub fn endpoint_urls(&self) -> Vec<String> {
        match &self.endpoints {
            Some(endpoints) => endpoints.clone().into_vec(),
            None => self.entry.endpoints().map(str::to_string).collect(),
        }
    }
}

/// Body of `POST /api/vns/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterRequest {
    /// A client-signed entry, admitted as is
    Signed { entry: Entry },
    /// A value the receiving node signs into its own entry
    Value {
        name: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
}

/// Body of `POST /api/vns/expire`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpireRequest {
    pub entry: Entry,
}

/// Response to register and expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DeltaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `GET /api/vns/entries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntriesResponse {
    pub success: bool,
    #[serde(default)]
    pub deltas: Vec<Delta>,
}

/// Response to `GET /api/vns/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub enabled: bool,
    pub node_id: String,
    pub entries: usize,
    pub merkle_root: String,
    pub bootstrap_peers: Vec<String>,
    pub discovered_peers: usize,
    pub discovery: DiscoveryStatus,
}

/// Plain error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_json() -> serde_json::Value {
        json!({
            "name": "bootstrap.vns",
            "owner": "o",
            "records": [{"type": "ENDPOINT", "value": "http://a:1"}],
            "nonce": 1,
            "timestamp": 1,
            "expires": 2,
            "signature": "",
            "publicKey": ""
        })
    }

    #[test]
    fn endpoints_one_or_many() {
        let one: ResolveResponse = serde_json::from_value(
            json!({"entry": entry_json(), "endpoints": "http://x:1"}),
        )
        .unwrap();
        assert_eq!(one.endpoint_urls(), vec!["http://x:1"]);

        let many: ResolveResponse = serde_json::from_value(
            json!({"entry": entry_json(), "endpoints": ["http://x:1", "http://y:1"]}),
        )
        .unwrap();
        assert_eq!(many.endpoint_urls().len(), 2);

        let fallback: ResolveResponse =
            serde_json::from_value(json!({"entry": entry_json()})).unwrap();
        assert_eq!(fallback.endpoint_urls(), vec!["http://a:1"]);
    }

    #[test]
    fn register_request_forms() {
        let value: RegisterRequest = serde_json::from_value(json!({
            "name": "bootstrap.vns",
            "value": "http://a:1",
            "role": "bootstrap"
        }))
        .unwrap();
        assert!(matches!(value, RegisterRequest::Value { role: Some(_), .. }));

        let signed: RegisterRequest =
            serde_json::from_value(json!({"entry": entry_json()})).unwrap();
        assert!(matches!(signed, RegisterRequest::Signed { .. }));
    }
}
