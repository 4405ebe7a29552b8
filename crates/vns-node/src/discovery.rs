//! Bootstrap discovery.
//!
//! A node that knows no peers resolves a well-known name (`bootstrap.vns`)
//! through a few seed nodes. The name resolves to the ENDPOINT records of the
//! nodes that registered under it, which become this node's peer set.
//! Publicly reachable nodes register themselves under the same name.

use crate::bootstrap::{self, normalize_peer_url, BootstrapMode};
use crate::client::PeerClient;
use crate::models::RegisterRequest;
use crate::registrar::LocalRegistrar;
use crate::transport::{DeltaTransport, SyncHandle};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Role advertised by self-registration.
pub const BOOTSTRAP_ROLE: &str = "bootstrap";

/// Where discovery stands. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum DiscoveryPhase {
    Unconfigured,
    Parsed { mode: BootstrapMode },
    PeersKnown { mode: BootstrapMode, count: usize },
}

/// Discovery state reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStatus {
    #[serde(flatten)]
    pub phase: DiscoveryPhase,
    pub discovery_name: Option<String>,
    pub self_registered: bool,
}

impl Default for DiscoveryStatus {
    fn default() -> Self {
        Self {
            phase: DiscoveryPhase::Unconfigured,
            discovery_name: None,
            self_registered: false,
        }
    }
}

/// Finds peers through seeds and advertises this node.
pub struct DiscoveryService {
    client: PeerClient,
    transport: Arc<DeltaTransport>,
    registrar: Arc<LocalRegistrar>,
    public_url: Option<String>,
    status: RwLock<DiscoveryStatus>,
}

impl DiscoveryService {
    pub fn new(
        client: PeerClient,
        transport: Arc<DeltaTransport>,
        registrar: Arc<LocalRegistrar>,
        public_url: Option<String>,
    ) -> Self {
        Self {
            client,
            transport,
            registrar,
            public_url: public_url.and_then(|url| normalize_peer_url(&url)),
            status: RwLock::new(DiscoveryStatus::default()),
        }
    }

    pub async fn status(&self) -> DiscoveryStatus {
        self.status.read().await.clone()
    }

    /// Resolve `name` at every seed concurrently and union the endpoints.
    ///
    /// Seeds that fail or do not know the name are skipped; if none answers
    /// the result is empty.
    pub async fn discover(&self, name: &str, seeds: &[String]) -> BTreeSet<String> {
        if seeds.is_empty() {
            debug!("No seeds to discover {} through", name);
            return BTreeSet::new();
        }

        let queries = seeds.iter().map(|seed| async move {
            match self.client.resolve(seed, name).await {
                Ok(response) => {
                    let urls = response.endpoint_urls();
                    debug!("Seed {} resolved {} to {:?}", seed, name, urls);
                    urls
                }
                Err(e) if e.status() == Some(404) => {
                    debug!("Seed {} does not know {}", seed, name);
                    Vec::new()
                }
                Err(e) => {
                    warn!("Discovery via {} failed: {}", seed, e);
                    Vec::new()
                }
            }
        });

        let discovered: BTreeSet<String> = join_all(queries)
            .await
            .into_iter()
            .flatten()
            .filter_map(|url| normalize_peer_url(&url))
            .collect();

        if discovered.is_empty() {
            info!("Discovery of {} via {} seeds found no peers", name, seeds.len());
        } else {
            info!("Discovered {} peers under {}", discovered.len(), name);
        }
        discovered
    }

    /// Static peers of `raw` plus whatever discovery finds.
    ///
    /// With no seeds given, the static peers double as seeds.
    pub async fn expand(&self, raw: &str, seeds: &[String]) -> BTreeSet<String> {
        let config = bootstrap::parse(raw);
        let mode = config.mode();
        {
            let mut status = self.status.write().await;
            if status.phase == DiscoveryPhase::Unconfigured {
                status.phase = DiscoveryPhase::Parsed { mode };
            }
            if status.discovery_name.is_none() {
                status.discovery_name = config.discovery_name.clone();
            }
        }

        let mut peers: BTreeSet<String> = config.static_peers.iter().cloned().collect();
        if let Some(name) = &config.discovery_name {
            let seeds = if seeds.is_empty() {
                config.static_peers.as_slice()
            } else {
                seeds
            };
            peers.extend(self.discover(name, seeds).await);
        }
        peers
    }

    /// Expand `raw` and merge the result into the transport's peer set.
    /// Returns the size of the peer set afterwards.
    pub async fn bootstrap(&self, raw: &str, seeds: &[String]) -> usize {
        let mut peers = self.expand(raw, seeds).await;
        if let Some(own) = &self.public_url {
            peers.remove(own);
        }
        self.transport.extend_bootstrap_peers(peers).await;
        let count = self.transport.get_bootstrap_peers().await.len();

        let mut status = self.status.write().await;
        let mode = match status.phase {
            DiscoveryPhase::Parsed { mode } | DiscoveryPhase::PeersKnown { mode, .. } => mode,
            DiscoveryPhase::Unconfigured => BootstrapMode::Empty,
        };
        status.phase = DiscoveryPhase::PeersKnown { mode, count };
        count
    }

    /// Ask one seed to register `public_url` under `name`.
    pub async fn register_self(&self, name: &str, public_url: &str, seed: &str) -> bool {
        let request = RegisterRequest::Value {
            name: name.to_string(),
            value: public_url.to_string(),
            role: Some(BOOTSTRAP_ROLE.to_string()),
        };
        match self.client.register(seed, &request).await {
            Ok(response) if response.success => {
                info!("Registered {} under {} via {}", public_url, name, seed);
                self.mark_registered(name).await;
                true
            }
            Ok(response) => {
                warn!(
                    "Seed {} refused registration of {}: {}",
                    seed,
                    name,
                    response.error.unwrap_or_default()
                );
                false
            }
            Err(e) => {
                warn!("Self-registration via {} failed: {}", seed, e);
                false
            }
        }
    }

    /// Register `public_url` under `name` in the local registry and push it.
    pub async fn register_self_locally(&self, name: &str, public_url: &str) -> bool {
        match self
            .registrar
            .register_value(name, public_url, Some(BOOTSTRAP_ROLE))
            .await
        {
            Ok(mutation) => {
                info!("Registered {} under {} locally", public_url, name);
                self.transport.spawn_push(mutation.delta);
                self.mark_registered(name).await;
                true
            }
            Err(e) => {
                warn!("Local self-registration of {} failed: {}", name, e);
                false
            }
        }
    }

    /// Register through the first seed that accepts, or locally when there
    /// are no seeds.
    pub async fn announce(&self, name: &str, public_url: &str, seeds: &[String]) -> bool {
        if seeds.is_empty() {
            return self.register_self_locally(name, public_url).await;
        }
        for seed in seeds {
            if self.register_self(name, public_url, seed).await {
                return true;
            }
        }
        warn!("No seed accepted self-registration under {}", name);
        false
    }

    /// Re-run [`DiscoveryService::bootstrap`] every `interval`.
    pub fn start_rediscovery(
        self: &Arc<Self>,
        raw: String,
        seeds: Vec<String>,
        interval: Duration,
    ) -> SyncHandle {
        info!("Periodic rediscovery every {:?}", interval);
        let service = Arc::clone(self);
        let raw = Arc::new(raw);
        let seeds = Arc::new(seeds);
        SyncHandle::spawn_interval(interval, move || {
            let service = Arc::clone(&service);
            let raw = Arc::clone(&raw);
            let seeds = Arc::clone(&seeds);
            async move {
                service.bootstrap(&raw, &seeds).await;
            }
        })
    }

    async fn mark_registered(&self, name: &str) {
        let mut status = self.status.write().await;
        status.self_registered = true;
        if status.discovery_name.is_none() {
            status.discovery_name = Some(name.to_string());
        }
    }
}
