//! VNS Node - wiring, startup and shutdown.
//!
//! Startup order:
//! 1. HTTP server on the API address
//! 2. One discovery pass over the bootstrap string and seeds
//! 3. Periodic sync (first pass runs immediately)
//! 4. Optional periodic rediscovery
//! 5. Self-registration after a short delay, once the listener is serving

use crate::api;
use crate::bootstrap;
use crate::client::PeerClient;
use crate::config::VnsConfig;
use crate::discovery::DiscoveryService;
use crate::error::Result;
use crate::peer_table::PeerTable;
use crate::registrar::LocalRegistrar;
use crate::transport::{DeltaTransport, SyncHandle};
use crate::SharedRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vns_registry::{Clock, Ed25519Verifier, Identity, MemoryRegistry, RegistryConfig, SystemClock};
#[cfg(feature = "rocksdb")]
use vns_registry::RocksRegistry;

/// Shared state for the node - one registry shared by all components.
pub struct NodeState {
    pub config: VnsConfig,
    pub registry: SharedRegistry,
    pub registrar: Arc<LocalRegistrar>,
    pub transport: Arc<DeltaTransport>,
    pub discovery: Arc<DiscoveryService>,
}

impl NodeState {
    /// Identifier stamped on deltas this node originates.
    pub fn node_id(&self) -> &str {
        self.registrar.node_id()
    }
}

/// A VNS node instance.
pub struct VnsNode {
    state: Arc<NodeState>,
}

impl VnsNode {
    /// Create a new node. Nothing runs until [`VnsNode::start`].
    pub fn new(config: VnsConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (registry, stored_identity) = open_registry(&config, Arc::clone(&clock))?;

        let identity = match &config.node_key {
            Some(seed) => Identity::from_hex(seed)?,
            None => stored_identity.unwrap_or_else(Identity::generate),
        };

        let client = PeerClient::new(config.peer_timeout)?;
        let registrar = Arc::new(LocalRegistrar::new(
            Arc::clone(&registry),
            identity,
            Arc::clone(&clock),
            config.pow_difficulty,
            config.entry_ttl,
        ));
        let transport = Arc::new(DeltaTransport::new(
            client.clone(),
            Arc::clone(&registry),
            Arc::new(RwLock::new(PeerTable::new())),
            clock,
            registrar.node_id(),
            config.peer_ttl,
        ));
        let discovery = Arc::new(DiscoveryService::new(
            client,
            Arc::clone(&transport),
            Arc::clone(&registrar),
            config.public_url.clone(),
        ));

        let state = Arc::new(NodeState {
            config,
            registry,
            registrar,
            transport,
            discovery,
        });

        Ok(Self { state })
    }

    /// Get the shared state.
    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Bind the configured API address and start.
    pub async fn start(self) -> Result<RunningNode> {
        let listener = TcpListener::bind(self.state.config.api_addr).await?;
        self.start_with_listener(listener).await
    }

    /// Start on an already bound listener.
    pub async fn start_with_listener(self, listener: TcpListener) -> Result<RunningNode> {
        let state = self.state;
        let config = &state.config;
        let local_addr = listener.local_addr()?;

        info!("VNS node starting");
        info!("  API: http://{}", local_addr);
        info!("  Node: {}", state.node_id());
        info!("  Public URL: {}", config.public_url.as_deref().unwrap_or("(none)"));
        info!("  Bootstrap: {:?}", config.bootstrap_peers);

        // Start HTTP server
        let app = api::build_router(Arc::clone(&state));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        info!("HTTP server listening on {}", local_addr);

        let mut loops = Vec::new();
        let mut self_register = None;

        if config.enabled {
            let parsed = bootstrap::parse(&config.bootstrap_peers);
            let peers = state
                .discovery
                .bootstrap(&config.bootstrap_peers, &config.seed_urls)
                .await;
            info!("Starting with {} bootstrap peers ({:?})", peers, parsed.mode());

            loops.push(state.transport.start_periodic_sync(config.sync_interval));

            if config.rediscovery && parsed.discovery_enabled {
                loops.push(state.discovery.start_rediscovery(
                    config.bootstrap_peers.clone(),
                    config.seed_urls.clone(),
                    config.sync_interval,
                ));
            }

            if let Some(public_url) = config.public_url.clone() {
                let name = parsed
                    .discovery_name
                    .clone()
                    .unwrap_or_else(|| config.discovery_name.clone());
                let seeds = if config.seed_urls.is_empty() {
                    parsed.static_peers.clone()
                } else {
                    config.seed_urls.clone()
                };
                let discovery = Arc::clone(&state.discovery);
                let delay = config.self_register_delay;
                self_register = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    discovery.announce(&name, &public_url, &seeds).await;
                }));
            }
        } else {
            info!("VNS disabled; serving health and status only");
        }

        Ok(RunningNode {
            local_addr,
            state,
            server,
            shutdown: shutdown_tx,
            loops,
            self_register,
        })
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let node = self.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested");
        node.shutdown().await
    }
}

/// A started node.
pub struct RunningNode {
    local_addr: SocketAddr,
    state: Arc<NodeState>,
    server: JoinHandle<std::io::Result<()>>,
    shutdown: oneshot::Sender<()>,
    loops: Vec<SyncHandle>,
    self_register: Option<JoinHandle<()>>,
}

impl RunningNode {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL of the HTTP API.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Wait for the delayed self-registration to finish, if one was scheduled.
    pub async fn self_registration(&mut self) {
        if let Some(task) = self.self_register.take() {
            if let Err(e) = task.await {
                warn!("Self-registration task failed: {}", e);
            }
        }
    }

    /// Cancel background loops and stop the HTTP server.
    pub async fn shutdown(self) -> Result<()> {
        if let Some(task) = &self.self_register {
            task.abort();
        }
        for handle in self.loops {
            handle.cancel().await;
        }
        let _ = self.shutdown.send(());
        match self.server.await {
            Ok(result) => result?,
            Err(e) => warn!("HTTP server task failed: {}", e),
        }
        info!("VNS node stopped");
        Ok(())
    }
}

type OpenedRegistry = (SharedRegistry, Option<Identity>);

/// Open the configured backend; persisted backends also hold the node key.
fn open_registry(config: &VnsConfig, clock: Arc<dyn Clock>) -> Result<OpenedRegistry> {
    let registry_config = RegistryConfig {
        difficulty: config.pow_difficulty,
        enabled: config.enabled,
    };

    #[cfg(feature = "rocksdb")]
    if let Some(dir) = &config.data_dir {
        std::fs::create_dir_all(dir)?;
        let registry = RocksRegistry::open(dir, registry_config, Arc::new(Ed25519Verifier), clock)?;
        let identity = registry.node_identity()?;
        info!("  Data: {:?}", dir);
        let registry: SharedRegistry = Arc::new(RwLock::new(registry));
        return Ok((registry, Some(identity)));
    }

    let registry: SharedRegistry = Arc::new(RwLock::new(MemoryRegistry::new(
        registry_config,
        Arc::new(Ed25519Verifier),
        clock,
    )));
    Ok((registry, None))
}
