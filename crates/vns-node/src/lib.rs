//! VNS Node - replication and discovery for the VNS name registry
//!
//! A node holds one replica of the registry, pushes the deltas of local writes
//! to its bootstrap peers, and periodically pulls their signed snapshots.
//! A node that knows no peers finds them by resolving a well-known name
//! through seed nodes.
//!
//! # Architecture
//!
//! - **Bootstrap**: parses the bootstrap string into static peers and a discovery name
//! - **Discovery**: resolves the discovery name through seeds, registers this node
//! - **Transport**: pushes deltas, pulls snapshots, runs the periodic sync
//! - **Registrar**: signs and admits writes made through this node
//! - **API**: HTTP endpoints under `/api/vns`
//!
//! # Example
//!
//! ```no_run
//! use vns_node::{VnsConfig, VnsNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = VnsConfig::from_env()?;
//!     let node = VnsNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod models;
pub mod node;
pub mod peer_table;
pub mod registrar;
pub mod transport;

use std::sync::Arc;
use tokio::sync::RwLock;
use vns_registry::NameRegistry;

/// The registry replica shared by every component of a node.
///
/// Writers hold the write lock across read-compare-write, so merging a delta
/// is atomic per name.
pub type SharedRegistry = Arc<RwLock<dyn NameRegistry>>;

pub use bootstrap::{parse as parse_bootstrap, BootstrapConfig, BootstrapMode};
pub use client::{PeerClient, TransportError};
pub use config::VnsConfig;
pub use discovery::{DiscoveryPhase, DiscoveryService, DiscoveryStatus};
pub use error::{Error, Result};
pub use node::{NodeState, RunningNode, VnsNode};
pub use peer_table::{KnownPeer, PeerTable};
pub use registrar::{LocalRegistrar, Mutation};
pub use transport::{DeltaTransport, PeerPushResult, PushReport, SyncHandle, SyncReport};
