//! Error types for the VNS node.

use crate::client::TransportError;
use thiserror::Error;
use vns_registry::RegistryError;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Registry rejected an operation
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Outbound HTTP call failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
