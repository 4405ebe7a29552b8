//! Node configuration.

use crate::error::{Error, Result};
use std::net::SocketAddr;
#[cfg(feature = "rocksdb")]
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use vns_registry::pow::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};

/// Name a node registers itself under when the bootstrap string names none.
pub const DEFAULT_DISCOVERY_NAME: &str = "bootstrap.vns";

const THIRTY_DAYS_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Configuration for a VNS node.
#[derive(Debug, Clone)]
pub struct VnsConfig {
    /// HTTP API listen address
    pub api_addr: SocketAddr,

    /// Raw bootstrap string: peer URLs and/or a `*.vns` discovery token
    pub bootstrap_peers: String,

    /// Seeds queried for the discovery name
    pub seed_urls: Vec<String>,

    /// URL this node advertises; `None` disables self-registration
    pub public_url: Option<String>,

    /// Name used for self-registration when the bootstrap string has none
    pub discovery_name: String,

    /// Feature flag
    pub enabled: bool,

    /// Periodic pull interval
    pub sync_interval: Duration,

    /// Per-call timeout for outbound requests
    pub peer_timeout: Duration,

    /// Delay before self-registration after startup
    pub self_register_delay: Duration,

    /// Required leading zero bits for registrations
    pub pow_difficulty: u32,

    /// Lifetime of entries this node signs
    pub entry_ttl: Duration,

    /// Drop discovered peers not seen for this long; `None` keeps them
    pub peer_ttl: Option<Duration>,

    /// Re-run discovery on every sync interval
    pub rediscovery: bool,

    /// Hex 32-byte node key seed; random when absent
    pub node_key: Option<String>,

    /// Storage directory; in-memory registry when absent
    #[cfg(feature = "rocksdb")]
    pub data_dir: Option<PathBuf>,
}

impl Default for VnsConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            bootstrap_peers: String::new(),
            seed_urls: Vec::new(),
            public_url: None,
            discovery_name: DEFAULT_DISCOVERY_NAME.to_string(),
            enabled: true,
            sync_interval: Duration::from_millis(60_000),
            peer_timeout: Duration::from_millis(5_000),
            self_register_delay: Duration::from_millis(3_000),
            pow_difficulty: DEFAULT_DIFFICULTY,
            entry_ttl: Duration::from_millis(THIRTY_DAYS_MS),
            peer_ttl: None,
            rediscovery: false,
            node_key: None,
            #[cfg(feature = "rocksdb")]
            data_dir: None,
        }
    }
}

impl VnsConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(v) = var("VNS_API_ADDR") {
            config.api_addr = parse_value("VNS_API_ADDR", &v)?;
        }
        if let Some(v) = var("VNS_BOOTSTRAP_PEERS") {
            config.bootstrap_peers = v;
        }
        if let Some(v) = var("VNS_SEED_URLS") {
            config.seed_urls = v
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = var("VNS_PUBLIC_URL") {
            let url = v.trim_end_matches('/');
            config.public_url = (!url.is_empty()).then(|| url.to_string());
        }
        if let Some(v) = var("VNS_DISCOVERY_NAME").filter(|v| !v.is_empty()) {
            config.discovery_name = v;
        }
        if let Some(v) = var("VNS_ENABLED") {
            config.enabled = parse_bool("VNS_ENABLED", &v)?;
        }
        if let Some(v) = var("VNS_SYNC_INTERVAL_MS") {
            config.sync_interval = parse_millis("VNS_SYNC_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("VNS_PEER_TIMEOUT_MS") {
            config.peer_timeout = parse_millis("VNS_PEER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("VNS_SELF_REGISTER_DELAY_MS") {
            config.self_register_delay = parse_millis("VNS_SELF_REGISTER_DELAY_MS", &v)?;
        }
        if let Some(v) = var("VNS_POW_DIFFICULTY") {
            config.pow_difficulty = parse_value("VNS_POW_DIFFICULTY", &v)?;
        }
        if let Some(v) = var("VNS_ENTRY_TTL_MS") {
            config.entry_ttl = parse_millis("VNS_ENTRY_TTL_MS", &v)?;
        }
        if let Some(v) = var("VNS_PEER_TTL_MS") {
            let ttl = parse_millis("VNS_PEER_TTL_MS", &v)?;
            config.peer_ttl = (!ttl.is_zero()).then_some(ttl);
        }
        if let Some(v) = var("VNS_REDISCOVERY") {
            config.rediscovery = parse_bool("VNS_REDISCOVERY", &v)?;
        }
        if let Some(v) = var("VNS_NODE_KEY").filter(|v| !v.is_empty()) {
            config.node_key = Some(v);
        }
        #[cfg(feature = "rocksdb")]
        if let Some(v) = var("VNS_DATA_DIR").filter(|v| !v.is_empty()) {
            config.data_dir = Some(PathBuf::from(v));
        }

        if config.sync_interval.is_zero() {
            return Err(Error::Config("VNS_SYNC_INTERVAL_MS must be positive".into()));
        }
        if config.pow_difficulty > MAX_DIFFICULTY {
            return Err(Error::Config(format!(
                "VNS_POW_DIFFICULTY must be at most {}",
                MAX_DIFFICULTY
            )));
        }
        if config.entry_ttl.is_zero() {
            return Err(Error::Config("VNS_ENTRY_TTL_MS must be positive".into()));
        }

        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, value, e)))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_value::<u64>(key, value).map(Duration::from_millis)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("invalid {}={:?}: expected a boolean", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<VnsConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        VnsConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.api_addr.port(), 3001);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.peer_timeout, Duration::from_secs(5));
        assert_eq!(config.self_register_delay, Duration::from_secs(3));
        assert_eq!(config.pow_difficulty, 12);
        assert_eq!(config.discovery_name, "bootstrap.vns");
        assert!(config.enabled);
        assert!(config.public_url.is_none());
        assert!(config.peer_ttl.is_none());
    }

    #[test]
    fn overrides() {
        let config = from_pairs(&[
            ("VNS_API_ADDR", "127.0.0.1:4000"),
            ("VNS_BOOTSTRAP_PEERS", "http://a:3001,bootstrap.vns"),
            ("VNS_SEED_URLS", "http://s1:3001/, ,http://s2:3001"),
            ("VNS_PUBLIC_URL", "http://me:4000/"),
            ("VNS_ENABLED", "false"),
            ("VNS_SYNC_INTERVAL_MS", "250"),
            ("VNS_PEER_TTL_MS", "1000"),
            ("VNS_REDISCOVERY", "yes"),
        ])
        .unwrap();
        assert_eq!(config.api_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.bootstrap_peers, "http://a:3001,bootstrap.vns");
        assert_eq!(config.seed_urls, vec!["http://s1:3001", "http://s2:3001"]);
        assert_eq!(config.public_url.as_deref(), Some("http://me:4000"));
        assert!(!config.enabled);
        assert_eq!(config.sync_interval, Duration::from_millis(250));
        assert_eq!(config.peer_ttl, Some(Duration::from_secs(1)));
        assert!(config.rediscovery);
    }

    #[test]
    fn zero_peer_ttl_disables_pruning() {
        let config = from_pairs(&[("VNS_PEER_TTL_MS", "0")]).unwrap();
        assert!(config.peer_ttl.is_none());
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(from_pairs(&[("VNS_API_ADDR", "nope")]), Err(Error::Config(_))));
        assert!(matches!(from_pairs(&[("VNS_ENABLED", "maybe")]), Err(Error::Config(_))));
        assert!(matches!(from_pairs(&[("VNS_SYNC_INTERVAL_MS", "0")]), Err(Error::Config(_))));
        assert!(matches!(from_pairs(&[("VNS_POW_DIFFICULTY", "-1")]), Err(Error::Config(_))));
    }

    #[test]
    fn difficulty_bounded_by_digest_size() {
        let config = from_pairs(&[("VNS_POW_DIFFICULTY", "256")]).unwrap();
        assert_eq!(config.pow_difficulty, 256);
        assert!(matches!(
            from_pairs(&[("VNS_POW_DIFFICULTY", "257")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("VNS_POW_DIFFICULTY", "300")]),
            Err(Error::Config(_))
        ));
    }
}
