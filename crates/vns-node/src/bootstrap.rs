//! Bootstrap configuration parsing.
//!
//! The bootstrap string is a comma-separated list of tokens. A token is either
//! a peer URL (`http://a:3001`) or a discovery name (`bootstrap.vns`, also
//! accepted as `seed:bootstrap.vns`). Both kinds may be mixed.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;
use vns_registry::validate_name;

const SEED_PREFIX: &str = "seed:";
const DISCOVERY_SUFFIX: &str = ".vns";

/// How a node finds its first peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BootstrapMode {
    /// No peers and no discovery: first node of a network
    Empty,
    /// Fixed peer URLs only
    StaticOnly,
    /// Discovery name only
    DiscoverySeeded,
    /// Fixed peers plus discovery
    Hybrid,
}

/// Parsed bootstrap string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Peer URLs in first-seen order, without duplicates
    pub static_peers: Vec<String>,
    pub discovery_enabled: bool,
    pub discovery_name: Option<String>,
}

impl BootstrapConfig {
    pub fn mode(&self) -> BootstrapMode {
        match (self.static_peers.is_empty(), self.discovery_enabled) {
            (true, false) => BootstrapMode::Empty,
            (false, false) => BootstrapMode::StaticOnly,
            (true, true) => BootstrapMode::DiscoverySeeded,
            (false, true) => BootstrapMode::Hybrid,
        }
    }
}

/// Parse a bootstrap string. Never fails; bad tokens are dropped with a warning.
pub fn parse(raw: &str) -> BootstrapConfig {
    let mut config = BootstrapConfig::default();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Some(name) = discovery_token(token) {
            match &config.discovery_name {
                None => {
                    config.discovery_enabled = true;
                    config.discovery_name = Some(name.to_string());
                }
                Some(existing) if existing != name => {
                    warn!("Ignoring discovery name {} (already using {})", name, existing);
                }
                Some(_) => {}
            }
            continue;
        }

        match normalize_peer_url(token) {
            Some(url) => {
                if !config.static_peers.contains(&url) {
                    config.static_peers.push(url);
                }
            }
            None => warn!("Dropping malformed bootstrap token {:?}", token),
        }
    }

    config
}

/// `<name>.vns` or `seed:<name>.vns`, returning the name.
fn discovery_token(token: &str) -> Option<&str> {
    let name = token.strip_prefix(SEED_PREFIX).unwrap_or(token).trim();
    (name.ends_with(DISCOVERY_SUFFIX) && !name.contains("://") && validate_name(name))
        .then_some(name)
}

/// Accept `http`/`https` URLs with a host; strip a trailing slash.
pub fn normalize_peer_url(token: &str) -> Option<String> {
    let url = Url::parse(token).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        return None;
    }
    Some(token.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_peers_only() {
        let config = parse("http://a:3001,http://b:3001");
        assert_eq!(config.static_peers, vec!["http://a:3001", "http://b:3001"]);
        assert!(!config.discovery_enabled);
        assert_eq!(config.discovery_name, None);
        assert_eq!(config.mode(), BootstrapMode::StaticOnly);
    }

    #[test]
    fn discovery_name_only() {
        let config = parse("bootstrap.vns");
        assert!(config.discovery_enabled);
        assert_eq!(config.discovery_name.as_deref(), Some("bootstrap.vns"));
        assert!(config.static_peers.is_empty());
        assert_eq!(config.mode(), BootstrapMode::DiscoverySeeded);
    }

    #[test]
    fn seed_prefix_is_stripped() {
        let config = parse("seed:bootstrap.vns");
        assert!(config.discovery_enabled);
        assert_eq!(config.discovery_name.as_deref(), Some("bootstrap.vns"));
    }

    #[test]
    fn hybrid() {
        let config = parse("http://a:3001,bootstrap.vns");
        assert_eq!(config.static_peers, vec!["http://a:3001"]);
        assert!(config.discovery_enabled);
        assert_eq!(config.mode(), BootstrapMode::Hybrid);
    }

    #[test]
    fn empty_and_whitespace() {
        assert_eq!(parse("").mode(), BootstrapMode::Empty);
        assert_eq!(parse(" , ,, ").mode(), BootstrapMode::Empty);
        let config = parse("  http://a:3001 ,  ");
        assert_eq!(config.static_peers, vec!["http://a:3001"]);
    }

    #[test]
    fn malformed_tokens_dropped() {
        let config = parse("not a url,ftp://x:1,http://,http://ok:1,alice.vfs");
        assert_eq!(config.static_peers, vec!["http://ok:1"]);
        assert!(!config.discovery_enabled);
    }

    #[test]
    fn duplicates_and_trailing_slash() {
        let config = parse("http://a:3001/,http://a:3001,https://b");
        assert_eq!(config.static_peers, vec!["http://a:3001", "https://b"]);
    }

    #[test]
    fn first_discovery_name_wins() {
        let config = parse("one.vns,seed:two.vns,one.vns");
        assert_eq!(config.discovery_name.as_deref(), Some("one.vns"));
    }
}
