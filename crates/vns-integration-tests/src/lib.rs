//! Test harness: real VNS nodes on ephemeral localhost ports.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use vns_node::{RunningNode, VnsConfig, VnsNode};

/// Low difficulty keeps registrations fast in tests.
pub const TEST_DIFFICULTY: u32 = 6;

/// Options for one test node.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub bootstrap: String,
    pub seeds: Vec<String>,
    /// Advertise the node's own URL and self-register
    pub advertise: bool,
    pub sync_interval: Option<Duration>,
    pub peer_timeout: Option<Duration>,
}

impl NodeOptions {
    pub fn bootstrap(raw: impl Into<String>) -> Self {
        Self {
            bootstrap: raw.into(),
            ..Default::default()
        }
    }

    pub fn seeds(mut self, seeds: Vec<String>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn advertise(mut self) -> Self {
        self.advertise = true;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    pub fn peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = Some(timeout);
        self
    }
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vns_node=warn,vns_registry=warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Start a node on `127.0.0.1:0`.
pub async fn spawn_node(options: NodeOptions) -> RunningNode {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let config = VnsConfig {
        api_addr: listener.local_addr().unwrap(),
        bootstrap_peers: options.bootstrap,
        seed_urls: options.seeds,
        public_url: options.advertise.then_some(url),
        pow_difficulty: TEST_DIFFICULTY,
        sync_interval: options.sync_interval.unwrap_or(Duration::from_millis(200)),
        peer_timeout: options.peer_timeout.unwrap_or(Duration::from_secs(2)),
        self_register_delay: Duration::ZERO,
        ..Default::default()
    };

    VnsNode::new(config)
        .unwrap()
        .start_with_listener(listener)
        .await
        .unwrap()
}

/// A URL on which nothing listens.
pub fn dead_peer() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// A peer that accepts connections and never answers.
pub async fn hanging_peer() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (url, task)
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Merkle root a node reports over HTTP.
pub async fn merkle_root(node: &RunningNode) -> String {
    let status: serde_json::Value = reqwest::get(format!("{}/api/vns/status", node.url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    status["merkleRoot"].as_str().unwrap_or_default().to_string()
}

/// Register a text value on a node over HTTP.
pub async fn register_text(node: &RunningNode, name: &str, value: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/vns/register", node.url()))
        .json(&serde_json::json!({ "name": name, "value": value }))
        .send()
        .await
        .unwrap()
}
