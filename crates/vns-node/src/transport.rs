//! Delta replication over HTTP.
//!
//! Pushes go to every bootstrap peer at once, each call bounded by its own
//! timeout. Pulls fetch a peer's signed snapshot and merge it through the
//! verifying registry path; peer lists from the same peer land in the
//! ephemeral [`PeerTable`].

use crate::bootstrap::normalize_peer_url;
use crate::client::PeerClient;
use crate::peer_table::PeerTable;
use crate::SharedRegistry;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vns_registry::{Clock, Delta};

/// Outcome of pushing a delta to one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerPushResult {
    pub peer: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of pushing a delta to all peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    /// At least one peer accepted the request
    pub overall_success: bool,
    pub per_peer: Vec<PeerPushResult>,
}

/// Outcome of one pull from a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub peer: String,
    pub success: bool,
    /// Deltas the local registry accepted
    pub entries_synced: usize,
    /// Peer descriptors the peer reported
    pub peers_discovered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle to a background loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct SyncHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Run `tick` now and then every `interval` until cancelled.
    pub fn spawn_interval<F, Fut>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, mut cancel_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    // Fires on an explicit cancel and when the sender is dropped.
                    _ = &mut cancel_rx => break,
                    _ = ticker.tick() => tick().await,
                }
            }
        });

        Self { cancel, task }
    }

    /// Stop the loop and wait for the current tick to finish.
    pub async fn cancel(self) {
        let SyncHandle { cancel, task } = self;
        let _ = cancel.send(());
        if let Err(e) = task.await {
            warn!("Background loop ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Resets the sync flag when a sync pass ends, however it ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Replicates deltas to and from the bootstrap peer set.
pub struct DeltaTransport {
    client: PeerClient,
    registry: SharedRegistry,
    peer_table: Arc<RwLock<PeerTable>>,
    bootstrap_peers: RwLock<Vec<String>>,
    clock: Arc<dyn Clock>,
    node_id: String,
    peer_ttl: Option<Duration>,
    syncing: AtomicBool,
}

impl DeltaTransport {
    pub fn new(
        client: PeerClient,
        registry: SharedRegistry,
        peer_table: Arc<RwLock<PeerTable>>,
        clock: Arc<dyn Clock>,
        node_id: impl Into<String>,
        peer_ttl: Option<Duration>,
    ) -> Self {
        Self {
            client,
            registry,
            peer_table,
            bootstrap_peers: RwLock::new(Vec::new()),
            clock,
            node_id: node_id.into(),
            peer_ttl,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn peer_table(&self) -> Arc<RwLock<PeerTable>> {
        Arc::clone(&self.peer_table)
    }

    /// Whether a sync pass is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    // --- Peer set ---

    /// Replace the peer set. Invalid URLs are dropped, duplicates collapsed.
    pub async fn update_bootstrap_peers(&self, peers: impl IntoIterator<Item = String>) {
        let mut normalized = Vec::new();
        merge_peers(&mut normalized, peers);
        info!("Bootstrap peers set to {:?}", normalized);
        *self.bootstrap_peers.write().await = normalized;
    }

    /// Add peers to the set. Returns how many were new.
    pub async fn extend_bootstrap_peers(&self, peers: impl IntoIterator<Item = String>) -> usize {
        let mut current = self.bootstrap_peers.write().await;
        let added = merge_peers(&mut current, peers);
        if added > 0 {
            info!("Added {} bootstrap peers ({} total)", added, current.len());
        }
        added
    }

    pub async fn get_bootstrap_peers(&self) -> Vec<String> {
        self.bootstrap_peers.read().await.clone()
    }

    // --- Push ---

    /// Push a delta to every bootstrap peer concurrently.
    pub async fn push_delta(&self, delta: &Delta) -> PushReport {
        let peers = self.get_bootstrap_peers().await;
        if peers.is_empty() {
            debug!("No peers to push {} to", delta.entry.name);
            return PushReport::default();
        }

        let pushes = peers.iter().map(|peer| async move {
            match self.client.push_delta(peer, delta).await {
                Ok(_) => PeerPushResult {
                    peer: peer.clone(),
                    success: true,
                    error: None,
                },
                Err(e) => {
                    debug!("Push of {} to {} failed: {}", delta.entry.name, peer, e);
                    PeerPushResult {
                        peer: peer.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        });
        let per_peer = join_all(pushes).await;
        let delivered = per_peer.iter().filter(|r| r.success).count();
        debug!(
            "Pushed {} to {}/{} peers",
            delta.entry.name,
            delivered,
            per_peer.len()
        );

        PushReport {
            overall_success: delivered > 0,
            per_peer,
        }
    }

    /// Push in the background.
    pub fn spawn_push(self: &Arc<Self>, delta: Delta) -> JoinHandle<PushReport> {
        let transport = Arc::clone(self);
        tokio::spawn(async move { transport.push_delta(&delta).await })
    }

    // --- Pull ---

    /// Pull one peer's snapshot and peer list.
    pub async fn sync_from_bootstrap(&self, peer: &str) -> SyncReport {
        let mut report = SyncReport {
            peer: peer.to_string(),
            ..Default::default()
        };

        let (entries, peers) = tokio::join!(
            self.client.fetch_entries(peer),
            self.client.fetch_peers(peer)
        );

        let deltas = match entries {
            Ok(deltas) => deltas,
            Err(e) => {
                warn!("Sync from {} failed: {}", peer, e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.success = true;
        {
            let mut registry = self.registry.write().await;
            for delta in &deltas {
                match registry.apply_delta(delta) {
                    Ok(outcome) if outcome.is_accepted() => report.entries_synced += 1,
                    Ok(_) => {}
                    Err(e) => warn!("Failed to apply {} from {}: {}", delta.entry.name, peer, e),
                }
            }
        }

        match peers {
            Ok(descriptors) => {
                report.peers_discovered = descriptors.len();
                let now = self.clock.now_millis();
                let mut table = self.peer_table.write().await;
                for descriptor in descriptors {
                    table.upsert(descriptor, peer, now);
                }
            }
            Err(e) => {
                // The snapshot still counts; only the peer list is missing.
                warn!("Peer list from {} unavailable: {}", peer, e);
                report.error = Some(e.to_string());
            }
        }

        if report.entries_synced > 0 {
            info!(
                "Synced {}/{} entries from {}",
                report.entries_synced,
                deltas.len(),
                peer
            );
        }
        report
    }

    /// Pull from every bootstrap peer concurrently. Skipped (empty result) if
    /// another pass is still running.
    pub async fn sync_from_all_bootstraps(&self) -> Vec<SyncReport> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!("Sync already in progress, skipping");
            return Vec::new();
        }
        let _guard = SyncGuard(&self.syncing);

        let peers = self.get_bootstrap_peers().await;
        let reports = join_all(peers.iter().map(|peer| self.sync_from_bootstrap(peer))).await;

        let ok = reports.iter().filter(|r| r.success).count();
        debug!("Sync pass finished: {}/{} peers reachable", ok, reports.len());
        reports
    }

    /// Drop peer-table entries older than the configured TTL.
    pub async fn prune_peers(&self) -> usize {
        let Some(ttl) = self.peer_ttl else {
            return 0;
        };
        let now = self.clock.now_millis();
        let pruned = self
            .peer_table
            .write()
            .await
            .prune(ttl.as_millis() as u64, now);
        if pruned > 0 {
            info!("Pruned {} stale discovered peers", pruned);
        }
        pruned
    }

    /// Sync now and then every `interval` until the handle is cancelled.
    pub fn start_periodic_sync(self: &Arc<Self>, interval: Duration) -> SyncHandle {
        info!("Periodic sync every {:?}", interval);
        let transport = Arc::clone(self);
        SyncHandle::spawn_interval(interval, move || {
            let transport = Arc::clone(&transport);
            async move {
                transport.sync_from_all_bootstraps().await;
                transport.prune_peers().await;
            }
        })
    }
}

/// Append normalized, previously unseen peers. Returns how many were added.
fn merge_peers(current: &mut Vec<String>, peers: impl IntoIterator<Item = String>) -> usize {
    let mut added = 0;
    for peer in peers {
        match normalize_peer_url(peer.trim()) {
            Some(url) if !current.contains(&url) => {
                current.push(url);
                added += 1;
            }
            Some(_) => {}
            None => warn!("Ignoring invalid peer URL {:?}", peer),
        }
    }
    added
}
