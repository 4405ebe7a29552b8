//! HTTP API for the VNS node.

use crate::error::Error;
use crate::models::{
    DiscoveredPeersResponse, Endpoints, EntriesResponse, ErrorResponse, ExpireRequest,
    MutationResponse, PeersResponse, PushDeltaResponse, RegisterRequest, ResolveResponse,
    StatusResponse,
};
use crate::node::NodeState;
use crate::registrar::Mutation;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use vns_registry::{ApplyOutcome, Delta, RegistryError, RejectReason};

type AppState = Arc<NodeState>;

/// Build the API router.
///
/// With the feature flag off only `/health` and `/api/vns/status` answer;
/// everything else is 503.
pub fn build_router(state: AppState) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/vns/status", get(status));

    let router = if state.config.enabled {
        router
            // Replication
            .route("/api/vns/push-delta", post(push_delta))
            .route("/api/vns/entries", get(entries))
            .route("/api/vns/peers", get(peers))
            .route("/api/vns/discovered", get(discovered))
            // Names
            .route("/api/vns/resolve/:name", get(resolve))
            .route("/api/vns/register", post(register))
            .route("/api/vns/expire", post(expire))
    } else {
        router.fallback(disabled)
    };

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Health ---

async fn health() -> &'static str {
    "OK"
}

async fn disabled() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "VNS is disabled on this node".into(),
        }),
    )
}

// --- Replication ---

async fn push_delta(
    State(state): State<AppState>,
    Json(delta): Json<Delta>,
) -> (StatusCode, Json<PushDeltaResponse>) {
    let outcome = state.registry.write().await.apply_delta(&delta);

    match outcome {
        Ok(ApplyOutcome::Accepted) => {
            debug!(
                "Accepted {:?} for {} from {}",
                delta.kind, delta.entry.name, delta.origin_peer_id
            );
            // Deltas straight from their origin are relayed once.
            if delta.relay_peer.is_none() {
                state
                    .transport
                    .spawn_push(delta.relayed_by(state.node_id()));
            }
            (
                StatusCode::OK,
                Json(PushDeltaResponse {
                    accepted: true,
                    error: None,
                }),
            )
        }
        Ok(ApplyOutcome::Rejected(RejectReason::Stale)) => {
            debug!("Stale delta for {} from {}", delta.entry.name, delta.origin_peer_id);
            (
                StatusCode::CONFLICT,
                Json(PushDeltaResponse {
                    accepted: false,
                    error: Some("stale".into()),
                }),
            )
        }
        Ok(ApplyOutcome::Rejected(RejectReason::Invalid(reason))) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(PushDeltaResponse {
                accepted: false,
                error: Some(reason),
            }),
        ),
        Err(e) => {
            warn!("Failed to apply delta for {}: {}", delta.entry.name, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PushDeltaResponse {
                    accepted: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn entries(State(state): State<AppState>) -> Json<EntriesResponse> {
    let snapshot = state.registry.read().await.snapshot();
    let deltas = snapshot
        .iter()
        .map(|record| record.to_delta(state.node_id()))
        .collect();
    Json(EntriesResponse {
        success: true,
        deltas,
    })
}

async fn peers(State(state): State<AppState>) -> Json<PeersResponse> {
    let peers = state.registry.read().await.peers();
    Json(PeersResponse {
        success: true,
        peers,
    })
}

async fn discovered(State(state): State<AppState>) -> Json<DiscoveredPeersResponse> {
    let peers = state.transport.peer_table().read().await.list();
    Json(DiscoveredPeersResponse {
        success: true,
        peers,
    })
}

// --- Names ---

async fn resolve(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let entry = state.registry.read().await.resolve(&name);
    match entry {
        Some(entry) => {
            let endpoints = entry.endpoints().map(str::to_string).collect();
            Json(ResolveResponse {
                entry,
                endpoints: Some(Endpoints::Many(endpoints)),
            })
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("{} not found", name),
            }),
        )
            .into_response(),
    }
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> (StatusCode, Json<MutationResponse>) {
    let result = match request {
        RegisterRequest::Signed { entry } => state.registrar.submit(entry).await,
        RegisterRequest::Value { name, value, role } => {
            state
                .registrar
                .register_value(&name, &value, role.as_deref())
                .await
        }
    };
    mutation_response(&state, result)
}

async fn expire(
    State(state): State<AppState>,
    Json(request): Json<ExpireRequest>,
) -> (StatusCode, Json<MutationResponse>) {
    let result = state.registrar.expire(request.entry).await;
    mutation_response(&state, result)
}

fn mutation_response(
    state: &AppState,
    result: crate::error::Result<Mutation>,
) -> (StatusCode, Json<MutationResponse>) {
    match result {
        Ok(mutation) => {
            let name = mutation.delta.entry.name.clone();
            state.transport.spawn_push(mutation.delta);
            (
                StatusCode::OK,
                Json(MutationResponse {
                    success: true,
                    kind: Some(mutation.kind),
                    name: Some(name),
                    merkle_root: Some(mutation.merkle_root),
                    error: None,
                }),
            )
        }
        Err(e) => {
            debug!("Rejected write: {}", e);
            (
                error_status(&e),
                Json(MutationResponse {
                    success: false,
                    kind: None,
                    name: None,
                    merkle_root: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::Registry(RegistryError::Stale { .. })
        | Error::Registry(RegistryError::AlreadySignedDifferently { .. }) => StatusCode::CONFLICT,
        Error::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::Registry(e) if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// --- Status ---

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let registry_status = state.registry.read().await.status();
    let discovered_peers = state.transport.peer_table().read().await.len();

    Json(StatusResponse {
        enabled: state.config.enabled,
        node_id: state.node_id().to_string(),
        entries: registry_status.entry_count,
        merkle_root: registry_status.merkle_root,
        bootstrap_peers: state.transport.get_bootstrap_peers().await,
        discovered_peers,
        discovery: state.discovery.status().await,
    })
}
