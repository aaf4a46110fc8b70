// src/server/api_server.rs

//! The viewer-facing balance API and the small admin surface.
//!
//! `GET /balance/{stream}` runs the full selection pass and returns the
//! winning node's host; selection failures map to stable reason strings.
//! `POST /nodes/{id}/mode` flips a node's operational mode.

use crate::core::FoghornError;
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::balancer::{Capability, SelectionContext, TagAdjustment};
use crate::core::protocol::{ControllerMessage, OperationalMode};
use crate::core::state::FoghornState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Parses `adjust=matcher:delta;matcher:delta` into tag adjustments.
fn parse_adjustments(raw: Option<&String>) -> Vec<TagAdjustment> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(';')
        .filter_map(|pair| {
            let (matcher, delta) = pair.rsplit_once(':')?;
            let delta: i64 = delta.trim().parse().ok()?;
            (!matcher.is_empty()).then(|| TagAdjustment::new(matcher.trim(), delta))
        })
        .collect()
}

fn parse_capability(raw: Option<&String>) -> Option<Capability> {
    match raw.map(String::as_str) {
        Some("ingest") => Some(Capability::Ingest),
        Some("edge") => Some(Capability::Edge),
        Some("storage") => Some(Capability::Storage),
        Some("processing") => Some(Capability::Processing),
        _ => None,
    }
}

fn selection_error(e: FoghornError) -> (StatusCode, String) {
    match e {
        FoghornError::OutOfCapacity | FoghornError::NoCapableNodes | FoghornError::NoStreamSource => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        FoghornError::InvalidArgument(detail) => (StatusCode::BAD_REQUEST, detail),
        other => {
            error!("Balance request failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

async fn balance_handler(
    State(state): State<Arc<FoghornState>>,
    Path(stream): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let lat: f64 = params.get("lat").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let lon: f64 = params.get("lon").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let client_ip = params.get("ip").cloned().unwrap_or_default();
    let adjustments = parse_adjustments(params.get("adjust"));
    let ctx = SelectionContext {
        capability: parse_capability(params.get("capability")),
        cluster_scope: params.get("tenant").cloned(),
    };

    match state
        .balancer
        .get_best_node_with_score(&ctx, &stream, lat, lon, &adjustments, &client_ip)
    {
        Ok(best) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "host": best.host,
                "score": best.score,
                "lat": best.lat,
                "lon": best.lon,
                "location": best.location,
            })),
        )
            .into_response(),
        Err(e) => {
            let (status, reason) = selection_error(e);
            (status, Json(serde_json::json!({ "error": reason }))).into_response()
        }
    }
}

#[derive(Deserialize)]
struct ClipRequest {
    start_unix_ms: u64,
    end_unix_ms: u64,
    #[serde(default)]
    tenant_id: String,
    /// Target node override; the balancer picks a source when absent.
    #[serde(default)]
    node_id: Option<String>,
}

async fn clip_handler(
    State(state): State<Arc<FoghornState>>,
    Path(stream): Path<String>,
    Json(body): Json<ClipRequest>,
) -> impl IntoResponse {
    if body.end_unix_ms <= body.start_unix_ms {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "end must be after start" })),
        )
            .into_response();
    }

    // The clip is cut on a node that sources the stream.
    let node_id = match body.node_id {
        Some(node_id) => node_id,
        None => match state.store.find_source_node(&stream) {
            Some(node_id) => node_id,
            None => {
                let (status, reason) = selection_error(FoghornError::NoStreamSource);
                return (status, Json(serde_json::json!({ "error": reason }))).into_response();
            }
        },
    };
    let source_uri = state
        .store
        .get_node(&node_id)
        .and_then(|n| n.output_url("DTSC", &format!("live+{stream}")))
        .unwrap_or_default();

    let hash = uuid::Uuid::new_v4().simple().to_string();
    let request_id = uuid::Uuid::new_v4().to_string();
    state.artifacts.insert(Artifact::new(
        &hash,
        ArtifactKind::Clip,
        &stream,
        &body.tenant_id,
    ));
    state.clips.track_request(&request_id, &hash);

    let command = ControllerMessage::ClipPullRequest {
        request_id: request_id.clone(),
        internal_name: stream.clone(),
        source_uri,
        start_unix_ms: body.start_unix_ms,
        end_unix_ms: body.end_unix_ms,
        destination_path: String::new(),
    };
    match state.relay.send_to_node(&node_id, command).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "clip_hash": hash,
                "request_id": request_id,
                "node_id": node_id,
            })),
        )
            .into_response(),
        Err(e) => {
            state
                .artifacts
                .update_status(&hash, crate::core::artifacts::ArtifactStatus::Failed);
            let (status, reason) = selection_error(e);
            (status, Json(serde_json::json!({ "error": reason }))).into_response()
        }
    }
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: OperationalMode,
}

async fn node_mode_handler(
    State(state): State<Arc<FoghornState>>,
    Path(node_id): Path<String>,
    Json(body): Json<ModeRequest>,
) -> impl IntoResponse {
    if state.store.set_node_mode(&node_id, body.mode) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown node {node_id}") })),
        )
            .into_response()
    }
}

async fn healthz_handler(State(state): State<Arc<FoghornState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "instance_id": state.instance_id,
        "cluster_id": state.cluster_id,
        "connected_nodes": state.connections.count(),
        "tracked_nodes": state.store.node_count(),
        "served_clusters": state.served_clusters().as_ref().clone(),
    }))
}

/// Runs the balance/admin HTTP server until shutdown.
pub async fn run_api_server(state: Arc<FoghornState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = {
        let config = state.config.lock().await;
        config.api.port
    };

    let app = Router::new()
        .route("/balance/{stream}", get(balance_handler))
        .route("/streams/{stream}/clips", post(clip_handler))
        .route("/nodes/{node_id}/mode", post(node_mode_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Balance API listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind API server on port {}: {}", port, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("API server shutting down.");
        })
        .await
        .unwrap();
}
