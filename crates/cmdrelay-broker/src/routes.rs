//! HTTP surface of the broker.
//!
//! WebSocket upgrades on `/` and `/ws`, plus read-only JSON views:
//! `/health`, `/status`, `/clients`, `/metrics` and `/history`.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cmdrelay_common::auth::AuthConfig;
use cmdrelay_common::protocol::now_millis;
use cmdrelay_metrics::{MetricsSnapshot, ServerInfo};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::broker::{MemoryUsage, SharedBroker};
use crate::connection;
use crate::history::HistoryQuery;

/// Headroom over the payload limit so oversized frames reach the validator
/// and get a `MESSAGE_TOO_LARGE` reply instead of a dropped socket.
const FRAME_HEADROOM: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub broker: SharedBroker,
    pub auth: Arc<AuthConfig>,
    pub max_payload: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/clients", get(clients))
        .route("/metrics", get(metrics))
        .route("/history", get(history))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Upgrades to a relay connection once the API key (if any) checks out.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !state.auth.authorize(authorization, query.as_deref()) {
        warn!("Rejected WebSocket upgrade: invalid API key");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let broker = state.broker.clone();
    ws.max_message_size(state.max_payload + FRAME_HEADROOM)
        .on_upgrade(move |socket| connection::serve(socket, broker))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.broker.lock().await.metrics().info().uptime_seconds;
    Json(json!({
        "status": "ok",
        "uptimeSeconds": uptime,
        "timestamp": now_millis(),
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.broker.lock().await.status_report())
}

async fn clients(State(state): State<AppState>) -> impl IntoResponse {
    let broker = state.broker.lock().await;
    let clients = broker.clients(Instant::now());
    Json(json!({
        "count": clients.len(),
        "clients": clients,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsReport {
    server: ServerInfo,
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    memory: MemoryUsage,
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let broker = state.broker.lock().await;
    Json(MetricsReport {
        server: broker.metrics().info(),
        metrics: broker.metrics().snapshot(),
        memory: broker.memory_usage(),
    })
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(state.broker.lock().await.history(&query))
}
