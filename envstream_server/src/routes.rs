//! HTTP routes.
//!
//! - `GET /`            → registered environments
//! - `GET /play/<name>` → what a player page needs to drive `<name>`
//! - `GET /env/<name>`  → WebSocket upgrade into a streaming session

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use envstream_core::{EnvInfo, EnvRegistry, EnvSpec, Session, SessionConfig};
use envstream_env::{Transport, TokioContext};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ws_transport::AxumTransport;

/// Shared by every request; the registry is never mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EnvRegistry>,
    pub ctx: Arc<TokioContext>,
    pub config: SessionConfig,
}

/// Response body for `/play/<name>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayInfo {
    #[serde(flatten)]
    pub env: EnvInfo,
    /// Frame interval in milliseconds
    pub interval: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/play/:name", get(play))
        .route("/play/:name/", get(play))
        .route("/env/:name", get(env_socket))
        .route("/env/:name/", get(env_socket))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Json<Vec<EnvInfo>> {
    Json(state.registry.specs().iter().map(EnvSpec::info).collect())
}

async fn play(State(state): State<AppState>, uri: Uri) -> Response {
    match state.registry.resolve_path(uri.path()) {
        Some(spec) => Json(PlayInfo {
            env: spec.info(),
            interval: state.config.frame_interval.as_millis() as u64,
        })
        .into_response(),
        None => not_found(uri.path()),
    }
}

/// Rejects unknown environments before any upgrade happens.
async fn env_socket(
    State(state): State<AppState>,
    uri: Uri,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(spec) = state.registry.resolve_path(uri.path()).cloned() else {
        return not_found(uri.path());
    };
    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "websocket upgrade required").into_response();
    };

    ws.on_upgrade(move |socket| serve_session(state, spec, socket))
}

async fn serve_session(state: AppState, spec: EnvSpec, socket: WebSocket) {
    let transport = AxumTransport::from_socket(socket);
    let peer = transport.peer();

    match Session::start(state.ctx, &spec, state.config, transport).await {
        Ok(report) => info!(
            session = %peer,
            env = %spec.name,
            frames = report.stats.frames_sent,
            "env handler: {}",
            report.reason.as_str()
        ),
        Err(e) => warn!(session = %peer, env = %spec.name, "env handler: {e}"),
    }
}

fn not_found(path: &str) -> Response {
    warn!(path, "unknown environment");
    (StatusCode::NOT_FOUND, "unknown environment").into_response()
}
