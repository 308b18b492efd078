//! Axum routes: WebSocket upgrade, SSE endpoint and health check.
//!
//! # Health endpoint
//!
//! `GET /health` returns `200 OK` with a JSON body:
//! ```json
//! { "status": "ok", "connections": 3, "subscriptions": 7, "uptime_secs": 120 }
//! ```

use std::{net::SocketAddr, time::Instant};

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::Extensions,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use gqlws_executor::{GraphQlRequest, OperationContext};
use gqlws_protocol::SUBPROTOCOL;
use tower_http::cors::CorsLayer;

use crate::{
    init::ConnectionInfo,
    session::{run_session, SessionContext},
    sse::{sse_response, SSE_OPERATION_ID},
};

// ════════════════════════════════════════════════════════════════════
// Shared server state
// ════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub(crate) struct ServerState {
    pub session_ctx: SessionContext,
    pub started_at: Instant,
}

/// Build the application router.
///
/// State is applied first so the router becomes `Router<()>` and can be
/// merged with user-supplied routes.
pub(crate) fn build_router(
    ws_path: &str,
    sse_path: &str,
    session_ctx: SessionContext,
    additional_routes: Option<Router>,
) -> Router {
    let state = ServerState {
        session_ctx,
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route(ws_path, get(ws_upgrade_handler))
        .route(sse_path, post(sse_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive());

    match additional_routes {
        Some(extra) => app.merge(extra),
        None => app,
    }
}

// ════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════

/// Peer address, present when served with `into_make_service_with_connect_info`.
fn remote_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// WebSocket upgrade handler.
///
/// Advertises the `graphql-transport-ws` subprotocol. Clients that offer no
/// subprotocol are still accepted.
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    extensions: Extensions,
) -> impl IntoResponse {
    // Allocate the id before upgrading so it's available synchronously
    let id = state.session_ctx.connections.next_connection_id();
    let mut info = ConnectionInfo::new(id);
    if let Some(addr) = remote_addr(&extensions) {
        info = info.with_remote_addr(addr);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("{}: upgrading WebSocket connection from {:?}", id, info.remote_addr);

    let ctx = state.session_ctx.clone();

    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket: WebSocket| run_session(socket, info, ctx))
}

/// Single-operation SSE handler.
async fn sse_handler(
    State(state): State<ServerState>,
    Json(request): Json<GraphQlRequest>,
) -> impl IntoResponse {
    let ctx = &state.session_ctx;
    let id = ctx.connections.next_connection_id();

    #[cfg(feature = "tracing")]
    tracing::debug!("{}: SSE operation started", id);

    let op_ctx = OperationContext::new(id, SSE_OPERATION_ID);
    sse_response(
        ctx.executor.clone(),
        request,
        op_ctx,
        &ctx.config,
        ctx.shutdown.clone(),
    )
}

/// Health check endpoint.
async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let connections = &state.session_ctx.connections;

    Json(serde_json::json!({
        "status": "ok",
        "connections": connections.connection_count(),
        "subscriptions": connections.subscription_count(),
        "uptime_secs": uptime_secs,
    }))
}
