//! Streamable-HTTP transport
//!
//! `POST /mcp` carries single JSON-RPC messages, `DELETE /mcp` closes a
//! session and `GET /health` reports liveness.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::handle_request;
use super::protocol::{self, JsonRpcError, JsonRpcResponse};
use crate::error::Result;
use crate::session::{Session, SessionManager};

/// Header carrying the session id
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

pub fn router(sessions: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/mcp", post(handle_post).delete(handle_delete))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { sessions })
}

/// Serve on `addr` until Ctrl-C, then tear down every session
pub async fn serve(addr: SocketAddr, sessions: Arc<SessionManager>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("MCP server listening on http://{}/mcp", listener.local_addr()?);
    serve_with_shutdown(listener, sessions, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves, closing idle sessions meanwhile
pub async fn serve_with_shutdown(
    listener: TcpListener,
    sessions: Arc<SessionManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let sweeper = sessions.spawn_idle_sweeper();
    let served = axum::serve(listener, router(sessions.clone()))
        .with_graceful_shutdown(shutdown)
        .await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    served?;
    info!("Shutting down; cleaning session artifacts");
    sessions.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn rpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::failure(Value::Null, error))).into_response()
}

fn unknown_session(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("unknown session '{}'", id)})),
    )
        .into_response()
}

async fn resolve_session(
    sessions: &SessionManager,
    headers: &HeaderMap,
) -> std::result::Result<Arc<Session>, Response> {
    match session_id(headers) {
        Some(id) => sessions.get(id).await.ok_or_else(|| unknown_session(id)),
        None => Ok(sessions.default_session()),
    }
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = match protocol::parse_request(&body) {
        Ok(request) => request,
        Err(error) => return rpc_error(StatusCode::BAD_REQUEST, error),
    };

    let (session, created) = if request.method == "initialize" {
        (state.sessions.create().await, true)
    } else {
        match resolve_session(&state.sessions, &headers).await {
            Ok(session) => (session, false),
            Err(response) => return response,
        }
    };

    let Some(response) = handle_request(&session, request).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let mut http = Json(response).into_response();
    if created {
        if let Ok(value) = HeaderValue::from_str(session.id()) {
            http.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    http
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing Mcp-Session-Id header"})),
        )
            .into_response();
    };
    if state.sessions.close(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        unknown_session(id)
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len().await
    }))
}
