//! Streamable HTTP transport for the MCP protocol.
//!
//! `POST /mcp` for JSON-RPC request/response (single or batch),
//! `DELETE /mcp` for session termination, `GET /mcp` returns 405 (no
//! server-push). Sessions ride the `Mcp-Session-Id` header and are
//! created on `initialize`. No auth on this transport; it is for
//! local tool clients.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::mcp::dispatch_jsonrpc;
use crate::supervisor::Supervisor;

const SESSION_HEADER: &str = "mcp-session-id";

/// Idle sessions older than this are pruned.
pub const SESSION_IDLE_LIMIT_SECS: u64 = 1800;

/// One connected MCP client.
pub struct McpSession {
    pub last_activity: Instant,
}

impl McpSession {
    fn new() -> Self {
        Self { last_activity: Instant::now() }
    }
}

/// State for the MCP HTTP transport.
#[derive(Clone)]
pub struct McpAppContext {
    pub supervisor: Arc<Supervisor>,
    pub sessions: Arc<DashMap<String, McpSession>>,
}

/// Routes for the `/mcp` endpoint.
pub fn mcp_router(ctx: McpAppContext) -> Router {
    Router::new()
        .route("/mcp", post(handle_post).delete(handle_delete).get(handle_get))
        .with_state(ctx)
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap_or_default()))
        .unwrap_or_default()
}

fn transport_error(status: StatusCode, message: &str) -> Response {
    json_response(
        status,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": -32600, "message": message }
        }),
    )
}

async fn handle_post(
    State(ctx): State<McpAppContext>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                }),
            );
        }
    };

    let is_batch = parsed.is_array();
    let requests: Vec<serde_json::Value> = if is_batch {
        parsed.as_array().cloned().unwrap_or_default()
    } else {
        vec![parsed]
    };

    let has_initialize = requests.iter().any(|r| r["method"].as_str() == Some("initialize"));
    let session_id =
        headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(|s| s.to_string());

    // Session enforcement for non-initialize traffic.
    if !has_initialize {
        match session_id.as_ref() {
            Some(sid) if ctx.sessions.contains_key(sid) => {
                if let Some(mut session) = ctx.sessions.get_mut(sid) {
                    session.last_activity = Instant::now();
                }
            }
            Some(_) => {
                return transport_error(StatusCode::BAD_REQUEST, "Invalid or expired session ID");
            }
            None => {
                return transport_error(
                    StatusCode::BAD_REQUEST,
                    "Missing Mcp-Session-Id header. Send 'initialize' first.",
                );
            }
        }
    }

    let mut responses: Vec<serde_json::Value> = Vec::new();
    let mut new_session_id: Option<String> = None;

    for req in &requests {
        if req["method"].as_str() == Some("initialize") {
            let sid = Uuid::new_v4().to_string();
            ctx.sessions.insert(sid.clone(), McpSession::new());
            new_session_id = Some(sid);
        }
        if let Some(resp) = dispatch_jsonrpc(&ctx.supervisor, req) {
            responses.push(resp);
        }
    }

    if responses.is_empty() {
        // All notifications.
        return Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(Body::empty())
            .unwrap_or_default();
    }

    let body_json = if is_batch {
        serde_json::to_string(&responses).unwrap_or_default()
    } else {
        serde_json::to_string(&responses[0]).unwrap_or_default()
    };

    let mut builder =
        Response::builder().status(StatusCode::OK).header("content-type", "application/json");
    if let Some(sid) = new_session_id {
        builder = builder.header(SESSION_HEADER, sid);
    }
    builder.body(Body::from(body_json)).unwrap_or_default()
}

async fn handle_delete(State(ctx): State<McpAppContext>, headers: HeaderMap) -> StatusCode {
    if let Some(sid) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        ctx.sessions.remove(sid);
    }
    StatusCode::OK
}

async fn handle_get() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

/// Drop sessions idle past the limit. Called from a periodic task.
pub fn prune_idle_sessions(sessions: &DashMap<String, McpSession>) -> usize {
    let cutoff = Instant::now() - std::time::Duration::from_secs(SESSION_IDLE_LIMIT_SECS);
    let before = sessions.len();
    sessions.retain(|_, session| session.last_activity > cutoff);
    before - sessions.len()
}
