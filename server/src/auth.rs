//! Shared-secret auth for the HTTP API.
//!
//! When an API key is configured, every project route requires a
//! matching `x-api-key` header. `/health` and `/version` stay open, and
//! the stdio tool transport never authenticates.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::api::AppContext;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Constant-time string comparison; a mismatched length still walks the
/// longer input.
fn secrets_match(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

/// Middleware: reject requests without the configured shared secret.
/// A service without an API key admits everything.
pub async fn require_api_key(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = ctx.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(provided) if secrets_match(provided, expected) => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
