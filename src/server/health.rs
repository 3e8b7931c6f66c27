//! Health check endpoint.

use axum::http::StatusCode;

/// Liveness probe. Returns 200 with a plain body; no store access.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
