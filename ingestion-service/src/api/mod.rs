//! HTTP gateway.
//!
//! Each endpoint lives in its own sibling module and exports a subrouter;
//! this gateway merges them and applies the shared state, so `main.rs`
//! never needs to know individual routes.

mod health;
mod performance;
mod sessions;
mod snapshot;

use axum::{Json, Router};
use sqlx::PgPool;

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .merge(health::router())
        .merge(performance::router())
        .merge(snapshot::router())
        .merge(sessions::router())
        .with_state(pool)
}

/// Uniform JSON error body: `{ "error": "<message>" }`.
pub(crate) fn error_body(message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message }))
}
