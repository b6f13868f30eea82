//! Readiness probe.
//!
//! Reports whether the service can reach its database and how deep each
//! stream's durable queue currently is, so orchestrators and dashboards see
//! ingest backlog at a glance.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use serde::Serialize;
use sqlx::PgPool;

use crate::queue::{DurableQueue, Stream};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueDepths {
    meter: i64,
    vehicle: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    queue_depths: QueueDepths,
}

pub fn router() -> Router<PgPool> {
    Router::new().route("/health", get(health))
}

/// `GET /health`: 200 with the per-stream queue backlog when the database
/// answers, 503 when it does not.
async fn health(State(pool): State<PgPool>) -> impl IntoResponse {
    let queue = DurableQueue::new(pool);

    let meter = queue.depth(Stream::Meter).await;
    let vehicle = queue.depth(Stream::Vehicle).await;

    match (meter, vehicle) {
        (Ok(meter), Ok(vehicle)) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                queue_depths: QueueDepths { meter, vehicle },
            }),
        )
            .into_response(),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "health probe cannot reach database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                super::error_body("database unreachable"),
            )
                .into_response()
        }
    }
}
