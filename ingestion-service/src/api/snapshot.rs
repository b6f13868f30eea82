use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fleet_client::db::state_queries;
use serde::Deserialize;
use sqlx::PgPool;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 1_000;

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    limit: Option<i64>,
}

pub fn router() -> Router<PgPool> {
    Router::new().route("/analytics/vehicles/states", get(handler))
}

/// `GET /analytics/vehicles/states?limit=N`: the N most-recently-updated
/// vehicles with their currently-mapped meter state. Hot-store read only.
async fn handler(
    Query(params): Query<SnapshotQuery>,
    State(pool): State<PgPool>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state_queries::fleet_snapshot(&pool, limit).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "fleet snapshot query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                super::error_body("query failed"),
            )
                .into_response()
        }
    }
}
