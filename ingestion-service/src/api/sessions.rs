//! Operator endpoints for the session lifecycle.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleet_client::db::session_queries::{self, SessionError};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest {
    vehicle_id: Uuid,
    meter_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionRequest {
    vehicle_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkEndResponse {
    ended: u64,
}

pub fn router() -> Router<PgPool> {
    Router::new()
        .route("/sessions", post(start))
        .route("/sessions/end", post(end))
        .route("/sessions/active/{vehicle_id}", get(lookup))
        .route("/sessions/bulk", post(bulk_start))
        .route("/sessions/bulk-end", post(bulk_end))
}

async fn start(
    State(pool): State<PgPool>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    match session_queries::start_session(&pool, req.vehicle_id, req.meter_id).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => session_error_response(e),
    }
}

async fn end(State(pool): State<PgPool>, Json(req): Json<EndSessionRequest>) -> impl IntoResponse {
    match session_queries::end_session(&pool, req.vehicle_id).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(e) => session_error_response(e),
    }
}

/// Returns the active association or JSON `null`.
async fn lookup(Path(vehicle_id): Path<Uuid>, State(pool): State<PgPool>) -> impl IntoResponse {
    match session_queries::lookup_active(&pool, vehicle_id).await {
        Ok(active) => (StatusCode::OK, Json(active)).into_response(),
        Err(e) => session_error_response(e),
    }
}

async fn bulk_start(
    State(pool): State<PgPool>,
    Json(reqs): Json<Vec<StartSessionRequest>>,
) -> impl IntoResponse {
    let pairs: Vec<(Uuid, Uuid)> = reqs.iter().map(|r| (r.vehicle_id, r.meter_id)).collect();

    match session_queries::bulk_start(&pool, &pairs).await {
        Ok(sessions) => (StatusCode::CREATED, Json(sessions)).into_response(),
        Err(e) => session_error_response(e),
    }
}

/// Best-effort: vehicles without an active session are skipped.
async fn bulk_end(
    State(pool): State<PgPool>,
    Json(vehicle_ids): Json<Vec<Uuid>>,
) -> impl IntoResponse {
    match session_queries::bulk_end(&pool, &vehicle_ids).await {
        Ok(ended) => (StatusCode::OK, Json(BulkEndResponse { ended })).into_response(),
        Err(e) => session_error_response(e),
    }
}

fn session_error_response(e: SessionError) -> axum::response::Response {
    match e {
        SessionError::Conflict => (
            StatusCode::CONFLICT,
            super::error_body("vehicle already has an active session"),
        )
            .into_response(),
        SessionError::NotFound => (
            StatusCode::NOT_FOUND,
            super::error_body("no active session for vehicle"),
        )
            .into_response(),
        SessionError::Db(e) => {
            tracing::error!(error = %e, "session operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                super::error_body("session operation failed"),
            )
                .into_response()
        }
    }
}
