use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fleet_client::db::analytics_queries::{self, AnalyticsError};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const WINDOW_HOURS: i64 = 24;

pub fn router() -> Router<PgPool> {
    Router::new().route("/analytics/performance/{vehicle_id}", get(handler))
}

/// `GET /analytics/performance/{vehicleId}`: charging performance over the
/// trailing 24 hours.
async fn handler(
    Path(vehicle_id): Path<Uuid>,
    State(pool): State<PgPool>,
) -> impl IntoResponse {
    let window_end = OffsetDateTime::now_utc();
    let window_start = window_end - Duration::hours(WINDOW_HOURS);

    match analytics_queries::vehicle_performance(&pool, vehicle_id, window_start, window_end).await
    {
        Ok(perf) => (StatusCode::OK, Json(perf)).into_response(),
        Err(AnalyticsError::NoData) => (
            StatusCode::NOT_FOUND,
            super::error_body("no telemetry for vehicle in window"),
        )
            .into_response(),
        Err(AnalyticsError::Db(e)) => {
            tracing::error!(error = %e, %vehicle_id, "performance query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                super::error_body("query failed"),
            )
                .into_response()
        }
    }
}
