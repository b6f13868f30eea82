//! Correlated AC-to-DC analytics.
//!
//! The AC and DC aggregates are computed in independent subqueries and
//! combined with a single-row cross join; joining the two history tables
//! row-to-row would be a cartesian product. Both subqueries repeat the
//! window bounds on `recorded_at` as literal predicates so the planner can
//! prune history partitions and range-scan the
//! `(device_id, recorded_at DESC)` indexes.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::analytics::{efficiency_ratio, VehiclePerformance};

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("no telemetry for vehicle in window")]
    NoData,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct PerformanceRow {
    data_points: i64,
    total_dc: f64,
    avg_temp: Option<f64>,
    total_ac: f64,
}

/// Charging performance of one vehicle over `[window_start, window_end]`.
///
/// AC consumption is attributed through the session mapping: a session
/// contributes where `mapped_at <= window_end` and it was not unmapped before
/// `window_start`, and each session's meter samples are clamped to the
/// intersection of the window and the session interval, so energy a shared
/// meter delivered to some other vehicle outside the session never leaks in.
/// Per session the contribution is max - min of the cumulative counter;
/// contributions sum across sessions.
///
/// Errors with [`AnalyticsError::NoData`] when the vehicle has no DC samples
/// in the window. Missing AC data is not an error: consumption is reported
/// as zero and the ratio as zero.
pub async fn vehicle_performance(
    pool: &PgPool,
    vehicle_id: Uuid,
    window_start: OffsetDateTime,
    window_end: OffsetDateTime,
) -> Result<VehiclePerformance, AnalyticsError> {
    let row = sqlx::query_as::<_, PerformanceRow>(
        r#"
        SELECT
            dc.data_points,
            dc.total_dc,
            dc.avg_temp,
            COALESCE(ac.total_ac, 0) AS total_ac
        FROM (
            SELECT
                COUNT(*)                                            AS data_points,
                COALESCE(MAX(kwh_delivered_dc) - MIN(kwh_delivered_dc), 0) AS total_dc,
                AVG(battery_temp)                                   AS avg_temp
            FROM vehicle_history
            WHERE vehicle_id = $1
              AND recorded_at >= $2
              AND recorded_at <= $3
        ) dc
        CROSS JOIN (
            SELECT SUM(per_session.delta) AS total_ac
            FROM (
                SELECT MAX(mh.kwh_consumed_ac) - MIN(mh.kwh_consumed_ac) AS delta
                FROM charging_sessions cs
                JOIN meter_history mh
                  ON mh.meter_id = cs.meter_id
                 AND mh.recorded_at >= $2
                 AND mh.recorded_at <= $3
                 AND mh.recorded_at >= cs.mapped_at
                 AND (cs.unmapped_at IS NULL OR mh.recorded_at <= cs.unmapped_at)
                WHERE cs.vehicle_id = $1
                  AND cs.mapped_at <= $3
                  AND (cs.unmapped_at IS NULL OR cs.unmapped_at >= $2)
                GROUP BY cs.meter_id, cs.mapped_at
            ) per_session
        ) ac
        "#,
    )
    .bind(vehicle_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_one(pool)
    .await?;

    if row.data_points == 0 {
        return Err(AnalyticsError::NoData);
    }

    Ok(VehiclePerformance {
        vehicle_id,
        total_ac_consumption: row.total_ac,
        total_dc_delivery: row.total_dc,
        efficiency_ratio: efficiency_ratio(row.total_ac, row.total_dc),
        avg_battery_temp: row.avg_temp.unwrap_or(0.0),
        data_points: row.data_points,
    })
}
