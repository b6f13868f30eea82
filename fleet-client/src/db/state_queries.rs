//! Hot-store reads for the admin surface. No history access here.

use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

/// One vehicle state row, joined through its active session (if any) to the
/// meter it is currently drawing from.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshotRow {
    pub vehicle_id: Uuid,
    pub soc: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    pub meter_id: Option<Uuid>,
    pub meter_kwh_consumed_ac: Option<f64>,
    pub meter_voltage: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub meter_last_updated: Option<OffsetDateTime>,
}

/// The `limit` most-recently-updated vehicles with their currently-mapped
/// meter state. The partial unique index on active sessions guarantees the
/// join cannot fan out.
pub async fn fleet_snapshot(pool: &PgPool, limit: i64) -> Result<Vec<FleetSnapshotRow>> {
    let rows = sqlx::query_as::<_, FleetSnapshotRow>(
        r#"
        SELECT
            v.vehicle_id,
            v.soc,
            v.kwh_delivered_dc,
            v.battery_temp,
            v.last_updated,
            m.meter_id,
            m.kwh_consumed_ac AS meter_kwh_consumed_ac,
            m.voltage         AS meter_voltage,
            m.last_updated    AS meter_last_updated
        FROM vehicle_states v
        LEFT JOIN charging_sessions cs
               ON cs.vehicle_id = v.vehicle_id AND cs.active
        LEFT JOIN meter_states m
               ON m.meter_id = cs.meter_id
        ORDER BY v.last_updated DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
