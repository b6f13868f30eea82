use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// A vehicle-to-meter association over a time interval.
///
/// Sessions are the only bridge between the AC and DC streams: analytics
/// attributes a meter's consumption to a vehicle exactly where a session
/// interval overlaps the query window. At most one session per vehicle is
/// active at any instant (enforced by a partial unique index).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSession {
    pub vehicle_id: Uuid,
    pub meter_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub mapped_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub unmapped_at: Option<OffsetDateTime>,
    pub active: bool,
}
