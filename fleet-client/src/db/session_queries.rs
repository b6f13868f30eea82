//! Session lifecycle operations.
//!
//! Sessions are written by operators/automation, never by the ingestion
//! path, and may be edited while samples flow. The one-active-session-per-
//! vehicle invariant lives in the database (partial unique index), so
//! concurrent starts race safely: the loser gets a conflict.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::ChargingSession;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("vehicle already has an active session")]
    Conflict,
    #[error("no active session for vehicle")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Meter association returned by [`lookup_active`].
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub meter_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub mapped_at: OffsetDateTime,
}

/// Open a session. Fails with [`SessionError::Conflict`] if the vehicle
/// already has an active one.
pub async fn start_session(
    pool: &PgPool,
    vehicle_id: Uuid,
    meter_id: Uuid,
) -> Result<ChargingSession, SessionError> {
    let res = sqlx::query_as::<_, ChargingSession>(
        r#"
        INSERT INTO charging_sessions (vehicle_id, meter_id, mapped_at, unmapped_at, active)
        VALUES ($1, $2, now(), NULL, TRUE)
        RETURNING vehicle_id, meter_id, mapped_at, unmapped_at, active
        "#,
    )
    .bind(vehicle_id)
    .bind(meter_id)
    .fetch_one(pool)
    .await;

    res.map_err(into_session_error)
}

/// Close the vehicle's active session. Fails with [`SessionError::NotFound`]
/// if none exists; the closed row is returned otherwise.
pub async fn end_session(pool: &PgPool, vehicle_id: Uuid) -> Result<ChargingSession, SessionError> {
    sqlx::query_as::<_, ChargingSession>(
        r#"
        UPDATE charging_sessions
        SET active = FALSE, unmapped_at = now()
        WHERE vehicle_id = $1 AND active
        RETURNING vehicle_id, meter_id, mapped_at, unmapped_at, active
        "#,
    )
    .bind(vehicle_id)
    .fetch_optional(pool)
    .await?
    .ok_or(SessionError::NotFound)
}

/// The vehicle's current meter association, or `None` when unplugged.
pub async fn lookup_active(
    pool: &PgPool,
    vehicle_id: Uuid,
) -> Result<Option<ActiveSession>, SessionError> {
    let row = sqlx::query_as::<_, ActiveSession>(
        r#"
        SELECT meter_id, mapped_at
        FROM charging_sessions
        WHERE vehicle_id = $1 AND active
        "#,
    )
    .bind(vehicle_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Open sessions for many (vehicle, meter) pairs in one transaction. The
/// first conflict aborts the whole batch so fleet-wide plug-in scripts never
/// leave a partial result behind.
pub async fn bulk_start(
    pool: &PgPool,
    pairs: &[(Uuid, Uuid)],
) -> Result<Vec<ChargingSession>, SessionError> {
    let mut tx = pool.begin().await?;
    let mut opened = Vec::with_capacity(pairs.len());

    for (vehicle_id, meter_id) in pairs {
        let session = sqlx::query_as::<_, ChargingSession>(
            r#"
            INSERT INTO charging_sessions (vehicle_id, meter_id, mapped_at, unmapped_at, active)
            VALUES ($1, $2, now(), NULL, TRUE)
            RETURNING vehicle_id, meter_id, mapped_at, unmapped_at, active
            "#,
        )
        .bind(vehicle_id)
        .bind(meter_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(into_session_error)?;

        opened.push(session);
    }

    tx.commit().await?;
    Ok(opened)
}

/// Close the active sessions of the given vehicles. Best-effort: vehicles
/// without an active session are skipped, and the number of sessions closed
/// is returned.
pub async fn bulk_end(pool: &PgPool, vehicle_ids: &[Uuid]) -> Result<u64, SessionError> {
    let res = sqlx::query(
        r#"
        UPDATE charging_sessions
        SET active = FALSE, unmapped_at = now()
        WHERE vehicle_id = ANY($1) AND active
        "#,
    )
    .bind(vehicle_ids)
    .execute(pool)
    .await?;

    Ok(res.rows_affected())
}

fn into_session_error(e: sqlx::Error) -> SessionError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => SessionError::Conflict,
        _ => SessionError::Db(e),
    }
}
