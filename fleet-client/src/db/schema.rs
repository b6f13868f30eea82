//! Schema DDL for the telemetry store.
//!
//! Applied once at startup; every statement is idempotent so repeated boots
//! are safe. Hot-state tables reserve free page space (fillfactor 70) so the
//! per-device upserts can proceed in place; history tables are range
//! partitioned by recorded timestamp so retention is a partition drop.

use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

/// Create all tables and indexes (idempotent).
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Hot state: one row per device, replaced in place on every batch.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meter_states (
            meter_id        UUID PRIMARY KEY,
            kwh_consumed_ac DOUBLE PRECISION NOT NULL,
            voltage         DOUBLE PRECISION NOT NULL,
            last_updated    TIMESTAMPTZ NOT NULL
        ) WITH (fillfactor = 70);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicle_states (
            vehicle_id       UUID PRIMARY KEY,
            soc              DOUBLE PRECISION NOT NULL,
            kwh_delivered_dc DOUBLE PRECISION NOT NULL,
            battery_temp     DOUBLE PRECISION NOT NULL,
            last_updated     TIMESTAMPTZ NOT NULL
        ) WITH (fillfactor = 70);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // History: append-only, partitioned monthly on recorded_at. The primary
    // key must include the partition key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meter_history (
            id              BIGSERIAL,
            meter_id        UUID NOT NULL,
            kwh_consumed_ac DOUBLE PRECISION NOT NULL,
            voltage         DOUBLE PRECISION NOT NULL,
            recorded_at     TIMESTAMPTZ NOT NULL,
            ingested_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (id, recorded_at)
        ) PARTITION BY RANGE (recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_meter_history_device_recorded
            ON meter_history (meter_id, recorded_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicle_history (
            id               BIGSERIAL,
            vehicle_id       UUID NOT NULL,
            soc              DOUBLE PRECISION NOT NULL,
            kwh_delivered_dc DOUBLE PRECISION NOT NULL,
            battery_temp     DOUBLE PRECISION NOT NULL,
            recorded_at      TIMESTAMPTZ NOT NULL,
            ingested_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (id, recorded_at)
        ) PARTITION BY RANGE (recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_vehicle_history_device_recorded
            ON vehicle_history (vehicle_id, recorded_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Session mapping. The pair can recur (re-plugs), so mapped_at is part of
    // the key; the partial unique index is what enforces one active session
    // per vehicle.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS charging_sessions (
            vehicle_id  UUID NOT NULL,
            meter_id    UUID NOT NULL,
            mapped_at   TIMESTAMPTZ NOT NULL,
            unmapped_at TIMESTAMPTZ,
            active      BOOLEAN NOT NULL,
            PRIMARY KEY (vehicle_id, meter_id, mapped_at)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active_per_vehicle
            ON charging_sessions (vehicle_id) WHERE active;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sessions_active_meter
            ON charging_sessions (meter_id) WHERE active;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Durable ingest queue plus its dead-letter side table.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_jobs (
            id          BIGSERIAL PRIMARY KEY,
            stream      TEXT NOT NULL,
            payload     JSONB NOT NULL,
            attempts    INTEGER NOT NULL DEFAULT 0,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_ingest_jobs_stream_id
            ON ingest_jobs (stream, id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_jobs_dead (
            id          BIGINT PRIMARY KEY,
            stream      TEXT NOT NULL,
            payload     JSONB NOT NULL,
            attempts    INTEGER NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL,
            failed_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_error  TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Create monthly history partitions around `now`: `months_back` past months,
/// the current month, and `months_ahead` future months. Idempotent; meant to
/// run at startup and from a periodic maintenance tick.
pub async fn ensure_history_partitions(
    pool: &PgPool,
    now: OffsetDateTime,
    months_back: i32,
    months_ahead: i32,
) -> Result<()> {
    let current = month_of(now);

    for table in ["meter_history", "vehicle_history"] {
        for offset in -months_back..=months_ahead {
            let from = add_months(current, offset);
            let to = add_months(current, offset + 1);
            let ddl = partition_ddl(table, from, to);
            sqlx::query(&ddl).execute(pool).await?;
        }
    }

    Ok(())
}

fn month_of(ts: OffsetDateTime) -> (i32, u8) {
    (ts.year(), ts.month() as u8)
}

fn add_months((year, month): (i32, u8), offset: i32) -> (i32, u8) {
    let zero_based = year * 12 + i32::from(month) - 1 + offset;
    (zero_based.div_euclid(12), (zero_based.rem_euclid(12) + 1) as u8)
}

fn partition_ddl(table: &str, from: (i32, u8), to: (i32, u8)) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table}_y{:04}m{:02} PARTITION OF {table} \
         FOR VALUES FROM ('{:04}-{:02}-01T00:00:00Z') TO ('{:04}-{:02}-01T00:00:00Z');",
        from.0, from.1, from.0, from.1, to.0, to.1
    )
}
