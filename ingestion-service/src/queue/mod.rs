//! Durable, Postgres-backed job queue.
//!
//! Each telemetry stream has its own logical queue inside the `ingest_jobs`
//! table. Enqueue is a single insert and is fire-and-forget from the
//! intake's point of view. The batch worker leases rows with
//! `FOR UPDATE SKIP LOCKED` inside its write transaction and deletes them on
//! commit, so a rollback (or a crash) returns the jobs to the queue without
//! any compensation logic.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;

/// Stream identity. Each stream has an independent queue and a single
/// single-flight worker; nothing orders one stream against the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Meter,
    Vehicle,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Meter => "meter",
            Stream::Vehicle => "vehicle",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued sample, payload still in wire form.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub enqueued_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct DurableQueue {
    pool: PgPool,
}

impl DurableQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one validated sample. Once this returns the queue owns the
    /// sample and the broker delivery can be acknowledged.
    pub async fn enqueue<T: Serialize>(&self, stream: Stream, sample: &T) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_value(sample).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query("INSERT INTO ingest_jobs (stream, payload) VALUES ($1, $2)")
            .bind(stream.as_str())
            .bind(payload)
            .execute(&self.pool)
            .await?;

        metrics::counter!("queue_enqueued_total", "stream" => stream.as_str()).increment(1);
        Ok(())
    }

    /// Number of jobs currently waiting in a stream's queue.
    pub async fn depth(&self, stream: Stream) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ingest_jobs WHERE stream = $1")
            .bind(stream.as_str())
            .fetch_one(&self.pool)
            .await
    }

    /// Lock up to `limit` jobs, oldest first, inside the caller's write
    /// transaction. The locks (and hence ownership of the batch) last until
    /// that transaction commits or rolls back.
    pub async fn lease_batch(
        tx: &mut Transaction<'_, Postgres>,
        stream: Stream,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, payload, attempts, enqueued_at
            FROM ingest_jobs
            WHERE stream = $1
            ORDER BY id
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(stream.as_str())
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
    }

    /// Remove committed jobs; called within the batch transaction after the
    /// dual write succeeded.
    pub async fn delete_jobs(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[i64],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM ingest_jobs WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Move a job whose payload cannot be decoded straight to the dead-letter
    /// table; retrying it could never succeed.
    pub async fn dead_letter_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            WITH dead AS (
                DELETE FROM ingest_jobs WHERE id = $1
                RETURNING id, stream, payload, attempts, enqueued_at
            )
            INSERT INTO ingest_jobs_dead (id, stream, payload, attempts, enqueued_at, last_error)
            SELECT id, stream, payload, attempts, enqueued_at, $2 FROM dead
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut **tx)
        .await?;

        metrics::counter!("queue_dead_letter_total").increment(1);
        Ok(())
    }

    /// Bump the attempt counter of a failed batch and move exhausted jobs to
    /// the dead-letter table. Returns how many jobs were dead-lettered.
    pub async fn record_failure(
        &self,
        ids: &[i64],
        max_attempts: i32,
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE ingest_jobs SET attempts = attempts + 1 WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;

        let moved = sqlx::query(
            r#"
            WITH dead AS (
                DELETE FROM ingest_jobs
                WHERE id = ANY($1) AND attempts >= $2
                RETURNING id, stream, payload, attempts, enqueued_at
            )
            INSERT INTO ingest_jobs_dead (id, stream, payload, attempts, enqueued_at, last_error)
            SELECT id, stream, payload, attempts, enqueued_at, $3 FROM dead
            "#,
        )
        .bind(ids)
        .bind(max_attempts)
        .bind(error)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if moved > 0 {
            metrics::counter!("queue_dead_letter_total").increment(moved);
            tracing::error!(
                dead_lettered = moved,
                max_attempts,
                error,
                "jobs exhausted their retry budget and moved to the dead-letter table"
            );
        }

        Ok(moved)
    }
}
