//! Single-flight batch worker, one per stream.
//!
//! The worker polls its queue and drains it into batches governed by two
//! triggers: queue depth reaching the batch size, or the flush interval
//! elapsing since the last completed batch while anything waits. A batch is
//! leased, written and deleted inside one database transaction, so a
//! failure anywhere rolls the jobs back into the queue. The next batch only
//! starts after the previous transaction finished, which keeps writes per
//! stream strictly serial and bounds connection usage at one per stream.

use std::time::Duration;

use fleet_client::domain::{MeterSample, VehicleSample};
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::BatcherConfig;
use crate::queue::{DurableQueue, Job, Stream};
use crate::writer;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Decide whether to drain, and how many jobs to take.
///
/// Size trigger first: a full batch drains immediately. Otherwise the time
/// trigger drains whatever is waiting once `flush_interval` has elapsed
/// since the last completed batch.
pub fn batch_decision(
    depth: i64,
    batch_size: i64,
    since_last_flush: Duration,
    flush_interval: Duration,
) -> Option<i64> {
    if depth >= batch_size {
        Some(batch_size)
    } else if depth > 0 && since_last_flush >= flush_interval {
        Some(depth)
    } else {
        None
    }
}

/// Exponential retry backoff, capped at one minute.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(6);
    base.saturating_mul(1u32 << shift).min(MAX_BACKOFF)
}

struct DrainFailure {
    /// Jobs that were leased when the failure happened; empty if the batch
    /// never got leased.
    job_ids: Vec<i64>,
    error: anyhow::Error,
}

pub struct BatchWorker {
    pool: PgPool,
    queue: DurableQueue,
    stream: Stream,
    cfg: BatcherConfig,
    shutdown: watch::Receiver<bool>,
}

impl BatchWorker {
    pub fn new(
        pool: PgPool,
        queue: DurableQueue,
        stream: Stream,
        cfg: BatcherConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            queue,
            stream,
            cfg,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(stream = %self.stream, "batch worker started");
        let mut last_flush = Instant::now();
        let mut consecutive_failures: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                tracing::info!(stream = %self.stream, "batch worker stopping; queue retains remaining jobs");
                return;
            }

            let depth = match self.queue.depth(self.stream).await {
                Ok(depth) => depth,
                Err(e) => {
                    tracing::warn!(stream = %self.stream, error = %e, "queue depth poll failed");
                    self.sleep_or_shutdown(self.cfg.poll_interval()).await;
                    continue;
                }
            };

            let limit = match batch_decision(
                depth,
                self.cfg.batch_size,
                last_flush.elapsed(),
                self.cfg.flush_interval(),
            ) {
                Some(limit) => limit,
                None => {
                    self.sleep_or_shutdown(self.cfg.poll_interval()).await;
                    continue;
                }
            };

            match self.drain_batch(limit).await {
                Ok(written) => {
                    consecutive_failures = 0;
                    last_flush = Instant::now();
                    if written > 0 {
                        metrics::counter!("batches_committed_total", "stream" => self.stream.as_str())
                            .increment(1);
                        tracing::debug!(stream = %self.stream, written, "batch committed");
                    }
                }
                Err(failure) => {
                    consecutive_failures += 1;
                    if !failure.job_ids.is_empty() {
                        if let Err(e) = self
                            .queue
                            .record_failure(
                                &failure.job_ids,
                                self.cfg.max_attempts,
                                &failure.error.to_string(),
                            )
                            .await
                        {
                            tracing::error!(stream = %self.stream, error = %e, "failed to record batch failure");
                        }
                    }

                    let delay = backoff_delay(self.cfg.retry_backoff(), consecutive_failures);
                    metrics::counter!("batch_retries_total", "stream" => self.stream.as_str())
                        .increment(1);
                    tracing::warn!(
                        stream = %self.stream,
                        error = %failure.error,
                        attempt = consecutive_failures,
                        backoff_ms = delay.as_millis() as u64,
                        "batch failed, jobs returned to queue"
                    );
                    self.sleep_or_shutdown(delay).await;
                }
            }
        }
    }

    async fn sleep_or_shutdown(&mut self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    /// Lease, write and commit one batch. The transaction deadline covers
    /// everything after the lease; hitting it drops the transaction, which
    /// rolls the jobs back into the queue.
    async fn drain_batch(&self, limit: i64) -> Result<usize, DrainFailure> {
        let mut tx = self.pool.begin().await.map_err(|e| DrainFailure {
            job_ids: Vec::new(),
            error: e.into(),
        })?;

        let jobs = DurableQueue::lease_batch(&mut tx, self.stream, limit)
            .await
            .map_err(|e| DrainFailure {
                job_ids: Vec::new(),
                error: e.into(),
            })?;

        if jobs.is_empty() {
            return Ok(0);
        }

        let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();

        match tokio::time::timeout(self.cfg.tx_timeout(), self.write_and_commit(tx, &jobs)).await {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(error)) => Err(DrainFailure { job_ids, error }),
            Err(_) => Err(DrainFailure {
                job_ids,
                error: anyhow::anyhow!(
                    "batch transaction exceeded {}s deadline",
                    self.cfg.tx_timeout_secs
                ),
            }),
        }
    }

    async fn write_and_commit(
        &self,
        mut tx: Transaction<'static, Postgres>,
        jobs: &[Job],
    ) -> anyhow::Result<usize> {
        let written = match self.stream {
            Stream::Meter => {
                let samples = self.decode_jobs::<MeterSample>(&mut tx, jobs).await?;
                writer::write_meter_batch(&mut tx, &samples).await?;
                samples.len()
            }
            Stream::Vehicle => {
                let samples = self.decode_jobs::<VehicleSample>(&mut tx, jobs).await?;
                writer::write_vehicle_batch(&mut tx, &samples).await?;
                samples.len()
            }
        };

        let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        DurableQueue::delete_jobs(&mut tx, &job_ids).await?;
        tx.commit().await?;

        metrics::counter!("ingested_samples_total", "stream" => self.stream.as_str())
            .increment(written as u64);
        if let Some(oldest) = jobs.iter().map(|j| j.enqueued_at).min() {
            let waited = OffsetDateTime::now_utc() - oldest;
            metrics::histogram!("ingest_queue_latency_seconds", "stream" => self.stream.as_str())
                .record(waited.as_seconds_f64().max(0.0));
        }

        Ok(written)
    }

    /// Decode job payloads. An undecodable payload would fail on every
    /// retry, so it is moved to the dead-letter table inside the same
    /// transaction instead of poisoning the batch.
    async fn decode_jobs<T: DeserializeOwned>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        jobs: &[Job],
    ) -> anyhow::Result<Vec<T>> {
        let mut samples = Vec::with_capacity(jobs.len());
        for job in jobs {
            match serde_json::from_value::<T>(job.payload.clone()) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    tracing::warn!(
                        stream = %self.stream,
                        job_id = job.id,
                        error = %e,
                        "undecodable queue payload, dead-lettering"
                    );
                    DurableQueue::dead_letter_in_tx(tx, job.id, &e.to_string()).await?;
                }
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B: i64 = 1_000;
    const T: Duration = Duration::from_secs(10);

    #[test]
    fn full_queue_triggers_immediately() {
        assert_eq!(batch_decision(B, B, Duration::ZERO, T), Some(B));
        assert_eq!(batch_decision(B + 500, B, Duration::ZERO, T), Some(B));
    }

    #[test]
    fn partial_queue_waits_for_the_time_trigger() {
        assert_eq!(batch_decision(5, B, Duration::from_secs(3), T), None);
        assert_eq!(batch_decision(5, B, Duration::from_secs(10), T), Some(5));
        assert_eq!(batch_decision(999, B, Duration::from_secs(11), T), Some(999));
    }

    #[test]
    fn empty_queue_never_triggers() {
        assert_eq!(batch_decision(0, B, Duration::from_secs(60), T), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(base, 30), Duration::from_millis(32_000));
        assert_eq!(backoff_delay(Duration::from_secs(10), 30), MAX_BACKOFF);
    }
}
