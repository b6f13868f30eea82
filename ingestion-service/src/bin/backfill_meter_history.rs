//! Replay a CSV of historical meter readings into the durable queue.
//!
//! Rows go through the same validation as live broker traffic and are
//! drained by the regular meter worker, so backfilled data lands in the
//! hot-state and history tables exactly like live data would.
//!
//! Expected header columns: meterId, kwhConsumedAc, voltage, timestamp
//! (RFC 3339).

use anyhow::{bail, Context, Result};
use fleet_client::domain::MeterSample;
use ingestion_service::{
    config::AppConfig,
    observability,
    queue::{DurableQueue, Stream},
    transform,
};
use sqlx::postgres::PgPoolOptions;
use std::env;
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_meter_history <csv_file_path>");
    }
    let file_path = &args[1];

    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.url)
        .await?;
    let queue = DurableQueue::new(pool);

    let mut reader = csv::Reader::from_path(file_path)
        .with_context(|| format!("cannot open csv file '{file_path}'"))?;
    let headers = reader.headers()?.clone();

    let mut enqueued: u64 = 0;
    let mut rejected: u64 = 0;

    for record in reader.records() {
        let record = record?;
        match record_to_meter_sample(&record, &headers) {
            Ok(sample) => match transform::validate_meter(sample) {
                Ok(sample) => {
                    queue.enqueue(Stream::Meter, &sample).await?;
                    enqueued += 1;
                }
                Err(reason) => {
                    tracing::warn!(reason = %reason, "rejecting csv row");
                    rejected += 1;
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable csv row");
                rejected += 1;
            }
        }
    }

    tracing::info!(enqueued, rejected, "meter history backfill complete");
    Ok(())
}

fn record_to_meter_sample(
    record: &csv::StringRecord,
    headers: &csv::StringRecord,
) -> Result<MeterSample> {
    let get = |name: &str| -> Result<&str> {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| record.get(idx))
            .with_context(|| format!("missing column '{name}' in csv record"))
    };

    let ts_str = get("timestamp")?;
    let recorded_at =
        OffsetDateTime::parse(ts_str.trim(), &time::format_description::well_known::Rfc3339)
            .with_context(|| format!("invalid timestamp '{ts_str}'"))?;

    let meter_id = get("meterId")?
        .trim()
        .parse()
        .with_context(|| "invalid meterId")?;

    let kwh_str = get("kwhConsumedAc")?;
    let kwh_consumed_ac: f64 = kwh_str
        .trim()
        .parse()
        .with_context(|| format!("invalid kwhConsumedAc '{kwh_str}'"))?;

    let voltage_str = get("voltage")?;
    let voltage: f64 = voltage_str
        .trim()
        .parse()
        .with_context(|| format!("invalid voltage '{voltage_str}'"))?;

    Ok(MeterSample {
        meter_id,
        kwh_consumed_ac,
        voltage,
        recorded_at,
    })
}
