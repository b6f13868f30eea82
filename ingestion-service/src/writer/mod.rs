//! Transactional dual write: hot-state upsert plus history append.
//!
//! A batch becomes exactly two bulk statements in one transaction, each a
//! single round trip built from column-parallel arrays. The upsert input is
//! deduplicated per device first (a multi-row upsert may not touch the same
//! row twice); the history insert takes every sample of the original batch.
//!
//! The upsert's conflict clause overwrites value columns unconditionally.
//! That is only correct because each stream has exactly one single-flight
//! worker; a parallelized writer would need a recency guard
//! (`WHERE EXCLUDED.last_updated > meter_states.last_updated`) here.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use fleet_client::domain::{MeterSample, VehicleSample};
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

/// Keep the sample with the largest recorded timestamp per device; on a tie
/// the later arrival wins, which makes the choice deterministic for a given
/// batch order.
fn dedup_by_device<'a, T>(
    batch: &'a [T],
    device: impl Fn(&T) -> Uuid,
    recorded: impl Fn(&T) -> OffsetDateTime,
) -> Vec<&'a T> {
    let mut latest: HashMap<Uuid, &'a T> = HashMap::with_capacity(batch.len());
    for sample in batch {
        match latest.entry(device(sample)) {
            Entry::Occupied(mut slot) => {
                if recorded(sample) >= recorded(slot.get()) {
                    slot.insert(sample);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(sample);
            }
        }
    }
    latest.into_values().collect()
}

pub fn dedup_meter_batch(batch: &[MeterSample]) -> Vec<&MeterSample> {
    dedup_by_device(batch, |s| s.meter_id, |s| s.recorded_at)
}

pub fn dedup_vehicle_batch(batch: &[VehicleSample]) -> Vec<&VehicleSample> {
    dedup_by_device(batch, |s| s.vehicle_id, |s| s.recorded_at)
}

/// Write one meter batch into the caller's transaction.
pub async fn write_meter_batch(
    tx: &mut Transaction<'_, Postgres>,
    batch: &[MeterSample],
) -> Result<(), sqlx::Error> {
    if batch.is_empty() {
        return Ok(());
    }

    let deduped = dedup_meter_batch(batch);
    let ids: Vec<Uuid> = deduped.iter().map(|s| s.meter_id).collect();
    let kwh: Vec<f64> = deduped.iter().map(|s| s.kwh_consumed_ac).collect();
    let voltage: Vec<f64> = deduped.iter().map(|s| s.voltage).collect();
    let recorded: Vec<OffsetDateTime> = deduped.iter().map(|s| s.recorded_at).collect();

    sqlx::query(
        r#"
        INSERT INTO meter_states (meter_id, kwh_consumed_ac, voltage, last_updated)
        SELECT * FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::timestamptz[])
        ON CONFLICT (meter_id) DO UPDATE SET
            kwh_consumed_ac = EXCLUDED.kwh_consumed_ac,
            voltage         = EXCLUDED.voltage,
            last_updated    = GREATEST(meter_states.last_updated, EXCLUDED.last_updated)
        "#,
    )
    .bind(&ids)
    .bind(&kwh)
    .bind(&voltage)
    .bind(&recorded)
    .execute(&mut **tx)
    .await?;

    let ids: Vec<Uuid> = batch.iter().map(|s| s.meter_id).collect();
    let kwh: Vec<f64> = batch.iter().map(|s| s.kwh_consumed_ac).collect();
    let voltage: Vec<f64> = batch.iter().map(|s| s.voltage).collect();
    let recorded: Vec<OffsetDateTime> = batch.iter().map(|s| s.recorded_at).collect();

    sqlx::query(
        r#"
        INSERT INTO meter_history (meter_id, kwh_consumed_ac, voltage, recorded_at)
        SELECT * FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::timestamptz[])
        "#,
    )
    .bind(&ids)
    .bind(&kwh)
    .bind(&voltage)
    .bind(&recorded)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Write one vehicle batch into the caller's transaction.
pub async fn write_vehicle_batch(
    tx: &mut Transaction<'_, Postgres>,
    batch: &[VehicleSample],
) -> Result<(), sqlx::Error> {
    if batch.is_empty() {
        return Ok(());
    }

    let deduped = dedup_vehicle_batch(batch);
    let ids: Vec<Uuid> = deduped.iter().map(|s| s.vehicle_id).collect();
    let soc: Vec<f64> = deduped.iter().map(|s| s.soc).collect();
    let kwh: Vec<f64> = deduped.iter().map(|s| s.kwh_delivered_dc).collect();
    let temp: Vec<f64> = deduped.iter().map(|s| s.battery_temp).collect();
    let recorded: Vec<OffsetDateTime> = deduped.iter().map(|s| s.recorded_at).collect();

    sqlx::query(
        r#"
        INSERT INTO vehicle_states (vehicle_id, soc, kwh_delivered_dc, battery_temp, last_updated)
        SELECT * FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::float8[], $5::timestamptz[])
        ON CONFLICT (vehicle_id) DO UPDATE SET
            soc              = EXCLUDED.soc,
            kwh_delivered_dc = EXCLUDED.kwh_delivered_dc,
            battery_temp     = EXCLUDED.battery_temp,
            last_updated     = GREATEST(vehicle_states.last_updated, EXCLUDED.last_updated)
        "#,
    )
    .bind(&ids)
    .bind(&soc)
    .bind(&kwh)
    .bind(&temp)
    .bind(&recorded)
    .execute(&mut **tx)
    .await?;

    let ids: Vec<Uuid> = batch.iter().map(|s| s.vehicle_id).collect();
    let soc: Vec<f64> = batch.iter().map(|s| s.soc).collect();
    let kwh: Vec<f64> = batch.iter().map(|s| s.kwh_delivered_dc).collect();
    let temp: Vec<f64> = batch.iter().map(|s| s.battery_temp).collect();
    let recorded: Vec<OffsetDateTime> = batch.iter().map(|s| s.recorded_at).collect();

    sqlx::query(
        r#"
        INSERT INTO vehicle_history (vehicle_id, soc, kwh_delivered_dc, battery_temp, recorded_at)
        SELECT * FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::float8[], $5::timestamptz[])
        "#,
    )
    .bind(&ids)
    .bind(&soc)
    .bind(&kwh)
    .bind(&temp)
    .bind(&recorded)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample(meter_id: Uuid, kwh: f64, recorded_at: OffsetDateTime) -> MeterSample {
        MeterSample {
            meter_id,
            kwh_consumed_ac: kwh,
            voltage: 230.0,
            recorded_at,
        }
    }

    #[test]
    fn dedup_keeps_latest_recorded_sample_per_device() {
        let m1 = Uuid::from_u128(1);
        let m2 = Uuid::from_u128(2);
        let batch = vec![
            sample(m1, 10.0, datetime!(2026-03-01 08:00:00 UTC)),
            sample(m1, 30.0, datetime!(2026-03-01 08:02:00 UTC)),
            sample(m1, 20.0, datetime!(2026-03-01 08:01:00 UTC)),
            sample(m2, 5.0, datetime!(2026-03-01 08:00:30 UTC)),
        ];

        let deduped = dedup_meter_batch(&batch);
        assert_eq!(deduped.len(), 2);

        let winner = deduped.iter().find(|s| s.meter_id == m1).unwrap();
        assert_eq!(winner.kwh_consumed_ac, 30.0);
        assert_eq!(winner.recorded_at, datetime!(2026-03-01 08:02:00 UTC));
    }

    #[test]
    fn dedup_tie_goes_to_the_later_arrival() {
        let m1 = Uuid::from_u128(1);
        let ts = datetime!(2026-03-01 08:00:00 UTC);
        let batch = vec![sample(m1, 10.0, ts), sample(m1, 11.0, ts)];

        let deduped = dedup_meter_batch(&batch);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].kwh_consumed_ac, 11.0);
    }

    #[test]
    fn dedup_preserves_distinct_devices() {
        let ts = datetime!(2026-03-01 08:00:00 UTC);
        let batch: Vec<MeterSample> = (0..50)
            .map(|i| sample(Uuid::from_u128(i), i as f64, ts))
            .collect();

        assert_eq!(dedup_meter_batch(&batch).len(), 50);
    }
}
