use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One reading from an AC smart meter.
///
/// This struct is both the broker wire format
/// (`{ "meterId": ..., "kwhConsumedAc": ..., "voltage": ..., "timestamp": ... }`)
/// and the durable-queue payload, so a sample is parsed exactly once at the
/// intake boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSample {
    pub meter_id: Uuid,
    /// Cumulative grid-side energy, kWh.
    pub kwh_consumed_ac: f64,
    /// Line voltage, V.
    pub voltage: f64,
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Latest-known meter reading, one row per device, updated in place.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterState {
    pub meter_id: Uuid,
    pub kwh_consumed_ac: f64,
    pub voltage: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn meter_sample_parses_wire_json() {
        let json = r#"{
            "meterId": "7f4df052-3bbf-4b27-b1a4-7f8b373c0e65",
            "kwhConsumedAc": 12.500,
            "voltage": 230.00,
            "timestamp": "2026-03-01T08:30:00Z"
        }"#;

        let sample: MeterSample = serde_json::from_str(json).unwrap();
        assert_eq!(
            sample.meter_id,
            "7f4df052-3bbf-4b27-b1a4-7f8b373c0e65".parse::<Uuid>().unwrap()
        );
        assert_eq!(sample.kwh_consumed_ac, 12.5);
        assert_eq!(sample.voltage, 230.0);
        assert_eq!(sample.recorded_at, datetime!(2026-03-01 08:30:00 UTC));
    }

    #[test]
    fn meter_sample_rejects_missing_field() {
        let json = r#"{ "meterId": "7f4df052-3bbf-4b27-b1a4-7f8b373c0e65", "voltage": 230.0 }"#;
        assert!(serde_json::from_str::<MeterSample>(json).is_err());
    }

    #[test]
    fn meter_sample_round_trips_through_queue_payload() {
        let sample = MeterSample {
            meter_id: Uuid::nil(),
            kwh_consumed_ac: 0.001,
            voltage: 229.97,
            recorded_at: datetime!(2026-03-01 08:30:00 UTC),
        };

        let value = serde_json::to_value(&sample).unwrap();
        assert!(value.get("meterId").is_some());
        assert!(value.get("timestamp").is_some());

        let back: MeterSample = serde_json::from_value(value).unwrap();
        assert_eq!(back.kwh_consumed_ac, sample.kwh_consumed_ac);
        assert_eq!(back.recorded_at, sample.recorded_at);
    }
}
