use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One reading from a vehicle's battery-management system.
///
/// Doubles as the broker wire format and the durable-queue payload, same as
/// [`super::MeterSample`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSample {
    pub vehicle_id: Uuid,
    /// State of charge, percent.
    pub soc: f64,
    /// Cumulative battery-side energy delivered, kWh.
    pub kwh_delivered_dc: f64,
    /// Battery pack temperature, degrees Celsius.
    pub battery_temp: f64,
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Latest-known vehicle reading, one row per device, updated in place.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    pub vehicle_id: Uuid,
    pub soc: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn vehicle_sample_parses_wire_json() {
        let json = r#"{
            "vehicleId": "31f1bb12-4a56-4a6e-9b61-2d7898f3b0a2",
            "soc": 64.25,
            "kwhDeliveredDc": 41.875,
            "batteryTemp": 31.50,
            "timestamp": "2026-03-01T08:30:00+02:00"
        }"#;

        let sample: VehicleSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.soc, 64.25);
        assert_eq!(sample.kwh_delivered_dc, 41.875);
        assert_eq!(sample.battery_temp, 31.5);
        // Offset timestamps normalize to the same instant.
        assert_eq!(sample.recorded_at, datetime!(2026-03-01 06:30:00 UTC));
    }

    #[test]
    fn vehicle_sample_rejects_non_numeric_soc() {
        let json = r#"{
            "vehicleId": "31f1bb12-4a56-4a6e-9b61-2d7898f3b0a2",
            "soc": "full",
            "kwhDeliveredDc": 41.875,
            "batteryTemp": 31.50,
            "timestamp": "2026-03-01T08:30:00Z"
        }"#;
        assert!(serde_json::from_str::<VehicleSample>(json).is_err());
    }
}
