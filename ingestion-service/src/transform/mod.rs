//! Static schema validation at the intake boundary.
//!
//! Validation is a pure function from a parsed sample to either the sample
//! or a rejection reason; nothing here touches the broker or the queue, so
//! the rules are trivially unit-testable.

use fleet_client::domain::{MeterSample, VehicleSample};
use time::{macros::datetime, OffsetDateTime};

/// Why a sample was rejected. Rejected deliveries are acknowledged to the
/// broker, counted and dropped; they never stall the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("kwhConsumedAc must be non-negative, got {0}")]
    NegativeAcEnergy(f64),
    #[error("voltage {0} outside [0, 500]")]
    VoltageOutOfRange(f64),
    #[error("kwhDeliveredDc must be non-negative, got {0}")]
    NegativeDcEnergy(f64),
    #[error("soc {0} outside [0, 100]")]
    SocOutOfRange(f64),
    #[error("batteryTemp {0} outside [-40, 80]")]
    BatteryTempOutOfRange(f64),
    #[error("timestamp outside allowed range")]
    TimestampOutOfRange,
}

/// Validate a meter sample.
///
/// Rules:
/// - cumulative kWh must be non-negative;
/// - voltage within [0, 500];
/// - recorded timestamp within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_meter(sample: MeterSample) -> Result<MeterSample, RejectReason> {
    if !(sample.kwh_consumed_ac >= 0.0) {
        return Err(RejectReason::NegativeAcEnergy(sample.kwh_consumed_ac));
    }
    if !(0.0..=500.0).contains(&sample.voltage) {
        return Err(RejectReason::VoltageOutOfRange(sample.voltage));
    }
    validate_recorded_at(sample.recorded_at)?;

    Ok(sample)
}

/// Validate a vehicle sample.
///
/// Rules:
/// - cumulative kWh must be non-negative;
/// - state of charge within [0, 100] percent;
/// - battery temperature within [-40, 80] °C;
/// - recorded timestamp within the same sanity window as meters.
pub fn validate_vehicle(sample: VehicleSample) -> Result<VehicleSample, RejectReason> {
    if !(sample.kwh_delivered_dc >= 0.0) {
        return Err(RejectReason::NegativeDcEnergy(sample.kwh_delivered_dc));
    }
    if !(0.0..=100.0).contains(&sample.soc) {
        return Err(RejectReason::SocOutOfRange(sample.soc));
    }
    if !(-40.0..=80.0).contains(&sample.battery_temp) {
        return Err(RejectReason::BatteryTempOutOfRange(sample.battery_temp));
    }
    validate_recorded_at(sample.recorded_at)?;

    Ok(sample)
}

fn validate_recorded_at(ts: OffsetDateTime) -> Result<(), RejectReason> {
    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if ts < min_ts || ts > max_ts {
        return Err(RejectReason::TimestampOutOfRange);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use uuid::Uuid;

    fn meter(kwh: f64, voltage: f64) -> MeterSample {
        MeterSample {
            meter_id: Uuid::nil(),
            kwh_consumed_ac: kwh,
            voltage,
            recorded_at: datetime!(2026-03-01 08:30:00 UTC),
        }
    }

    fn vehicle(soc: f64, kwh: f64, temp: f64) -> VehicleSample {
        VehicleSample {
            vehicle_id: Uuid::nil(),
            soc,
            kwh_delivered_dc: kwh,
            battery_temp: temp,
            recorded_at: datetime!(2026-03-01 08:30:00 UTC),
        }
    }

    #[test]
    fn accepts_valid_meter_sample() {
        assert!(validate_meter(meter(12.5, 230.0)).is_ok());
    }

    #[test]
    fn rejects_negative_ac_energy() {
        assert_eq!(
            validate_meter(meter(-0.001, 230.0)),
            Err(RejectReason::NegativeAcEnergy(-0.001))
        );
    }

    #[test]
    fn rejects_voltage_out_of_range() {
        assert!(matches!(
            validate_meter(meter(1.0, 500.01)),
            Err(RejectReason::VoltageOutOfRange(_))
        ));
        assert!(matches!(
            validate_meter(meter(1.0, -1.0)),
            Err(RejectReason::VoltageOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_nan_voltage() {
        assert!(matches!(
            validate_meter(meter(1.0, f64::NAN)),
            Err(RejectReason::VoltageOutOfRange(_))
        ));
    }

    #[test]
    fn accepts_soc_boundaries() {
        assert!(validate_vehicle(vehicle(0.0, 1.0, 20.0)).is_ok());
        assert!(validate_vehicle(vehicle(100.0, 1.0, 20.0)).is_ok());
    }

    #[test]
    fn rejects_soc_out_of_range() {
        assert!(matches!(
            validate_vehicle(vehicle(100.01, 1.0, 20.0)),
            Err(RejectReason::SocOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_battery_temp_out_of_range() {
        assert!(matches!(
            validate_vehicle(vehicle(50.0, 1.0, 80.5)),
            Err(RejectReason::BatteryTempOutOfRange(_))
        ));
        assert!(matches!(
            validate_vehicle(vehicle(50.0, 1.0, -40.5)),
            Err(RejectReason::BatteryTempOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_timestamp() {
        let mut sample = meter(1.0, 230.0);
        sample.recorded_at = datetime!(1999-12-31 23:59:59 UTC);
        assert_eq!(
            validate_meter(sample),
            Err(RejectReason::TimestampOutOfRange)
        );
    }
}
