use serde::Serialize;
use uuid::Uuid;

/// Windowed AC-to-DC charging performance for one vehicle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePerformance {
    pub vehicle_id: Uuid,
    /// max - min of the cumulative AC counter across session-scoped meter
    /// history in the window; zero when no meter was associated.
    pub total_ac_consumption: f64,
    /// max - min of the cumulative DC counter for the vehicle in the window.
    pub total_dc_delivery: f64,
    pub efficiency_ratio: f64,
    pub avg_battery_temp: f64,
    /// Number of DC samples the aggregate was computed from.
    pub data_points: i64,
}

/// DC delivered / AC consumed; zero when there was no AC consumption so the
/// ratio is never a division by zero.
pub fn efficiency_ratio(total_ac: f64, total_dc: f64) -> f64 {
    if total_ac > 0.0 {
        total_dc / total_ac
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efficiency_is_dc_over_ac() {
        assert!((efficiency_ratio(100.0, 92.0) - 0.92).abs() < 1e-12);
    }

    #[test]
    fn zero_ac_yields_zero_ratio() {
        assert_eq!(efficiency_ratio(0.0, 55.0), 0.0);
    }

    #[test]
    fn negative_ac_never_divides() {
        // A decreasing cumulative counter cannot produce a negative divisor.
        assert_eq!(efficiency_ratio(-1.0, 55.0), 0.0);
    }
}
