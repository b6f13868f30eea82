pub mod analytics;
pub mod meter;
pub mod session;
pub mod vehicle;

pub use analytics::VehiclePerformance;
pub use meter::{MeterSample, MeterState};
pub use session::ChargingSession;
pub use vehicle::{VehicleSample, VehicleState};
