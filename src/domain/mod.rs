pub mod charge_point;
pub mod error;
pub mod measurement;
pub mod transaction;

pub use charge_point::{BootState, Capabilities, ChargingRateUnit, EngineSettings, SetupOptions};
pub use error::{OcppError, OcppResult};
pub use measurement::{scale, MeasurementSample};
pub use transaction::Transaction;
