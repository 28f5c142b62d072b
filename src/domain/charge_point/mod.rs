//! Charge point value objects: boot state, capabilities and settings.

pub mod model;

pub use model::{
    has_property, BootState, Capabilities, ChargingRateUnit, EngineSettings, SetupOptions,
};
