//! Meter samples as reported by MeterValues

use rust_ocpp::v1_6::types::SampledValue;

use super::error::{OcppError, OcppResult};
use crate::support::wire::wire_name;

pub const POWER_ACTIVE_IMPORT: &str = "Power.Active.Import";
pub const ENERGY_ACTIVE_IMPORT_REGISTER: &str = "Energy.Active.Import.Register";
pub const CURRENT_IMPORT: &str = "Current.Import";
pub const CURRENT_OFFERED: &str = "Current.Offered";
pub const POWER_OFFERED: &str = "Power.Offered";
pub const VOLTAGE: &str = "Voltage";
pub const SOC: &str = "SoC";

/// One sampled value, kept until a newer sample with the same key arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSample {
    pub measurand: String,
    pub phase: Option<String>,
    /// Raw value, whitespace trimmed
    pub value: String,
    pub unit: Option<String>,
}

impl MeasurementSample {
    /// A sample without a measurand is an energy register reading.
    pub fn from_sampled(sample: &SampledValue) -> Self {
        Self {
            measurand: sample
                .measurand
                .as_ref()
                .map(wire_name)
                .unwrap_or_else(|| ENERGY_ACTIVE_IMPORT_REGISTER.to_string()),
            phase: sample.phase.as_ref().map(wire_name),
            value: sample.value.trim().to_string(),
            unit: sample.unit.as_ref().map(wire_name),
        }
    }

    pub fn zero(measurand: &str, phase: Option<&str>, unit: &str) -> Self {
        Self {
            measurand: measurand.to_string(),
            phase: phase.map(str::to_string),
            value: "0".to_string(),
            unit: Some(unit.to_string()),
        }
    }

    /// `measurand` or `measurand.phase`, e.g. `Current.Import.L2`
    pub fn key(&self) -> String {
        match &self.phase {
            Some(phase) => format!("{}.{}", self.measurand, phase),
            None => self.measurand.clone(),
        }
    }

    /// Value in engineering units (W, Wh, A, V, %).
    pub fn scaled(&self) -> OcppResult<f64> {
        let value: f64 = self
            .value
            .parse()
            .map_err(|_| OcppError::InvalidMeasurement {
                key: self.key(),
                value: self.value.clone(),
            })?;
        Ok(scale(value, self.unit.as_deref().unwrap_or("")))
    }
}

/// Applies the unit prefix: `k…` multiplies by 1000, `m…` divides by 1000.
pub fn scale(value: f64, unit: &str) -> f64 {
    if unit.starts_with('k') {
        value * 1e3
    } else if unit.starts_with('m') {
        value / 1e3
    } else {
        value
    }
}

/// Key of a per-phase sample, `phase` in 1..=3.
pub fn phase_key(measurand: &str, phase: usize) -> String {
    format!("{}.L{}", measurand, phase)
}
