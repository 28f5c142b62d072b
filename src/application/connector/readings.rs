//! Measurement readings
//!
//! | reading            | key                                        | policy     |
//! |--------------------|--------------------------------------------|------------|
//! | `current_power`    | `Power.Active.Import` (or per phase sum)   | Live       |
//! | `currents`         | `Current.Import.Lx`                        | Live       |
//! | `total_energy`     | `Energy.Active.Import.Register` (kWh)      | Cumulative |
//! | `voltages`         | `Voltage.Lx-N`, `Voltage.Lx`               | Cumulative |
//! | `get_max_power`    | `Power.Offered`                            | Cumulative |
//! | `soc`              | `SoC`                                      | Cumulative |
//! | `get_max_current`  | `Current.Offered`                          | Strict     |

use std::collections::HashMap;

use super::{Connector, ConnectorState};
use crate::domain::measurement::{
    phase_key, CURRENT_IMPORT, CURRENT_OFFERED, ENERGY_ACTIVE_IMPORT_REGISTER,
    POWER_ACTIVE_IMPORT, POWER_OFFERED, SOC, VOLTAGE,
};
use crate::domain::{MeasurementSample, OcppError, OcppResult};

/// How a reading treats a meter that has not reported within the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Stale and idle reads as zero; stale during a transaction is a timeout.
    Live,
    /// Stale during a transaction is a timeout, otherwise the cached value.
    Cumulative,
    /// Stale is always a timeout.
    Strict,
}

enum Lookup {
    Idle,
    Cached,
}

fn lookup(measurements: &HashMap<String, MeasurementSample>, key: &str) -> OcppResult<f64> {
    measurements
        .get(key)
        .ok_or(OcppError::NotAvailable)?
        .scaled()
}

/// Sum of the per-phase samples with key suffix `suffix`, `None` if no
/// phase was reported.
fn phase_sum(
    measurements: &HashMap<String, MeasurementSample>,
    measurand: &str,
    suffix: &str,
) -> Option<OcppResult<f64>> {
    let samples: Vec<&MeasurementSample> = (1..=3)
        .filter_map(|phase| measurements.get(&format!("{}{}", phase_key(measurand, phase), suffix)))
        .collect();
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| s.scaled()).sum())
}

/// Per-phase values, trying each suffix in turn for every phase. Falls back
/// to the combined key reported on L1.
fn phases(
    measurements: &HashMap<String, MeasurementSample>,
    measurand: &str,
    suffixes: &[&str],
) -> OcppResult<[f64; 3]> {
    let mut values = [0.0; 3];
    let mut found = false;

    for (i, value) in values.iter_mut().enumerate() {
        let key = phase_key(measurand, i + 1);
        let sample = suffixes
            .iter()
            .find_map(|suffix| measurements.get(&format!("{}{}", key, suffix)));
        if let Some(sample) = sample {
            *value = sample.scaled()?;
            found = true;
        }
    }

    if found {
        return Ok(values);
    }

    lookup(measurements, measurand).map(|combined| [combined, 0.0, 0.0])
}

impl Connector {
    fn is_meter_stale(&self, state: &ConnectorState) -> bool {
        state
            .meter_updated
            .map_or(true, |mark| self.clock.is_older_than(mark, self.settings.timeout))
    }

    /// Applies `freshness` to the cached meter state. Also fails when the
    /// charge point is not connected.
    fn check_freshness(&self, state: &ConnectorState, freshness: Freshness) -> OcppResult<Lookup> {
        let connected = self
            .charge_point
            .upgrade()
            .is_some_and(|cp| cp.connected());
        if !connected {
            return Err(OcppError::Timeout);
        }

        if !self.is_meter_stale(state) {
            return Ok(Lookup::Cached);
        }

        let charging = state.transaction.is_some();
        match freshness {
            Freshness::Live if charging => Err(OcppError::Timeout),
            Freshness::Live => Ok(Lookup::Idle),
            Freshness::Cumulative if charging => Err(OcppError::Timeout),
            Freshness::Cumulative => Ok(Lookup::Cached),
            Freshness::Strict => Err(OcppError::Timeout),
        }
    }

    async fn reading(&self, key: &str, freshness: Freshness) -> OcppResult<f64> {
        let state = self.state.lock().await;
        match self.check_freshness(&state, freshness)? {
            Lookup::Idle => Ok(0.0),
            Lookup::Cached => lookup(&state.measurements, key),
        }
    }

    /// Active import power in W.
    pub async fn current_power(&self) -> OcppResult<f64> {
        let state = self.state.lock().await;
        if let Lookup::Idle = self.check_freshness(&state, Freshness::Live)? {
            return Ok(0.0);
        }

        if let Some(sample) = state.measurements.get(POWER_ACTIVE_IMPORT) {
            return sample.scaled();
        }

        ["", "-N"]
            .iter()
            .find_map(|suffix| phase_sum(&state.measurements, POWER_ACTIVE_IMPORT, suffix))
            .unwrap_or(Err(OcppError::NotAvailable))
    }

    /// Imported energy in kWh.
    pub async fn total_energy(&self) -> OcppResult<f64> {
        self.reading(ENERGY_ACTIVE_IMPORT_REGISTER, Freshness::Cumulative)
            .await
            .map(|wh| wh / 1e3)
    }

    /// Phase currents in A.
    pub async fn currents(&self) -> OcppResult<[f64; 3]> {
        let state = self.state.lock().await;
        match self.check_freshness(&state, Freshness::Live)? {
            Lookup::Idle => Ok([0.0; 3]),
            Lookup::Cached => phases(&state.measurements, CURRENT_IMPORT, &[""]),
        }
    }

    /// Phase voltages in V, phase-to-neutral preferred.
    pub async fn voltages(&self) -> OcppResult<[f64; 3]> {
        let state = self.state.lock().await;
        self.check_freshness(&state, Freshness::Cumulative)?;
        phases(&state.measurements, VOLTAGE, &["-N", ""])
    }

    pub async fn get_max_current(&self) -> OcppResult<f64> {
        self.reading(CURRENT_OFFERED, Freshness::Strict).await
    }

    pub async fn get_max_power(&self) -> OcppResult<f64> {
        self.reading(POWER_OFFERED, Freshness::Cumulative).await
    }

    /// Vehicle state of charge in %.
    pub async fn soc(&self) -> OcppResult<f64> {
        self.reading(SOC, Freshness::Cumulative).await
    }
}
