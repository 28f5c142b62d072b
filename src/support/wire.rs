//! Wire names of OCPP enum values
//!
//! OCPP 1.6 enums serialize to their protocol strings (`"Power.Active.Import"`,
//! `"L1-N"`, `"kWh"`, `"Accepted"`). Measurement keys, unit prefixes and
//! status checks all work on those strings.

use std::fmt::Debug;

use serde::Serialize;

/// Protocol string of a serializable OCPP value, falling back to `Debug`.
pub fn wire_name<T: Serialize + Debug>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => format!("{:?}", value),
    }
}
