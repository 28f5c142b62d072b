//! Get Composite Schedule command

use rust_ocpp::v1_6::messages::get_composite_schedule::{
    GetCompositeScheduleRequest, GetCompositeScheduleResponse,
};
use rust_ocpp::v1_6::types::ChargingRateUnitType;
use serde_json::Value;
use tracing::info;

use super::{ensure_status, CallTarget};
use crate::domain::{ChargingRateUnit, OcppResult};
use crate::support::wire::wire_name;

/// Composite schedule of an accepted request, as raw JSON (`chargingSchedule`),
/// or `None` when the charge point reported no schedule.
pub async fn get_composite_schedule(
    target: &CallTarget<'_>,
    connector_id: u32,
    duration_secs: i32,
    unit: Option<ChargingRateUnit>,
) -> OcppResult<Option<Value>> {
    info!(
        charge_point_id = target.charge_point_id,
        connector_id,
        duration_secs,
        "GetCompositeSchedule"
    );

    let request = GetCompositeScheduleRequest {
        connector_id: connector_id as i32,
        duration: duration_secs,
        charging_rate_unit: unit.map(|u| match u {
            ChargingRateUnit::Amperes => ChargingRateUnitType::A,
            ChargingRateUnit::Watts => ChargingRateUnitType::W,
        }),
    };
    let response: GetCompositeScheduleResponse =
        target.call("GetCompositeSchedule", &request).await?;

    ensure_status(&wire_name(&response.status), &["Accepted"])?;

    Ok(response
        .charging_schedule
        .map(|s| serde_json::to_value(&s).unwrap_or_default()))
}

/// Limit of the first period of a composite schedule.
pub fn first_period_limit(schedule: &Value) -> Option<f64> {
    let limit = schedule
        .get("chargingSchedulePeriod")?
        .as_array()?
        .first()?
        .get("limit")?;

    match limit {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
