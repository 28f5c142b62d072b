//! Change Availability command

use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::types::AvailabilityType;
use tracing::info;

use super::{ensure_status, CallTarget};
use crate::domain::OcppResult;
use crate::support::wire::wire_name;

/// Succeeds on `Accepted` and `Scheduled`.
pub async fn change_availability(
    target: &CallTarget<'_>,
    connector_id: u32,
    kind: AvailabilityType,
) -> OcppResult<()> {
    info!(
        charge_point_id = target.charge_point_id,
        connector_id,
        ?kind,
        "ChangeAvailability"
    );

    let request = ChangeAvailabilityRequest { connector_id, kind };
    let response: ChangeAvailabilityResponse =
        target.call("ChangeAvailability", &request).await?;

    ensure_status(&wire_name(&response.status), &["Accepted", "Scheduled"])
}
