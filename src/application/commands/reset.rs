//! Reset command

use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::types::ResetRequestStatus;
use tracing::info;

use super::{ensure_status, CallTarget};
use crate::domain::OcppResult;
use crate::support::wire::wire_name;

pub async fn reset(target: &CallTarget<'_>, kind: ResetRequestStatus) -> OcppResult<()> {
    info!(charge_point_id = target.charge_point_id, ?kind, "Reset");

    let request = ResetRequest { kind };
    let response: ResetResponse = target.call("Reset", &request).await?;

    ensure_status(&wire_name(&response.status), &["Accepted"])
}
