//! Trigger Message command

use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::types::MessageTrigger;
use tracing::info;

use super::{ensure_status, CallTarget};
use crate::domain::OcppResult;
use crate::support::wire::wire_name;

/// Asks the charge point to send `requested_message`. A connector id of
/// `None` or `Some(0)` addresses the whole charge point.
pub async fn trigger_message(
    target: &CallTarget<'_>,
    requested_message: MessageTrigger,
    connector_id: Option<u32>,
) -> OcppResult<()> {
    info!(
        charge_point_id = target.charge_point_id,
        ?requested_message,
        ?connector_id,
        "TriggerMessage"
    );

    let request = TriggerMessageRequest {
        requested_message,
        connector_id: connector_id.filter(|id| *id > 0),
    };
    let response: TriggerMessageResponse = target.call("TriggerMessage", &request).await?;

    ensure_status(&wire_name(&response.status), &["Accepted"])
}
