//! OCPP 1.6 action matcher
//!
//! Maps the action name of an OCPP-J Call to a typed [`InboundRequest`],
//! dispatches it through the central system and serializes the
//! confirmation. Payloads that fail to parse are logged and answered with
//! an empty object.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::application::central_system::InboundRequest;
use crate::application::OcppHandlerV16;
use crate::domain::OcppResult;

fn parse<T: DeserializeOwned>(handler: &OcppHandlerV16, action: &str, payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(req) => Some(req),
        Err(e) => {
            warn!(
                charge_point_id = handler.charge_point_id.as_str(),
                action,
                error = %e,
                "Failed to parse payload"
            );
            None
        }
    }
}

fn to_request(handler: &OcppHandlerV16, action: &str, payload: &Value) -> Option<InboundRequest> {
    let request = match action {
        "Authorize" => InboundRequest::Authorize(parse(handler, action, payload)?),
        "BootNotification" => InboundRequest::BootNotification(parse(handler, action, payload)?),
        "DataTransfer" => InboundRequest::DataTransfer(parse(handler, action, payload)?),
        "DiagnosticsStatusNotification" => {
            InboundRequest::DiagnosticsStatusNotification(parse(handler, action, payload)?)
        }
        "FirmwareStatusNotification" => {
            InboundRequest::FirmwareStatusNotification(parse(handler, action, payload)?)
        }
        "Heartbeat" => InboundRequest::Heartbeat(parse(handler, action, payload)?),
        "MeterValues" => InboundRequest::MeterValues(parse(handler, action, payload)?),
        "StartTransaction" => InboundRequest::StartTransaction(parse(handler, action, payload)?),
        "StatusNotification" => {
            InboundRequest::StatusNotification(parse(handler, action, payload)?)
        }
        "StopTransaction" => InboundRequest::StopTransaction(parse(handler, action, payload)?),

        unknown => {
            if is_cs_to_cp_action(unknown) {
                warn!(
                    charge_point_id = handler.charge_point_id.as_str(),
                    action = unknown,
                    "Received CS→CP action from charge point"
                );
            } else {
                error!(
                    charge_point_id = handler.charge_point_id.as_str(),
                    action = unknown,
                    "Unknown OCPP 1.6 action"
                );
            }
            return None;
        }
    };

    Some(request)
}

/// Confirmation payload for `action`. Fails only when the charge point is
/// not registered.
pub async fn v16_action_matcher(
    handler: &OcppHandlerV16,
    action: &str,
    payload: &Value,
) -> OcppResult<Value> {
    let Some(request) = to_request(handler, action, payload) else {
        return Ok(json!({}));
    };

    let response = handler
        .central_system
        .dispatch(&handler.charge_point_id, request)
        .await?;

    Ok(response.to_value().unwrap_or_else(|e| {
        error!(
            charge_point_id = handler.charge_point_id.as_str(),
            action,
            error = %e,
            "Failed to serialize confirmation"
        );
        json!({})
    }))
}

/// Actions only the central system may send.
fn is_cs_to_cp_action(action: &str) -> bool {
    matches!(
        action,
        "CancelReservation"
            | "ChangeAvailability"
            | "ChangeConfiguration"
            | "ClearCache"
            | "ClearChargingProfile"
            | "GetCompositeSchedule"
            | "GetConfiguration"
            | "GetDiagnostics"
            | "GetLocalListVersion"
            | "RemoteStartTransaction"
            | "RemoteStopTransaction"
            | "ReserveNow"
            | "Reset"
            | "SendLocalList"
            | "SetChargingProfile"
            | "TriggerMessage"
            | "UnlockConnector"
            | "UpdateFirmware"
    )
}
