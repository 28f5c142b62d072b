//! OCPP 1.6 message handler
//!
//! One instance per websocket connection. Parses OCPP-J frames, answers
//! Calls through the action matcher and hands CallResult / CallError frames
//! to the [`CommandSender`] waiting for them.

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::application::central_system::SharedCentralSystem;
use crate::application::commands::SharedCommandSender;
use crate::application::handlers::ocpp_v16::v16_action_matcher;
use crate::domain::OcppError;
use crate::support::ocpp_frame::OcppFrame;

/// Handler for OCPP 1.6 messages of one charge point
pub struct OcppHandlerV16 {
    pub charge_point_id: String,
    pub central_system: SharedCentralSystem,
    pub command_sender: SharedCommandSender,
}

impl OcppHandlerV16 {
    pub fn new(
        charge_point_id: impl Into<String>,
        central_system: SharedCentralSystem,
        command_sender: SharedCommandSender,
    ) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            central_system,
            command_sender,
        }
    }

    /// Handles one text frame and returns the frame to send back, if any.
    pub async fn handle(&self, text: &str) -> Option<String> {
        debug!(charge_point_id = self.charge_point_id.as_str(), "Received raw message: {}", text);

        let frame = match OcppFrame::parse(text) {
            Ok(f) => f,
            Err(e) => match Self::sanitize_and_parse(text) {
                Some(f) => {
                    info!(
                        charge_point_id = self.charge_point_id.as_str(),
                        error = %e,
                        "Parsed malformed frame after sanitizing"
                    );
                    f
                }
                None => {
                    error!(
                        charge_point_id = self.charge_point_id.as_str(),
                        error = %e,
                        raw = text,
                        "Failed to parse OCPP message"
                    );
                    return None;
                }
            },
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => Some(self.handle_call(&unique_id, &action, payload).await),

            OcppFrame::CallResult { unique_id, payload } => {
                self.command_sender
                    .handle_response(&self.charge_point_id, &unique_id, payload);
                None
            }

            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                self.command_sender.handle_error(
                    &self.charge_point_id,
                    &unique_id,
                    &error_code,
                    &error_description,
                );
                None
            }
        }
    }

    /// Repairs frames some firmwares send: a null CallResult payload and
    /// CallErrors with missing trailing fields.
    fn sanitize_and_parse(text: &str) -> Option<OcppFrame> {
        let mut value: Value = serde_json::from_str(text).ok()?;
        let arr = value.as_array_mut()?;

        match arr.first()?.as_u64()? {
            3 => {
                arr.resize(3.max(arr.len()), Value::Null);
                if arr[2].is_null() {
                    arr[2] = json!({});
                }
            }
            4 => {
                if arr.len() < 3 {
                    warn!("CallError without errorCode, assuming GenericError");
                    arr.resize(2, Value::Null);
                    arr.push(json!("GenericError"));
                }
            }
            _ => return None,
        }

        OcppFrame::parse(&value.to_string()).ok()
    }

    async fn handle_call(&self, unique_id: &str, action: &str, payload: Value) -> String {
        debug!(charge_point_id = self.charge_point_id.as_str(), action, "Received Call");

        let response = match v16_action_matcher(self, action, &payload).await {
            Ok(payload) => OcppFrame::CallResult {
                unique_id: unique_id.to_string(),
                payload,
            },
            Err(OcppError::UnknownChargePoint(id)) => OcppFrame::error_response(
                unique_id,
                "GenericError",
                format!("unknown charge point {}", id),
            ),
            Err(e) => OcppFrame::error_response(unique_id, "InternalError", e.to_string()),
        };

        response.serialize()
    }
}
