//! Websocket implementation of [`OutboundCalls`]
//!
//! Writes `[2, "CS-<n>", action, payload]` frames to the charge point's
//! session and keeps the reply sender in a pending map keyed by
//! `(charge point id, message id)` until the CallResult or CallError
//! arrives. Timeouts are enforced by the caller; entries whose caller has
//! given up are pruned on the next submit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{CallReply, OutboundCalls};
use crate::application::session::SharedSessionRegistry;
use crate::domain::{OcppError, OcppResult};
use crate::support::ocpp_frame::OcppFrame;

struct PendingRequest {
    action: String,
    reply: oneshot::Sender<CallReply>,
}

pub struct CommandSender {
    session_registry: SharedSessionRegistry,
    pending_requests: DashMap<(String, String), PendingRequest>,
    message_counter: AtomicU64,
}

pub type SharedCommandSender = Arc<CommandSender>;

pub fn create_command_sender(session_registry: SharedSessionRegistry) -> SharedCommandSender {
    Arc::new(CommandSender::new(session_registry))
}

impl CommandSender {
    pub fn new(session_registry: SharedSessionRegistry) -> Self {
        Self {
            session_registry,
            pending_requests: DashMap::new(),
            message_counter: AtomicU64::new(1),
        }
    }

    fn generate_message_id(&self) -> String {
        format!("CS-{}", self.message_counter.fetch_add(1, Ordering::SeqCst))
    }

    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn handle_response(&self, charge_point_id: &str, message_id: &str, payload: Value) {
        let key = (charge_point_id.to_string(), message_id.to_string());
        match self.pending_requests.remove(&key) {
            Some((_, pending)) => {
                debug!(
                    charge_point_id,
                    action = pending.action.as_str(),
                    message_id,
                    "Received response"
                );
                let _ = pending.reply.send(Ok(payload));
            }
            None => warn!(charge_point_id, message_id, "Response for unknown request"),
        }
    }

    pub fn handle_error(
        &self,
        charge_point_id: &str,
        message_id: &str,
        error_code: &str,
        error_description: &str,
    ) {
        let key = (charge_point_id.to_string(), message_id.to_string());
        match self.pending_requests.remove(&key) {
            Some((_, pending)) => {
                warn!(
                    charge_point_id,
                    action = pending.action.as_str(),
                    message_id,
                    error_code,
                    error_description,
                    "Received error"
                );
                let _ = pending.reply.send(Err(OcppError::CallError {
                    code: error_code.to_string(),
                    description: error_description.to_string(),
                }));
            }
            None => warn!(charge_point_id, message_id, "Error for unknown request"),
        }
    }

    /// Drop every pending call of a disconnected charge point; their callers
    /// observe a closed channel.
    pub fn cleanup_charge_point(&self, charge_point_id: &str) {
        self.pending_requests
            .retain(|key, _| key.0 != charge_point_id);
    }
}

impl OutboundCalls for CommandSender {
    fn submit(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
        reply: oneshot::Sender<CallReply>,
    ) -> OcppResult<()> {
        self.pending_requests
            .retain(|_, pending| !pending.reply.is_closed());

        let message_id = self.generate_message_id();
        let frame = OcppFrame::Call {
            unique_id: message_id.clone(),
            action: action.to_string(),
            payload,
        };

        let key = (charge_point_id.to_string(), message_id.clone());
        self.pending_requests.insert(
            key.clone(),
            PendingRequest {
                action: action.to_string(),
                reply,
            },
        );

        info!(
            charge_point_id,
            action,
            message_id = message_id.as_str(),
            "Sending command"
        );

        if let Err(e) = self.session_registry.send_to(charge_point_id, frame.serialize()) {
            self.pending_requests.remove(&key);
            warn!(charge_point_id, action, error = %e, "Command not sent");
            return Err(OcppError::NotConnected(charge_point_id.to_string()));
        }

        Ok(())
    }
}
