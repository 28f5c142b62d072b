//! Central System to Charge Point requests
//!
//! ```text
//! ChargePoint / Connector ──► commands::* ──► CallTarget::call ──► OutboundCalls::submit
//!                                   │                 │
//!                          typed rust_ocpp      correlator::wait_with_timeout
//!                          request/response     (bounded by the engine timeout)
//! ```
//!
//! Every command serializes a typed request, submits it through the
//! [`OutboundCalls`] seam and translates the confirmation status: a status
//! outside the operation's success set fails with [`OcppError::Rejected`].

pub mod change_availability;
pub mod change_configuration;
pub mod get_composite_schedule;
pub mod get_configuration;
pub mod remote_start;
pub mod reset;
pub mod sender;
pub mod set_charging_profile;
pub mod trigger_message;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use super::correlator::wait_with_timeout;
use crate::domain::{OcppError, OcppResult};

pub use change_availability::change_availability;
pub use change_configuration::change_configuration;
pub use get_composite_schedule::get_composite_schedule;
pub use get_configuration::{get_configuration, ConfigurationResult, KeyValue};
pub use remote_start::remote_start_transaction;
pub use reset::reset;
pub use sender::{create_command_sender, CommandSender, SharedCommandSender};
pub use set_charging_profile::set_charging_profile;
pub use trigger_message::trigger_message;

/// Confirmation payload or transport failure delivered to a pending call.
pub type CallReply = OcppResult<Value>;

/// Transport seam for outbound calls.
///
/// `submit` returns as soon as the call is queued; the confirmation (or
/// CallError) is delivered later through `reply`. Implementations must not
/// block and must tolerate `reply` having been dropped by a timed-out caller.
pub trait OutboundCalls: Send + Sync {
    fn submit(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
        reply: oneshot::Sender<CallReply>,
    ) -> OcppResult<()>;
}

pub type SharedOutboundCalls = Arc<dyn OutboundCalls>;

/// Addressing and timeout for one charge point's outbound calls.
#[derive(Clone, Copy)]
pub struct CallTarget<'a> {
    pub calls: &'a dyn OutboundCalls,
    pub charge_point_id: &'a str,
    pub timeout: Duration,
}

impl CallTarget<'_> {
    pub async fn call<Req, Resp>(&self, action: &str, request: &Req) -> OcppResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)
            .map_err(|e| OcppError::SendFailed(format!("Serialization failed: {}", e)))?;
        self.call_value(action, payload).await.and_then(|result| {
            serde_json::from_value(result).map_err(|e| {
                OcppError::InvalidResponse(format!("Failed to parse {} response: {}", action, e))
            })
        })
    }

    pub async fn call_value(&self, action: &str, payload: Value) -> OcppResult<Value> {
        let (tx, rx) = oneshot::channel();
        let submitted = self
            .calls
            .submit(self.charge_point_id, action, payload, tx);
        wait_with_timeout(submitted, rx, self.timeout).await
    }
}

/// Fails with `Rejected(status)` unless `status` is one of `accepted`.
pub fn ensure_status(status: &str, accepted: &[&str]) -> OcppResult<()> {
    if accepted.contains(&status) {
        Ok(())
    } else {
        Err(OcppError::Rejected(status.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeChargePoint;
    use super::*;
    use serde_json::json;

    #[test]
    fn status_translation() {
        assert!(ensure_status("Accepted", &["Accepted"]).is_ok());
        assert!(ensure_status("Scheduled", &["Accepted", "Scheduled"]).is_ok());
        assert_eq!(
            ensure_status("NotSupported", &["Accepted"]),
            Err(OcppError::Rejected("NotSupported".into()))
        );
    }

    #[tokio::test]
    async fn call_error_is_propagated() {
        let fake = FakeChargePoint::new(|_, _| {
            Some(Err(OcppError::CallError {
                code: "NotImplemented".into(),
                description: "nope".into(),
            }))
        });
        let target = CallTarget {
            calls: fake.as_ref(),
            charge_point_id: "cp-1",
            timeout: Duration::from_millis(50),
        };
        let res = target.call_value("Reset", json!({"type": "Soft"})).await;
        assert!(matches!(res, Err(OcppError::CallError { code, .. }) if code == "NotImplemented"));
    }

    #[tokio::test]
    async fn unanswered_call_times_out() {
        let fake = FakeChargePoint::new(|_, _| None);
        let target = CallTarget {
            calls: fake.as_ref(),
            charge_point_id: "cp-1",
            timeout: Duration::from_millis(20),
        };
        let res = target.call_value("Reset", json!({})).await;
        assert_eq!(res, Err(OcppError::Timeout));
        assert_eq!(fake.actions(), vec!["Reset".to_string()]);
    }

    #[tokio::test]
    async fn unparsable_confirmation_is_invalid_response() {
        let fake = FakeChargePoint::new(|_, _| Some(Ok(json!({"status": 17}))));
        let target = CallTarget {
            calls: fake.as_ref(),
            charge_point_id: "cp-1",
            timeout: Duration::from_millis(50),
        };
        let res = trigger_message(
            &target,
            rust_ocpp::v1_6::types::MessageTrigger::Heartbeat,
            None,
        )
        .await;
        assert!(matches!(res, Err(OcppError::InvalidResponse(_))));
    }
}
