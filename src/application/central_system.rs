//! Central system: registry of charge points and inbound dispatch
//!
//! The registry is a [`DashMap`]. A looked-up charge point is cloned out of
//! the map before any handler runs, so no shard lock is held while a
//! charge point processes a message.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use serde_json::Value;
use tracing::{error, info, warn};

use super::charge_point::ChargePoint;
use super::commands::SharedOutboundCalls;
use crate::domain::{EngineSettings, OcppError, OcppResult};
use crate::support::clock::SharedClock;

/// Charge point initiated request
#[derive(Debug)]
pub enum InboundRequest {
    Authorize(AuthorizeRequest),
    BootNotification(BootNotificationRequest),
    DataTransfer(DataTransferRequest),
    DiagnosticsStatusNotification(DiagnosticsStatusNotificationRequest),
    FirmwareStatusNotification(FirmwareStatusNotificationRequest),
    Heartbeat(HeartbeatRequest),
    MeterValues(MeterValuesRequest),
    StartTransaction(StartTransactionRequest),
    StatusNotification(StatusNotificationRequest),
    StopTransaction(StopTransactionRequest),
}

impl InboundRequest {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Authorize(_) => "Authorize",
            Self::BootNotification(_) => "BootNotification",
            Self::DataTransfer(_) => "DataTransfer",
            Self::DiagnosticsStatusNotification(_) => "DiagnosticsStatusNotification",
            Self::FirmwareStatusNotification(_) => "FirmwareStatusNotification",
            Self::Heartbeat(_) => "Heartbeat",
            Self::MeterValues(_) => "MeterValues",
            Self::StartTransaction(_) => "StartTransaction",
            Self::StatusNotification(_) => "StatusNotification",
            Self::StopTransaction(_) => "StopTransaction",
        }
    }
}

/// Confirmation of an [`InboundRequest`]
#[derive(Debug)]
pub enum InboundResponse {
    Authorize(AuthorizeResponse),
    BootNotification(BootNotificationResponse),
    DataTransfer(DataTransferResponse),
    DiagnosticsStatusNotification(DiagnosticsStatusNotificationResponse),
    FirmwareStatusNotification(FirmwareStatusNotificationResponse),
    Heartbeat(HeartbeatResponse),
    MeterValues(MeterValuesResponse),
    StartTransaction(StartTransactionResponse),
    StatusNotification(StatusNotificationResponse),
    StopTransaction(StopTransactionResponse),
}

impl InboundResponse {
    /// OCPP-J payload of the confirmation.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Authorize(res) => serde_json::to_value(res),
            Self::BootNotification(res) => serde_json::to_value(res),
            Self::DataTransfer(res) => serde_json::to_value(res),
            Self::DiagnosticsStatusNotification(res) => serde_json::to_value(res),
            Self::FirmwareStatusNotification(res) => serde_json::to_value(res),
            Self::Heartbeat(res) => serde_json::to_value(res),
            Self::MeterValues(res) => serde_json::to_value(res),
            Self::StartTransaction(res) => serde_json::to_value(res),
            Self::StatusNotification(res) => serde_json::to_value(res),
            Self::StopTransaction(res) => serde_json::to_value(res),
        }
    }
}

pub struct CentralSystem {
    charge_points: DashMap<String, Arc<ChargePoint>>,
    calls: SharedOutboundCalls,
    settings: EngineSettings,
    clock: SharedClock,
}

pub type SharedCentralSystem = Arc<CentralSystem>;

impl CentralSystem {
    pub fn new(calls: SharedOutboundCalls, settings: EngineSettings, clock: SharedClock) -> Self {
        Self {
            charge_points: DashMap::new(),
            calls,
            settings,
            clock,
        }
    }

    pub fn shared(calls: SharedOutboundCalls, settings: EngineSettings, clock: SharedClock) -> SharedCentralSystem {
        Arc::new(Self::new(calls, settings, clock))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Registers a charge point expected to connect as `id`.
    pub fn register(&self, id: &str) -> OcppResult<Arc<ChargePoint>> {
        match self.charge_points.entry(id.to_string()) {
            Entry::Occupied(_) => Err(OcppError::DuplicateId(id.to_string())),
            Entry::Vacant(entry) => {
                let cp = ChargePoint::new(id, self.settings.clone(), self.calls.clone(), self.clock.clone());
                entry.insert(cp.clone());
                info!(charge_point_id = id, "Charge point registered");
                Ok(cp)
            }
        }
    }

    pub fn deregister(&self, id: &str) -> Option<Arc<ChargePoint>> {
        self.charge_points.remove(id).map(|(_, cp)| cp)
    }

    pub fn charge_point(&self, id: &str) -> Option<Arc<ChargePoint>> {
        self.charge_points.get(id).map(|cp| cp.value().clone())
    }

    pub fn charge_point_ids(&self) -> Vec<String> {
        self.charge_points.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn dispatch(&self, id: &str, request: InboundRequest) -> OcppResult<InboundResponse> {
        let Some(cp) = self.charge_point(id) else {
            warn!(charge_point_id = id, action = request.action(), "Message from unknown charge point");
            return Err(OcppError::UnknownChargePoint(id.to_string()));
        };

        let response = match request {
            InboundRequest::Authorize(req) => InboundResponse::Authorize(cp.authorize(req).await),
            InboundRequest::BootNotification(req) => {
                InboundResponse::BootNotification(cp.boot_notification(req).await)
            }
            InboundRequest::DataTransfer(req) => {
                InboundResponse::DataTransfer(cp.data_transfer(req).await)
            }
            InboundRequest::DiagnosticsStatusNotification(req) => {
                InboundResponse::DiagnosticsStatusNotification(
                    cp.diagnostics_status_notification(req).await,
                )
            }
            InboundRequest::FirmwareStatusNotification(req) => {
                InboundResponse::FirmwareStatusNotification(
                    cp.firmware_status_notification(req).await,
                )
            }
            InboundRequest::Heartbeat(req) => InboundResponse::Heartbeat(cp.heartbeat(req).await),
            InboundRequest::MeterValues(req) => {
                InboundResponse::MeterValues(cp.meter_values(req).await)
            }
            InboundRequest::StartTransaction(req) => {
                InboundResponse::StartTransaction(cp.start_transaction(req).await)
            }
            InboundRequest::StatusNotification(req) => {
                InboundResponse::StatusNotification(cp.status_notification(req).await)
            }
            InboundRequest::StopTransaction(req) => {
                InboundResponse::StopTransaction(cp.stop_transaction(req).await)
            }
        };

        Ok(response)
    }

    pub async fn on_link_connected(&self, id: &str) {
        match self.charge_point(id) {
            Some(cp) => cp.on_link_connected().await,
            None => warn!(charge_point_id = id, "Unknown charge point connected"),
        }
    }

    pub async fn on_link_disconnected(&self, id: &str) {
        match self.charge_point(id) {
            Some(cp) => cp.on_link_disconnected().await,
            None => warn!(charge_point_id = id, "Unknown charge point disconnected"),
        }
    }

    pub fn on_transport_error(&self, err: &dyn std::error::Error) {
        error!(error = %err, "Transport error");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::application::charge_point::tests::{boot_request, settings};
    use crate::application::commands::testing::FakeChargePoint;
    use crate::support::clock::system_clock;
    use crate::support::wire::wire_name;

    fn central_system() -> CentralSystem {
        CentralSystem::new(
            FakeChargePoint::accepting(),
            settings(Duration::from_secs(30)),
            system_clock(),
        )
    }

    #[test]
    fn duplicate_registration_fails() {
        let cs = central_system();
        cs.register("cp-1").unwrap();
        assert!(matches!(cs.register("cp-1"), Err(OcppError::DuplicateId(id)) if id == "cp-1"));
        assert_eq!(cs.charge_point_ids(), vec!["cp-1".to_string()]);
    }

    #[tokio::test]
    async fn dispatch_to_unknown_charge_point() {
        let cs = central_system();
        let res = cs
            .dispatch("ghost", InboundRequest::Heartbeat(HeartbeatRequest {}))
            .await;
        assert!(matches!(res, Err(OcppError::UnknownChargePoint(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn data_transfer_is_rejected() {
        let cs = central_system();
        cs.register("cp-1").unwrap();
        let req = DataTransferRequest {
            vendor_string: "acme".into(),
            message_id: None,
            data: None,
        };

        let res = cs.dispatch("cp-1", InboundRequest::DataTransfer(req)).await.unwrap();
        let payload = res.to_value().unwrap();
        assert_eq!(payload["status"], json!("Rejected"));
    }

    #[tokio::test]
    async fn boot_notification_connects_registered_charge_point() {
        let cs = central_system();
        let cp = cs.register("cp-1").unwrap();

        cs.on_link_connected("cp-1").await;
        assert!(!cp.connected());

        let res = cs
            .dispatch("cp-1", InboundRequest::BootNotification(boot_request("TestModel")))
            .await
            .unwrap();
        match res {
            InboundResponse::BootNotification(boot) => assert_eq!(wire_name(&boot.status), "Accepted"),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(cp.connected());

        cs.on_link_disconnected("cp-1").await;
        assert!(!cp.connected());
    }

    #[tokio::test]
    async fn link_events_for_unknown_ids_are_ignored() {
        let cs = central_system();
        cs.on_link_connected("ghost").await;
        cs.on_link_disconnected("ghost").await;
        assert!(cs.charge_point("ghost").is_none());
    }
}
