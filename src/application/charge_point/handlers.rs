//! Inbound OCPP 1.6 messages addressed to the charge point
//!
//! Handlers always answer. The only hard rejection is DataTransfer.

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
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, DataTransferStatus, IdTagInfo, RegistrationStatus,
};
use tracing::{debug, info, warn};

use super::ChargePoint;
use crate::domain::BootState;

pub(crate) fn accepted_id_tag() -> IdTagInfo {
    IdTagInfo {
        status: AuthorizationStatus::Accepted,
        expiry_date: None,
        parent_id_tag: None,
    }
}

impl ChargePoint {
    pub async fn authorize(&self, req: AuthorizeRequest) -> AuthorizeResponse {
        info!(charge_point_id = self.id.as_str(), id_tag = req.id_tag.as_str(), "Authorize");

        AuthorizeResponse {
            id_tag_info: accepted_id_tag(),
        }
    }

    pub async fn boot_notification(&self, req: BootNotificationRequest) -> BootNotificationResponse {
        info!(
            charge_point_id = self.id.as_str(),
            vendor = req.charge_point_vendor.as_str(),
            model = req.charge_point_model.as_str(),
            firmware = ?req.firmware_version,
            "BootNotification"
        );

        let reboot = {
            let mut state = self.state.lock().await;
            state.stop_boot_timer();
            state.boot_state = BootState::Connected;
            state.boot_result = Some(req.clone());
            self.publish_connected(true);
            state.initialized
        };

        if reboot {
            info!(charge_point_id = self.id.as_str(), "Charge point reconnected after reboot");
        }
        self.emit_boot_signal(Some(req));

        BootNotificationResponse {
            current_time: self.clock.now(),
            interval: self.settings.timeout.as_secs().try_into().unwrap_or(30),
            status: RegistrationStatus::Accepted,
        }
    }

    pub async fn heartbeat(&self, _req: HeartbeatRequest) -> HeartbeatResponse {
        let now = self.clock.now();
        self.state.lock().await.last_heartbeat = Some(now);
        debug!(charge_point_id = self.id.as_str(), "Heartbeat");

        HeartbeatResponse { current_time: now }
    }

    pub async fn data_transfer(&self, req: DataTransferRequest) -> DataTransferResponse {
        info!(
            charge_point_id = self.id.as_str(),
            vendor = req.vendor_string.as_str(),
            message_id = ?req.message_id,
            "DataTransfer rejected"
        );

        DataTransferResponse {
            status: DataTransferStatus::Rejected,
            data: None,
        }
    }

    /// Connector 0 addresses the whole charge point and is kept here.
    pub async fn status_notification(
        &self,
        req: StatusNotificationRequest,
    ) -> StatusNotificationResponse {
        let connector_id = req.connector_id as u32;
        debug!(
            charge_point_id = self.id.as_str(),
            connector_id,
            status = ?req.status,
            error_code = ?req.error_code,
            "StatusNotification"
        );

        if connector_id == 0 {
            self.state.lock().await.station_status = Some(req);
            return StatusNotificationResponse {};
        }

        self.connector(connector_id).await.status_notification(req).await
    }

    pub async fn meter_values(&self, req: MeterValuesRequest) -> MeterValuesResponse {
        let connector_id = req.connector_id as u32;
        debug!(
            charge_point_id = self.id.as_str(),
            connector_id,
            transaction_id = ?req.transaction_id,
            samples = req.meter_value.len(),
            "MeterValues"
        );

        if connector_id == 0 {
            debug!(charge_point_id = self.id.as_str(), "Ignoring MeterValues for connector 0");
        } else {
            self.connector(connector_id).await.meter_values(&req).await;
        }

        self.meter_seq.send_modify(|seq| *seq += 1);

        MeterValuesResponse {}
    }

    pub async fn start_transaction(&self, req: StartTransactionRequest) -> StartTransactionResponse {
        let connector_id = req.connector_id as u32;
        let transaction_id = self.allocate_transaction_id(req.timestamp);
        info!(
            charge_point_id = self.id.as_str(),
            connector_id,
            transaction_id,
            id_tag = req.id_tag.as_str(),
            "StartTransaction"
        );

        self.connector(connector_id)
            .await
            .start_transaction(&req, transaction_id)
            .await
    }

    /// Routed to the connector running the transaction. Charge points
    /// reporting a different id still stop the single active transaction.
    pub async fn stop_transaction(&self, req: StopTransactionRequest) -> StopTransactionResponse {
        let transaction_id = req.transaction_id;
        info!(
            charge_point_id = self.id.as_str(),
            transaction_id,
            reason = ?req.reason,
            "StopTransaction"
        );

        let mut active = Vec::new();
        let mut matching = None;
        for connector in self.connectors().await {
            let txn = connector.transaction_id().await;
            if txn == transaction_id && txn != 0 {
                matching = Some(connector);
                break;
            }
            if txn != 0 {
                active.push(connector);
            }
        }

        let connector = match matching {
            Some(connector) => Some(connector),
            None if active.len() == 1 => active.pop(),
            None => None,
        };

        match connector {
            Some(connector) => connector.stop_transaction(&req).await,
            None => {
                warn!(
                    charge_point_id = self.id.as_str(),
                    transaction_id,
                    "StopTransaction for unknown transaction"
                );
                StopTransactionResponse {
                    id_tag_info: Some(accepted_id_tag()),
                }
            }
        }
    }

    pub async fn diagnostics_status_notification(
        &self,
        req: DiagnosticsStatusNotificationRequest,
    ) -> DiagnosticsStatusNotificationResponse {
        info!(charge_point_id = self.id.as_str(), status = ?req.status, "DiagnosticsStatusNotification");
        DiagnosticsStatusNotificationResponse {}
    }

    pub async fn firmware_status_notification(
        &self,
        req: FirmwareStatusNotificationRequest,
    ) -> FirmwareStatusNotificationResponse {
        info!(charge_point_id = self.id.as_str(), status = ?req.status, "FirmwareStatusNotification");
        FirmwareStatusNotificationResponse {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::application::charge_point::tests::settings;
    use crate::application::commands::testing::FakeChargePoint;
    use crate::support::clock::{Clock, ManualClock, SharedClock};
    use crate::support::wire::wire_name;

    fn charge_point() -> (Arc<ChargePoint>, Arc<ManualClock>) {
        let clock = ManualClock::shared(Utc::now());
        let cp = ChargePoint::new(
            "cp-1",
            settings(Duration::from_secs(30)),
            FakeChargePoint::accepting(),
            clock.clone() as SharedClock,
        );
        (cp, clock)
    }

    fn start(connector_id: u32, timestamp: chrono::DateTime<Utc>) -> StartTransactionRequest {
        serde_json::from_value(json!({
            "connectorId": connector_id,
            "idTag": "tag-1",
            "meterStart": 0,
            "timestamp": timestamp
        }))
        .unwrap()
    }

    fn stop(transaction_id: i32, timestamp: chrono::DateTime<Utc>) -> StopTransactionRequest {
        serde_json::from_value(json!({
            "transactionId": transaction_id,
            "meterStop": 100,
            "timestamp": timestamp
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn data_transfer_is_rejected() {
        let (cp, _) = charge_point();
        let req = DataTransferRequest {
            vendor_string: "acme".into(),
            message_id: Some("x".into()),
            data: None,
        };
        let res = cp.data_transfer(req).await;
        assert_eq!(wire_name(&res.status), "Rejected");
    }

    #[tokio::test]
    async fn heartbeat_records_time() {
        let (cp, clock) = charge_point();
        let res = cp.heartbeat(HeartbeatRequest {}).await;
        assert_eq!(res.current_time, clock.now());
        assert_eq!(cp.last_heartbeat().await, Some(clock.now()));
    }

    #[tokio::test]
    async fn start_transaction_allocates_increasing_ids() {
        let (cp, clock) = charge_point();
        let first = cp.start_transaction(start(1, clock.now())).await;
        let second = cp.start_transaction(start(2, clock.now())).await;
        assert_eq!(first.transaction_id, 1);
        assert_eq!(second.transaction_id, 2);
        assert_eq!(wire_name(&first.id_tag_info.status), "Accepted");
        assert_eq!(cp.connector(2).await.transaction_id().await, 2);
    }

    #[tokio::test]
    async fn stale_start_transaction_uses_default_id() {
        let (cp, clock) = charge_point();
        let stale = clock.now() - chrono::Duration::hours(2);
        let res = cp.start_transaction(start(1, stale)).await;
        assert_eq!(res.transaction_id, 1);
        assert_eq!(wire_name(&res.id_tag_info.status), "Accepted");

        // counter did not advance
        let res = cp.start_transaction(start(1, clock.now())).await;
        assert_eq!(res.transaction_id, 1);
        let res = cp.start_transaction(start(2, clock.now())).await;
        assert_eq!(res.transaction_id, 2);
    }

    #[tokio::test]
    async fn stop_transaction_with_mismatched_id_clears_single_active() {
        let (cp, clock) = charge_point();
        cp.start_transaction(start(1, clock.now())).await;

        let res = cp.stop_transaction(stop(99, clock.now())).await;
        assert_eq!(res.id_tag_info.map(|info| wire_name(&info.status)), Some("Accepted".into()));
        assert_eq!(cp.connector(1).await.transaction_id().await, 0);
    }

    #[tokio::test]
    async fn stop_transaction_routes_by_id() {
        let (cp, clock) = charge_point();
        cp.start_transaction(start(1, clock.now())).await;
        cp.start_transaction(start(2, clock.now())).await;

        cp.stop_transaction(stop(2, clock.now())).await;
        assert_eq!(cp.connector(1).await.transaction_id().await, 1);
        assert_eq!(cp.connector(2).await.transaction_id().await, 0);
    }

    #[tokio::test]
    async fn stale_stop_transaction_keeps_transaction() {
        let (cp, clock) = charge_point();
        cp.start_transaction(start(1, clock.now())).await;

        let stale = clock.now() - chrono::Duration::hours(2);
        let res = cp.stop_transaction(stop(1, stale)).await;
        assert!(res.id_tag_info.is_some());
        assert_eq!(cp.connector(1).await.transaction_id().await, 1);
    }

    #[tokio::test]
    async fn station_status_is_kept_on_charge_point() {
        let (cp, _) = charge_point();
        let req: StatusNotificationRequest = serde_json::from_value(json!({
            "connectorId": 0,
            "errorCode": "NoError",
            "status": "Available"
        }))
        .unwrap();
        cp.status_notification(req).await;

        let status = cp.station_status().await.map(|s| wire_name(&s.status));
        assert_eq!(status, Some("Available".into()));
        assert!(cp.connectors().await.is_empty());
    }
}
