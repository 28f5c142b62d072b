//! Inbound messages scoped to one connector

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{ChargePointStatus, MeterValue};
use tracing::{debug, info, trace, warn};

use super::{Connector, ConnectorState};
use crate::application::charge_point::accepted_id_tag;
use crate::domain::measurement::{phase_key, CURRENT_IMPORT, POWER_ACTIVE_IMPORT};
use crate::domain::{MeasurementSample, Transaction};
use crate::support::wire::wire_name;

impl ConnectorState {
    /// Zeroes cached power samples. With `force` the `Lx-N` keys are
    /// written even when never reported, so a reading of 0 W is available
    /// right away.
    fn set_power_to_zero(&mut self, force: bool) {
        if self.measurements.contains_key(POWER_ACTIVE_IMPORT) {
            self.measurements.insert(
                POWER_ACTIVE_IMPORT.to_string(),
                MeasurementSample::zero(POWER_ACTIVE_IMPORT, None, "W"),
            );
        }

        for phase in 1..=3 {
            let key = phase_key(POWER_ACTIVE_IMPORT, phase);
            if self.measurements.contains_key(&key) {
                let zero = MeasurementSample::zero(POWER_ACTIVE_IMPORT, Some(&format!("L{}", phase)), "W");
                self.measurements.insert(key.clone(), zero);
            }

            let key_n = format!("{}-N", key);
            if force || self.measurements.contains_key(&key_n) {
                let zero = MeasurementSample::zero(POWER_ACTIVE_IMPORT, Some(&format!("L{}-N", phase)), "W");
                self.measurements.insert(key_n, zero);
            }
        }
    }

    fn assume_meter_stopped(&mut self, now: DateTime<Utc>) {
        self.meter_updated = Some(now);
        self.set_power_to_zero(false);

        for phase in 1..=3 {
            let key = phase_key(CURRENT_IMPORT, phase);
            if self.measurements.contains_key(&key) {
                let zero = MeasurementSample::zero(CURRENT_IMPORT, Some(&format!("L{}", phase)), "A");
                self.measurements.insert(key, zero);
            }
        }
    }
}

fn contains_power(meter_values: &[MeterValue]) -> bool {
    meter_values.iter().any(|mv| {
        mv.sampled_value
            .iter()
            .any(|s| s.measurand.as_ref().map(wire_name).as_deref() == Some(POWER_ACTIVE_IMPORT))
    })
}

impl Connector {
    /// First status is always taken. Later ones must not be older than the
    /// current one nor than the message expiry window.
    fn accepts_status(&self, current: &StatusNotificationRequest, timestamp: DateTime<Utc>) -> bool {
        if self
            .clock
            .is_older_than(timestamp, self.settings.message_expiry)
        {
            return false;
        }

        match current.timestamp {
            Some(previous) => timestamp >= previous,
            None => true,
        }
    }

    pub async fn status_notification(&self, req: StatusNotificationRequest) -> StatusNotificationResponse {
        let remote_start = {
            let mut state = self.state.lock().await;

            let first = state.status.is_none();
            let accept = match (&state.status, req.timestamp) {
                (Some(current), Some(timestamp)) => self.accepts_status(current, timestamp),
                _ => true,
            };

            if accept {
                state.status = Some(req);
            } else {
                trace!(connector_id = self.id, timestamp = ?req.timestamp, "Ignoring outdated status");
            }
            if first {
                self.first_status.send_replace(true);
            }

            if state.is_waiting_for_auth() {
                if state.remote_id_tag.is_none() {
                    debug!(connector_id = self.id, "Waiting for local authentication");
                }
                state.remote_id_tag.clone()
            } else {
                None
            }
        };

        if let Some(id_tag) = remote_start {
            if let Ok(cp) = self.charge_point() {
                let connector_id = self.id;
                tokio::spawn(async move {
                    if let Err(e) = cp.remote_start_transaction(connector_id, &id_tag).await {
                        warn!(
                            charge_point_id = cp.id(),
                            connector_id,
                            error = %e,
                            "RemoteStartTransaction failed"
                        );
                    }
                });
            }
        }

        StatusNotificationResponse {}
    }

    pub async fn meter_values(&self, req: &MeterValuesRequest) {
        let mut state = self.state.lock().await;

        if let Some(transaction_id) = req.transaction_id.filter(|id| *id > 0) {
            let recoverable = state.transaction.is_none()
                && state.status.as_ref().is_some_and(|s| {
                    matches!(
                        s.status,
                        ChargePointStatus::Charging
                            | ChargePointStatus::SuspendedEV
                            | ChargePointStatus::SuspendedEVSE
                    )
                });
            if recoverable {
                debug!(connector_id = self.id, transaction_id, "Recovered transaction");
                state.transaction = Some(Transaction::start(transaction_id, "", self.clock.now()));
            }
        }

        // wallboxes stop reporting power once the vehicle is gone
        if !contains_power(&req.meter_value) {
            state.set_power_to_zero(true);
        }

        let mut entries: Vec<&MeterValue> = req.meter_value.iter().collect();
        entries.sort_by_key(|mv| mv.timestamp);

        for entry in entries {
            let timestamp = entry.timestamp;
            if state.meter_updated.is_some_and(|mark| timestamp <= mark) {
                trace!(connector_id = self.id, %timestamp, "Ignoring outdated meter values");
                continue;
            }

            for sampled in &entry.sampled_value {
                let sample = MeasurementSample::from_sampled(sampled);
                state.measurements.insert(sample.key(), sample);
            }
            state.meter_updated = Some(timestamp);
        }
    }

    pub async fn start_transaction(
        &self,
        req: &StartTransactionRequest,
        transaction_id: i32,
    ) -> StartTransactionResponse {
        let mut state = self.state.lock().await;
        state.transaction = Some(Transaction::start(transaction_id, req.id_tag.clone(), req.timestamp));
        state.id_tag = req.id_tag.clone();

        StartTransactionResponse {
            id_tag_info: accepted_id_tag(),
            transaction_id,
        }
    }

    /// Clears the transaction unless the request is older than the
    /// transaction expiry window.
    pub async fn stop_transaction(&self, req: &StopTransactionRequest) -> StopTransactionResponse {
        let response = StopTransactionResponse {
            id_tag_info: Some(accepted_id_tag()),
        };

        if self
            .clock
            .is_older_than(req.timestamp, self.settings.transaction_expiry)
        {
            warn!(
                charge_point_id = %self.charge_point_id(),
                connector_id = self.id,
                timestamp = %req.timestamp,
                "Stale StopTransaction timestamp, keeping transaction"
            );
            return response;
        }

        let mut state = self.state.lock().await;
        if let Some(mut txn) = state.transaction.take() {
            if txn.id != req.transaction_id {
                warn!(
                    connector_id = self.id,
                    tracked = txn.id,
                    reported = req.transaction_id,
                    "StopTransaction id mismatch"
                );
            }
            txn.stopped_at = Some(req.timestamp);
            info!(
                connector_id = self.id,
                transaction_id = txn.id,
                duration_secs = (req.timestamp - txn.started_at).num_seconds(),
                "Transaction stopped"
            );
            state.last_transaction = Some(txn);
        }
        state.id_tag.clear();
        state.assume_meter_stopped(self.clock.now());

        response
    }
}
