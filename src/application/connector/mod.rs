//! Connector: status, measurement cache and transaction of one socket
//!
//! A connector only holds a weak reference to its charge point. Outbound
//! calls upgrade it and delegate with this connector's index; the
//! connector lock is released before any of them is awaited.

mod handlers;
mod readings;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v1_6::types::{
    AvailabilityType, ChargePointErrorCode, ChargePointStatus, ChargingProfile, MessageTrigger,
};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::charge_point::ChargePoint;
use super::commands::get_composite_schedule::first_period_limit;
use crate::domain::{EngineSettings, MeasurementSample, OcppError, OcppResult, Transaction};
use crate::support::clock::SharedClock;
use crate::support::shutdown::ShutdownSignal;
use crate::support::wire::wire_name;

pub use readings::Freshness;

/// Floor for the watchdog period; a zero period is not a valid tick.
const MIN_WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct ConnectorState {
    status: Option<StatusNotificationRequest>,
    /// Latest sample per measurement key
    measurements: HashMap<String, MeasurementSample>,
    /// High-water mark of applied meter values
    meter_updated: Option<DateTime<Utc>>,
    transaction: Option<Transaction>,
    last_transaction: Option<Transaction>,
    id_tag: String,
    remote_id_tag: Option<String>,
}

impl ConnectorState {
    fn transaction_id(&self) -> i32 {
        self.transaction.as_ref().map_or(0, |txn| txn.id)
    }

    fn is_waiting_for_auth(&self) -> bool {
        self.transaction.is_none()
            && self
                .status
                .as_ref()
                .is_some_and(|s| matches!(s.status, ChargePointStatus::Preparing))
    }
}

pub struct Connector {
    id: u32,
    charge_point: Weak<ChargePoint>,
    clock: SharedClock,
    settings: EngineSettings,
    state: Mutex<ConnectorState>,
    /// Flips to true on the first StatusNotification
    first_status: watch::Sender<bool>,
}

impl Connector {
    pub fn new(
        id: u32,
        charge_point: Weak<ChargePoint>,
        clock: SharedClock,
        settings: EngineSettings,
    ) -> Self {
        Self {
            id,
            charge_point,
            clock,
            settings,
            state: Mutex::new(ConnectorState::default()),
            first_status: watch::Sender::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn charge_point(&self) -> OcppResult<Arc<ChargePoint>> {
        self.charge_point
            .upgrade()
            .ok_or_else(|| OcppError::NotConnected(format!("connector {}", self.id)))
    }

    fn charge_point_id(&self) -> String {
        self.charge_point
            .upgrade()
            .map(|cp| cp.id().to_string())
            .unwrap_or_default()
    }

    /// Current status. A reported error code other than `NoError` is
    /// surfaced as [`OcppError::Faulted`].
    pub async fn status(&self) -> OcppResult<ChargePointStatus> {
        if !self.charge_point()?.connected() {
            return Err(OcppError::Timeout);
        }

        let state = self.state.lock().await;
        let Some(status) = state.status.as_ref() else {
            return Err(OcppError::Timeout);
        };

        if !matches!(status.error_code, ChargePointErrorCode::NoError) {
            return Err(OcppError::Faulted {
                error_code: wire_name(&status.error_code),
                info: status.info.clone().unwrap_or_default(),
            });
        }

        Ok(status.status.clone())
    }

    pub async fn has_status(&self) -> bool {
        self.state.lock().await.status.is_some()
    }

    /// Active transaction id, 0 when idle.
    pub async fn transaction_id(&self) -> i32 {
        self.state.lock().await.transaction_id()
    }

    pub async fn last_transaction(&self) -> Option<Transaction> {
        self.state.lock().await.last_transaction.clone()
    }

    /// idTag of the running transaction, empty when idle.
    pub async fn id_tag(&self) -> String {
        self.state.lock().await.id_tag.clone()
    }

    /// Vehicle plugged in and waiting for an idTag.
    pub async fn needs_authentication(&self) -> bool {
        self.state.lock().await.is_waiting_for_auth()
    }

    /// idTag used to remote start transactions once a vehicle is waiting.
    pub async fn set_remote_id_tag(&self, id_tag: Option<String>) {
        self.state.lock().await.remote_id_tag = id_tag.filter(|tag| !tag.is_empty());
    }

    pub async fn remote_id_tag(&self) -> Option<String> {
        self.state.lock().await.remote_id_tag.clone()
    }

    /// Enables remote start with `explicit`, falling back to the vendor
    /// idTag discovered during setup and then to the engine default.
    pub async fn enable_remote_start(&self, explicit: Option<&str>) -> OcppResult<()> {
        let id_tag = self.charge_point()?.remote_start_id_tag(explicit).await;
        self.set_remote_id_tag(Some(id_tag)).await;
        Ok(())
    }

    /// Re-applies the cached status, re-running the authorization check.
    pub async fn replay_status(&self) {
        let status = self.state.lock().await.status.clone();
        if let Some(status) = status {
            self.status_notification(status).await;
        }
    }

    /// Waits for the first StatusNotification. Halfway through the wait a
    /// StatusNotification is explicitly requested.
    pub async fn initialized(&self) -> OcppResult<()> {
        let mut rx = self.first_status.subscribe();
        let half = self.settings.timeout / 2;

        let seen = matches!(
            tokio::time::timeout(half, rx.wait_for(|seen| *seen)).await,
            Ok(Ok(_))
        );
        if seen {
            return Ok(());
        }

        if let Ok(cp) = self.charge_point() {
            let connector_id = self.id;
            tokio::spawn(async move {
                if let Err(e) = cp
                    .trigger_message(MessageTrigger::StatusNotification, Some(connector_id))
                    .await
                {
                    warn!(
                        charge_point_id = cp.id(),
                        connector_id,
                        error = %e,
                        "Failed to trigger StatusNotification"
                    );
                }
            });
        }

        let rest = self.settings.timeout.saturating_sub(half);
        let seen = matches!(
            tokio::time::timeout(rest, rx.wait_for(|seen| *seen)).await,
            Ok(Ok(_))
        );
        if seen {
            Ok(())
        } else {
            Err(OcppError::Timeout)
        }
    }

    /// Requests MeterValues whenever no sample arrived for `interval`.
    /// Runs until shutdown or until the charge point is dropped.
    pub async fn watch_dog(&self, interval: Duration, shutdown: ShutdownSignal) {
        let interval = interval.max(MIN_WATCHDOG_INTERVAL);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.wait() => return,
                _ = ticker.tick() => {}
            }

            let Some(cp) = self.charge_point.upgrade() else {
                return;
            };
            if !cp.connected() {
                continue;
            }

            let stale = {
                let state = self.state.lock().await;
                state
                    .meter_updated
                    .map_or(true, |mark| self.clock.is_older_than(mark, interval))
            };
            if stale {
                debug!(charge_point_id = cp.id(), connector_id = self.id, "Meter values overdue");
                if let Err(e) = cp
                    .trigger_message(MessageTrigger::MeterValues, Some(self.id))
                    .await
                {
                    warn!(
                        charge_point_id = cp.id(),
                        connector_id = self.id,
                        error = %e,
                        "Failed to trigger MeterValues"
                    );
                }
            }
        }
    }

    // ── outbound requests for this connector ──────────────────

    pub async fn change_availability(&self, kind: AvailabilityType) -> OcppResult<()> {
        self.charge_point()?.change_availability(self.id, kind).await
    }

    pub async fn remote_start_transaction(&self, id_tag: &str) -> OcppResult<()> {
        self.charge_point()?
            .remote_start_transaction(self.id, id_tag)
            .await
    }

    pub async fn set_charging_profile(&self, profile: ChargingProfile) -> OcppResult<()> {
        self.charge_point()?
            .set_charging_profile(self.id, profile)
            .await
    }

    pub async fn get_composite_schedule(&self, duration_secs: i32) -> OcppResult<Option<Value>> {
        self.charge_point()?
            .get_composite_schedule(self.id, duration_secs)
            .await
    }

    /// Limit of the first period of the composite schedule.
    pub async fn get_schedule_limit(&self, duration_secs: i32) -> OcppResult<f64> {
        self.get_composite_schedule(duration_secs)
            .await?
            .as_ref()
            .and_then(first_period_limit)
            .ok_or(OcppError::NotAvailable)
    }

    pub async fn trigger_message(&self, requested_message: MessageTrigger) -> OcppResult<()> {
        self.charge_point()?
            .trigger_message(requested_message, Some(self.id))
            .await
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::charge_point::tests::{boot_request, settings};
    use crate::application::commands::testing::FakeChargePoint;
    use crate::support::clock::{ManualClock, SharedClock};
    use serde_json::json;

    pub(crate) struct Fixture {
        pub cp: Arc<ChargePoint>,
        pub connector: Arc<Connector>,
        pub clock: Arc<ManualClock>,
        pub fake: Arc<FakeChargePoint>,
    }

    /// Booted charge point with connector 1 and a manual clock.
    pub(crate) async fn fixture(timeout: Duration) -> Fixture {
        let clock = ManualClock::shared(Utc::now());
        let fake = FakeChargePoint::accepting();
        let cp = ChargePoint::new("cp-1", settings(timeout), fake.clone(), clock.clone() as SharedClock);
        cp.boot_notification(boot_request("TestModel")).await;
        let connector = cp.connector(1).await;
        Fixture { cp, connector, clock, fake }
    }

    pub(crate) fn status(value: &str, timestamp: Option<DateTime<Utc>>) -> StatusNotificationRequest {
        let mut req = json!({
            "connectorId": 1,
            "errorCode": "NoError",
            "status": value
        });
        if let Some(ts) = timestamp {
            req["timestamp"] = json!(ts);
        }
        serde_json::from_value(req).unwrap()
    }

    #[tokio::test]
    async fn status_requires_connected_charge_point() {
        let clock = ManualClock::shared(Utc::now());
        let cp = ChargePoint::new(
            "cp-1",
            settings(Duration::from_secs(30)),
            FakeChargePoint::accepting(),
            clock as SharedClock,
        );
        let connector = cp.connector(1).await;
        connector.status_notification(status("Available", None)).await;
        assert_eq!(connector.status().await.unwrap_err(), OcppError::Timeout);
    }

    #[tokio::test]
    async fn status_reports_fault() {
        let f = fixture(Duration::from_secs(30)).await;
        assert_eq!(f.connector.status().await.unwrap_err(), OcppError::Timeout);

        let req: StatusNotificationRequest = serde_json::from_value(json!({
            "connectorId": 1,
            "errorCode": "GroundFailure",
            "info": "RCD tripped",
            "status": "Faulted"
        }))
        .unwrap();
        f.connector.status_notification(req).await;

        assert_eq!(
            f.connector.status().await.unwrap_err(),
            OcppError::Faulted {
                error_code: "GroundFailure".into(),
                info: "RCD tripped".into()
            }
        );
    }

    #[tokio::test]
    async fn initialized_returns_once_status_seen() {
        let f = fixture(Duration::from_millis(100)).await;
        f.connector.status_notification(status("Available", None)).await;
        assert_eq!(f.connector.initialized().await, Ok(()));
        assert!(f.fake.payloads("TriggerMessage").is_empty());
    }

    #[tokio::test]
    async fn initialized_retriggers_status_then_times_out() {
        let f = fixture(Duration::from_millis(60)).await;
        assert_eq!(f.connector.initialized().await, Err(OcppError::Timeout));
        assert_eq!(
            f.fake.payloads("TriggerMessage"),
            vec![json!({"requestedMessage": "StatusNotification", "connectorId": 1})]
        );
    }

    #[tokio::test]
    async fn initialized_succeeds_on_late_status() {
        let f = fixture(Duration::from_millis(200)).await;
        let connector = f.connector.clone();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(130)).await;
            connector.status_notification(status("Available", None)).await;
        });

        assert_eq!(f.connector.initialized().await, Ok(()));
        late.await.unwrap();
    }

    #[tokio::test]
    async fn remote_start_falls_back_to_default_id_tag() {
        let f = fixture(Duration::from_millis(100)).await;
        f.connector.enable_remote_start(Some("")).await.unwrap();
        assert_eq!(
            f.connector.remote_id_tag().await,
            Some(f.cp.settings().default_id_tag.clone())
        );
    }

    #[tokio::test]
    async fn preparing_with_remote_id_tag_starts_transaction() {
        let f = fixture(Duration::from_millis(100)).await;
        f.connector.set_remote_id_tag(Some("remote-tag".into())).await;

        f.connector.status_notification(status("Preparing", None)).await;
        assert!(f.connector.needs_authentication().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            f.fake.payloads("RemoteStartTransaction"),
            vec![json!({"connectorId": 1, "idTag": "remote-tag"})]
        );
    }

    #[tokio::test]
    async fn preparing_without_remote_id_tag_waits_for_local_auth() {
        let f = fixture(Duration::from_millis(100)).await;
        f.connector.status_notification(status("Preparing", None)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(f.fake.payloads("RemoteStartTransaction").is_empty());
    }

    #[tokio::test]
    async fn schedule_limit_reads_first_period() {
        let clock = ManualClock::shared(Utc::now());
        let fake = FakeChargePoint::new(|_, _| {
            Some(Ok(json!({
                "status": "Accepted",
                "connectorId": 1,
                "chargingSchedule": {
                    "chargingRateUnit": "A",
                    "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 10.0}]
                }
            })))
        });
        let cp = ChargePoint::new("cp-1", settings(Duration::from_millis(100)), fake, clock as SharedClock);
        let connector = cp.connector(1).await;

        assert_eq!(connector.get_schedule_limit(60).await, Ok(10.0));
    }

    #[tokio::test]
    async fn watch_dog_triggers_overdue_meter_values() {
        let f = fixture(Duration::from_secs(30)).await;
        let shutdown = ShutdownSignal::new();
        let connector = f.connector.clone();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            connector.watch_dog(Duration::from_millis(20), signal).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        task.await.unwrap();

        let triggers = f.fake.payloads("TriggerMessage");
        assert!(!triggers.is_empty());
        assert_eq!(triggers[0], json!({"requestedMessage": "MeterValues", "connectorId": 1}));
    }

    #[tokio::test]
    async fn watch_dog_accepts_zero_interval() {
        let f = fixture(Duration::from_secs(30)).await;
        let shutdown = ShutdownSignal::new();
        let connector = f.connector.clone();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            connector.watch_dog(Duration::ZERO, signal).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn watch_dog_stops_when_charge_point_dropped() {
        let f = fixture(Duration::from_secs(30)).await;
        let connector = f.connector.clone();
        drop(f.cp);

        tokio::time::timeout(
            Duration::from_millis(200),
            connector.watch_dog(Duration::from_millis(10), ShutdownSignal::new()),
        )
        .await
        .unwrap();
    }
}
