//! Charge point: boot/connectivity state machine, connectors and capabilities
//!
//! ```text
//!                 link up                BootNotification / boot timer
//! Disconnected ───────────► AwaitingBoot ─────────────────────────────► Connected
//!      ▲                         │                                          │
//!      └──────── link down ──────┴──────────────── link down ───────────────┘
//! ```
//!
//! All mutable fields live behind one `tokio::sync::Mutex`. The lock is never
//! held across an outbound call or while calling into a connector.
//! Connectivity is published through a `watch` channel so `connected()`
//! needs no lock.

mod handlers;
mod requests;
mod setup;

pub(crate) use handlers::accepted_id_tag;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::boot_notification::BootNotificationRequest;
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::commands::{CallTarget, SharedOutboundCalls};
use super::connector::Connector;
use crate::domain::{BootState, Capabilities, EngineSettings, OcppError, OcppResult, SetupOptions};
use crate::support::clock::SharedClock;
use crate::support::shutdown::ShutdownSignal;

/// Transaction id handed out for StartTransaction requests with a stale
/// timestamp. Reused across sessions.
pub const DEFAULT_TRANSACTION_ID: i32 = 1;

/// Boot notification delivered to the reboot monitor. `None` when the boot
/// timer connected the charge point without a BootNotification.
pub type BootSignal = Option<BootNotificationRequest>;

struct BootTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ChargePointState {
    boot_state: BootState,
    boot_timer: Option<BootTimer>,
    timer_generation: u64,
    initialized: bool,
    capabilities: Capabilities,
    connectors: BTreeMap<u32, Arc<Connector>>,
    boot_result: Option<BootNotificationRequest>,
    last_heartbeat: Option<DateTime<Utc>>,
    /// StatusNotification for connector 0
    station_status: Option<StatusNotificationRequest>,
}

impl ChargePointState {
    fn stop_boot_timer(&mut self) {
        if let Some(timer) = self.boot_timer.take() {
            timer.handle.abort();
        }
    }
}

pub struct ChargePoint {
    id: String,
    settings: EngineSettings,
    calls: SharedOutboundCalls,
    clock: SharedClock,
    self_ref: Weak<ChargePoint>,
    state: Mutex<ChargePointState>,
    connected: watch::Sender<bool>,
    boot_tx: mpsc::Sender<BootSignal>,
    boot_rx: Mutex<mpsc::Receiver<BootSignal>>,
    /// Bumped on every MeterValues message
    meter_seq: watch::Sender<u64>,
    txn_counter: AtomicI32,
}

impl ChargePoint {
    pub fn new(
        id: impl Into<String>,
        settings: EngineSettings,
        calls: SharedOutboundCalls,
        clock: SharedClock,
    ) -> Arc<Self> {
        let (boot_tx, boot_rx) = mpsc::channel(1);
        let id = id.into();

        Arc::new_cyclic(|self_ref| Self {
            id,
            settings,
            calls,
            clock,
            self_ref: self_ref.clone(),
            state: Mutex::new(ChargePointState::default()),
            connected: watch::Sender::new(false),
            boot_tx,
            boot_rx: Mutex::new(boot_rx),
            meter_seq: watch::Sender::new(0),
            txn_counter: AtomicI32::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub(crate) fn target(&self) -> CallTarget<'_> {
        CallTarget {
            calls: self.calls.as_ref(),
            charge_point_id: &self.id,
            timeout: self.settings.timeout,
        }
    }

    /// Link up and booted (or boot timer expired).
    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub async fn boot_state(&self) -> BootState {
        self.state.lock().await.boot_state
    }

    pub async fn initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.state.lock().await.capabilities.clone()
    }

    pub async fn has_measurement(&self, measurand: &str) -> bool {
        self.state.lock().await.capabilities.has_measurement(measurand)
    }

    pub async fn boot_result(&self) -> Option<BootNotificationRequest> {
        self.state.lock().await.boot_result.clone()
    }

    pub async fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_heartbeat
    }

    pub async fn station_status(&self) -> Option<StatusNotificationRequest> {
        self.state.lock().await.station_status.clone()
    }

    pub async fn boot_timer_armed(&self) -> bool {
        self.state.lock().await.boot_timer.is_some()
    }

    /// Connector `id` (1-based), created on first reference.
    pub async fn connector(&self, id: u32) -> Arc<Connector> {
        let mut state = self.state.lock().await;
        state
            .connectors
            .entry(id)
            .or_insert_with(|| {
                debug!(charge_point_id = self.id.as_str(), connector_id = id, "Creating connector");
                Arc::new(Connector::new(
                    id,
                    self.self_ref.clone(),
                    self.clock.clone(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }

    pub async fn connectors(&self) -> Vec<Arc<Connector>> {
        self.state.lock().await.connectors.values().cloned().collect()
    }

    /// Configured idTag for remote start: explicit, then vendor override,
    /// then the engine default.
    pub async fn remote_start_id_tag(&self, explicit: Option<&str>) -> String {
        let vendor = self.state.lock().await.capabilities.id_tag.clone();
        explicit
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .or(vendor)
            .unwrap_or_else(|| self.settings.default_id_tag.clone())
    }

    /// Transaction id for a StartTransaction stamped `timestamp`.
    pub(crate) fn allocate_transaction_id(&self, timestamp: DateTime<Utc>) -> i32 {
        if self
            .clock
            .is_older_than(timestamp, self.settings.transaction_expiry)
        {
            warn!(
                charge_point_id = self.id.as_str(),
                %timestamp,
                "Stale StartTransaction timestamp, using default transaction id"
            );
            return DEFAULT_TRANSACTION_ID;
        }
        self.txn_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    /// Non-blocking, at most one pending signal. A signal arriving while
    /// one is pending is dropped.
    fn emit_boot_signal(&self, signal: BootSignal) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.boot_tx.try_send(signal) {
            debug!(charge_point_id = self.id.as_str(), "Boot signal pending, dropping notification");
        }
    }

    // ── link lifecycle ─────────────────────────────────────────

    /// Websocket link established: wait for BootNotification, connect anyway
    /// once the boot timer expires.
    pub async fn on_link_connected(&self) {
        let mut state = self.state.lock().await;
        state.stop_boot_timer();
        state.boot_state = BootState::AwaitingBoot;
        state.timer_generation += 1;
        self.publish_connected(false);

        let generation = state.timer_generation;
        let cp = self.self_ref.clone();
        let timeout = self.settings.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(cp) = cp.upgrade() {
                cp.on_boot_timeout(generation).await;
            }
        });
        state.boot_timer = Some(BootTimer { generation, handle });

        info!(charge_point_id = self.id.as_str(), ?timeout, "Link connected, awaiting BootNotification");
    }

    pub async fn on_link_disconnected(&self) {
        let mut state = self.state.lock().await;
        state.stop_boot_timer();
        state.boot_state = BootState::Disconnected;
        self.publish_connected(false);

        info!(charge_point_id = self.id.as_str(), "Link disconnected");
    }

    async fn on_boot_timeout(&self, generation: u64) {
        let signal = {
            let mut state = self.state.lock().await;
            let current = state
                .boot_timer
                .as_ref()
                .is_some_and(|timer| timer.generation == generation);
            if !current || state.boot_state != BootState::AwaitingBoot {
                return;
            }

            state.boot_timer = None;
            state.boot_state = BootState::Connected;
            self.publish_connected(true);
            warn!(charge_point_id = self.id.as_str(), "No BootNotification received, connecting anyway");

            state.initialized.then(|| state.boot_result.clone())
        };

        if let Some(signal) = signal {
            info!(charge_point_id = self.id.as_str(), "Charge point reconnected after reboot");
            self.emit_boot_signal(signal);
        }
    }

    // ── supervision ────────────────────────────────────────────

    /// Wait until the charge point is connected for the first time.
    pub async fn wait_connected(&self, timeout: Duration) -> OcppResult<()> {
        let mut rx = self.connected.subscribe();
        let connected = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|connected| *connected)).await,
            Ok(Ok(_))
        );
        if connected {
            Ok(())
        } else {
            Err(OcppError::Timeout)
        }
    }

    /// Next boot signal, or `None` after `timeout`.
    async fn recv_boot_signal(&self, timeout: Duration) -> Option<BootSignal> {
        tokio::time::timeout(timeout, async {
            self.boot_rx.lock().await.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Discard a signal that arrived before setup completed.
    fn drain_boot_signal(&self) {
        if let Ok(mut rx) = self.boot_rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }

    /// Consume boot signals; a boot of an initialized charge point is an
    /// unexpected reboot and re-runs setup.
    pub async fn monitor_reboot(&self, options: SetupOptions, shutdown: ShutdownSignal) {
        loop {
            let signal = tokio::select! {
                _ = shutdown.wait() => return,
                signal = async { self.boot_rx.lock().await.recv().await } => signal,
            };
            let Some(signal) = signal else { return };

            if !self.initialized().await {
                continue;
            }

            info!(
                charge_point_id = self.id.as_str(),
                model = signal.as_ref().map(|boot| boot.charge_point_model.as_str()),
                "Reboot detected, restarting setup"
            );
            if let Err(e) = self.setup(&options).await {
                error!(charge_point_id = self.id.as_str(), error = %e, "Setup after reboot failed");
            }
        }
    }
}

impl std::fmt::Debug for ChargePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargePoint")
            .field("id", &self.id)
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::commands::testing::FakeChargePoint;
    use crate::support::clock::system_clock;
    use serde_json::json;

    pub(crate) fn settings(timeout: Duration) -> EngineSettings {
        EngineSettings {
            timeout,
            ..Default::default()
        }
    }

    pub(crate) fn boot_request(model: &str) -> BootNotificationRequest {
        serde_json::from_value(json!({
            "chargePointVendor": "TestVendor",
            "chargePointModel": model
        }))
        .unwrap()
    }

    fn model(boot: Option<BootNotificationRequest>) -> Option<String> {
        boot.map(|boot| boot.charge_point_model)
    }

    fn charge_point(timeout: Duration) -> Arc<ChargePoint> {
        ChargePoint::new(
            "test-cp",
            settings(timeout),
            FakeChargePoint::accepting(),
            system_clock(),
        )
    }

    #[tokio::test]
    async fn boot_notification_stores_result_and_connects() {
        let cp = charge_point(Duration::from_secs(30));
        assert!(!cp.connected());
        assert!(cp.boot_result().await.is_none());

        let res = cp.boot_notification(boot_request("TestModel")).await;
        assert_eq!(crate::support::wire::wire_name(&res.status), "Accepted");
        assert_eq!(res.interval, 30);

        assert!(cp.connected());
        assert_eq!(model(cp.boot_result().await), Some("TestModel".into()));
        let signal = cp.recv_boot_signal(Duration::from_millis(100)).await;
        assert_eq!(model(signal.flatten()), Some("TestModel".into()));
    }

    #[tokio::test]
    async fn boot_notification_stops_timer() {
        let cp = charge_point(Duration::from_secs(30));
        cp.on_link_connected().await;
        assert!(cp.boot_timer_armed().await);
        assert_eq!(cp.boot_state().await, BootState::AwaitingBoot);

        cp.boot_notification(boot_request("TestModel")).await;
        assert!(cp.connected());
        assert!(!cp.boot_timer_armed().await);
        assert_eq!(cp.boot_state().await, BootState::Connected);
    }

    #[tokio::test]
    async fn boot_timeout_falls_back_to_connected() {
        let cp = charge_point(Duration::from_millis(50));
        cp.on_link_connected().await;
        assert!(!cp.connected());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cp.connected());
        assert_eq!(cp.boot_state().await, BootState::Connected);
    }

    #[tokio::test]
    async fn disconnect_cancels_boot_timer() {
        let cp = charge_point(Duration::from_millis(100));
        cp.on_link_connected().await;
        assert!(cp.boot_timer_armed().await);

        cp.on_link_disconnected().await;
        assert!(!cp.boot_timer_armed().await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cp.connected());
        assert_eq!(cp.boot_state().await, BootState::Disconnected);
    }

    #[tokio::test]
    async fn full_boot_channel_keeps_first_signal() {
        let cp = charge_point(Duration::from_secs(30));
        cp.boot_tx.try_send(Some(boot_request("First"))).unwrap();

        cp.boot_notification(boot_request("Second")).await;

        assert_eq!(model(cp.boot_result().await), Some("Second".into()));
        assert!(cp.connected());

        let signal = cp.recv_boot_signal(Duration::from_millis(100)).await;
        assert_eq!(model(signal.flatten()), Some("First".into()));
        assert!(cp.recv_boot_signal(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn reboot_after_initialization_emits_signal() {
        let cp = charge_point(Duration::from_secs(30));
        cp.boot_notification(boot_request("TestModel")).await;
        cp.drain_boot_signal();
        cp.state.lock().await.initialized = true;

        cp.on_link_disconnected().await;
        assert!(!cp.connected());

        cp.on_link_connected().await;
        cp.boot_notification(boot_request("Rebooted")).await;
        assert!(cp.connected());

        let signal = cp.recv_boot_signal(Duration::from_millis(100)).await;
        assert_eq!(model(signal.flatten()), Some("Rebooted".into()));
    }

    #[tokio::test]
    async fn fallback_reconnect_of_initialized_charge_point_is_a_reboot() {
        let cp = charge_point(Duration::from_millis(30));
        cp.boot_notification(boot_request("TestModel")).await;
        cp.drain_boot_signal();
        cp.state.lock().await.initialized = true;

        cp.on_link_disconnected().await;
        cp.on_link_connected().await;

        let signal = cp.recv_boot_signal(Duration::from_millis(200)).await;
        assert_eq!(model(signal.flatten()), Some("TestModel".into()));
    }

    #[tokio::test]
    async fn wait_connected_times_out() {
        let cp = charge_point(Duration::from_secs(30));
        assert_eq!(cp.wait_connected(Duration::from_millis(20)).await, Err(OcppError::Timeout));

        cp.boot_notification(boot_request("TestModel")).await;
        assert_eq!(cp.wait_connected(Duration::from_millis(20)).await, Ok(()));
    }

    #[tokio::test]
    async fn transaction_ids_are_monotonic() {
        let cp = charge_point(Duration::from_secs(30));
        let now = Utc::now();
        assert_eq!(cp.allocate_transaction_id(now), 1);
        assert_eq!(cp.allocate_transaction_id(now), 2);

        let stale = now - chrono::Duration::hours(2);
        assert_eq!(cp.allocate_transaction_id(stale), DEFAULT_TRANSACTION_ID);
        assert_eq!(cp.allocate_transaction_id(now), 3);
    }

    #[tokio::test]
    async fn remote_start_id_tag_precedence() {
        let cp = charge_point(Duration::from_secs(30));
        assert_eq!(cp.remote_start_id_tag(None).await, "ocpp-central");
        cp.state.lock().await.capabilities.id_tag = Some("alfen-pnc".into());
        assert_eq!(cp.remote_start_id_tag(None).await, "alfen-pnc");
        assert_eq!(cp.remote_start_id_tag(Some("rfid-1")).await, "rfid-1");
    }

    #[tokio::test]
    async fn connectors_are_created_once() {
        let cp = charge_point(Duration::from_secs(30));
        let a = cp.connector(2).await;
        let b = cp.connector(2).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cp.connectors().await.len(), 1);
    }
}
