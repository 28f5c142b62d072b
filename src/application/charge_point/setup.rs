//! Auto-configuration handshake
//!
//! Runs once the charge point is connected and again after every reboot.
//! Only a failing GetConfiguration aborts; every other step is best effort
//! because firmware support for the individual keys varies widely.

use rust_ocpp::v1_6::types::{AvailabilityType, MessageTrigger};
use tracing::{debug, info, warn};

use super::ChargePoint;
use crate::application::commands::KeyValue;
use crate::domain::charge_point::has_property;
use crate::domain::{Capabilities, ChargingRateUnit, OcppResult, SetupOptions};

pub const KEY_CHARGE_PROFILE_MAX_STACK_LEVEL: &str = "ChargeProfileMaxStackLevel";
pub const KEY_CHARGING_SCHEDULE_ALLOWED_CHARGING_RATE_UNIT: &str =
    "ChargingScheduleAllowedChargingRateUnit";
pub const KEY_CONNECTOR_SWITCH_3TO1_PHASE_SUPPORTED: &str = "ConnectorSwitch3to1PhaseSupported";
pub const KEY_MAX_CHARGING_PROFILES_INSTALLED: &str = "MaxChargingProfilesInstalled";
pub const KEY_METER_VALUES_SAMPLED_DATA: &str = "MeterValuesSampledData";
pub const KEY_METER_VALUES_SAMPLED_DATA_MAX_LENGTH: &str = "MeterValuesSampledDataMaxLength";
pub const KEY_METER_VALUE_SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
pub const KEY_NUMBER_OF_CONNECTORS: &str = "NumberOfConnectors";
pub const KEY_SUPPORTED_FEATURE_PROFILES: &str = "SupportedFeatureProfiles";
pub const KEY_WEB_SOCKET_PING_INTERVAL: &str = "WebSocketPingInterval";

// vendor specific
pub const KEY_ALFEN_PLUG_AND_CHARGE_IDENTIFIER: &str = "AlfenPlugAndChargeIdentifier";
pub const KEY_CHARGE_AMPS_PHASE_SWITCHING_SUPPORTED: &str = "ChargeAmpsPhaseSwitchingSupported";
pub const KEY_EVBOX_SUPPORTED_MEASURANDS: &str = "evb_SupportedMeasurands";

const DESIRED_MEASURANDS: &str = "Power.Active.Import,Energy.Active.Import.Register,Current.Import,Voltage,Current.Offered,Power.Offered,SoC";

/// Value that turns off measurand configuration.
const METER_VALUES_DISABLED: &str = "disable";

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// Capabilities collected from GetConfiguration
struct Discovery {
    capabilities: Capabilities,
    /// Upper bound of measurands to configure, 0 disables probing
    max_length: usize,
    /// Measurand list to configure, empty requests probing
    meter_values: String,
}

impl Discovery {
    fn apply(&mut self, charge_point_id: &str, kv: &KeyValue) {
        let Some(value) = kv.value.as_deref() else {
            return;
        };
        let matches = |key: &str| kv.key.eq_ignore_ascii_case(key);
        let caps = &mut self.capabilities;

        if matches(KEY_CHARGE_PROFILE_MAX_STACK_LEVEL) {
            if let Ok(level) = value.trim().parse() {
                caps.stack_level = level;
            }
        } else if matches(KEY_CHARGING_SCHEDULE_ALLOWED_CHARGING_RATE_UNIT) {
            // "W" is not a valid value but reported by some charge points
            if value == "Power" || value == "W" {
                caps.charging_rate_unit = ChargingRateUnit::Watts;
                caps.phase_switching = true;
            }
        } else if matches(KEY_CONNECTOR_SWITCH_3TO1_PHASE_SUPPORTED)
            || matches(KEY_CHARGE_AMPS_PHASE_SWITCHING_SUPPORTED)
        {
            if let Some(supported) = parse_bool(value) {
                caps.phase_switching = supported;
            }
        } else if matches(KEY_MAX_CHARGING_PROFILES_INSTALLED) {
            if let Ok(id) = value.trim().parse() {
                caps.charging_profile_id = id;
            }
        } else if matches(KEY_METER_VALUES_SAMPLED_DATA) {
            if kv.readonly {
                self.max_length = 0;
            }
            caps.meter_values_sample = value
                .split(',')
                .map(|m| m.trim_matches(|c| c == '\'' || c == ' '))
                .collect::<Vec<_>>()
                .join(",");
        } else if matches(KEY_METER_VALUES_SAMPLED_DATA_MAX_LENGTH) {
            if let Ok(len) = value.trim().parse() {
                self.max_length = len;
            }
        } else if matches(KEY_NUMBER_OF_CONNECTORS) {
            if let Ok(n) = value.trim().parse() {
                caps.number_of_connectors = n;
            }
        } else if matches(KEY_SUPPORTED_FEATURE_PROFILES) {
            if !has_property(value, "SmartCharging") {
                warn!(charge_point_id, profiles = value, "SmartCharging feature profile not supported");
            }
            // only trust lists that look valid
            if has_property(value, "Core") {
                caps.has_remote_trigger = has_property(value, "RemoteTrigger");
            }
        } else if matches(KEY_ALFEN_PLUG_AND_CHARGE_IDENTIFIER) {
            debug!(charge_point_id, id_tag = value, "Using vendor idTag");
            caps.id_tag = Some(value.to_string());
        } else if matches(KEY_EVBOX_SUPPORTED_MEASURANDS) && self.meter_values.is_empty() {
            self.meter_values = value.to_string();
        }
    }
}

impl ChargePoint {
    pub async fn setup(&self, options: &SetupOptions) -> OcppResult<()> {
        let id = self.id.as_str();
        let timeout = self.settings.timeout;
        info!(charge_point_id = id, "Running setup");

        if let Err(e) = self.change_availability(0, AvailabilityType::Operative).await {
            debug!(charge_point_id = id, error = %e, "Failed to set availability");
        }

        let mut desired: Vec<String> = DESIRED_MEASURANDS.split(',').map(str::to_string).collect();
        let mut meter_values = options.meter_values.trim().to_string();
        if let Some(excluded) = meter_values.strip_prefix('-') {
            let excluded: Vec<String> = excluded.split(',').map(|m| m.trim().to_string()).collect();
            desired.retain(|m| !excluded.iter().any(|x| x.eq_ignore_ascii_case(m)));
            meter_values.clear();
        }

        let configuration = self.get_configuration(None).await?;
        let mut discovery = Discovery {
            capabilities: self.capabilities().await,
            max_length: desired.len(),
            meter_values,
        };
        for kv in &configuration.configuration_key {
            discovery.apply(id, kv);
        }
        let Discovery {
            capabilities: mut caps,
            max_length,
            mut meter_values,
        } = discovery;
        self.state.lock().await.capabilities = caps.clone();

        // see who's there
        if caps.has_remote_trigger {
            if let Err(e) = self.trigger_message(MessageTrigger::BootNotification, None).await {
                debug!(charge_point_id = id, error = %e, "Failed to trigger BootNotification");
            }
            match self.recv_boot_signal(timeout).await {
                Some(Some(boot)) => self.state.lock().await.boot_result = Some(boot),
                Some(None) => {}
                None => debug!(charge_point_id = id, "BootNotification timeout"),
            }
        }

        if meter_values.is_empty() && max_length > 0 {
            let mut accepted = Vec::new();
            for measurand in &desired {
                if self
                    .change_configuration(KEY_METER_VALUES_SAMPLED_DATA, measurand)
                    .await
                    .is_ok()
                {
                    accepted.push(measurand.as_str());
                }
            }
            accepted.truncate(max_length);
            meter_values = accepted.join(",");
            debug!(charge_point_id = id, measurands = meter_values.as_str(), "Detected measurands");
        }

        if meter_values.eq_ignore_ascii_case(METER_VALUES_DISABLED) {
            info!(charge_point_id = id, "Measurand configuration disabled");
        } else if !meter_values.is_empty() {
            if let Err(e) = self
                .change_configuration(KEY_METER_VALUES_SAMPLED_DATA, &meter_values)
                .await
            {
                warn!(charge_point_id = id, error = %e, "Failed to configure {}", KEY_METER_VALUES_SAMPLED_DATA);
            }
            caps.meter_values_sample = meter_values;
        }

        if caps.has_remote_trigger {
            let mut meter_rx = self.meter_seq.subscribe();
            meter_rx.borrow_and_update();
            match self.trigger_message(MessageTrigger::MeterValues, None).await {
                Ok(()) => {
                    if tokio::time::timeout(timeout, meter_rx.changed()).await.is_err() {
                        warn!(charge_point_id = id, "Meter values timeout");
                    }
                }
                Err(e) => debug!(charge_point_id = id, error = %e, "Failed to trigger MeterValues"),
            }
        }

        if !options.meter_interval.is_zero() {
            let secs = options.meter_interval.as_secs().to_string();
            if let Err(e) = self
                .change_configuration(KEY_METER_VALUE_SAMPLE_INTERVAL, &secs)
                .await
            {
                warn!(charge_point_id = id, error = %e, "Failed to configure {}", KEY_METER_VALUE_SAMPLE_INTERVAL);
            }
        }

        if let Err(e) = self.change_configuration(KEY_WEB_SOCKET_PING_INTERVAL, "30").await {
            debug!(charge_point_id = id, error = %e, "Failed to configure {}", KEY_WEB_SOCKET_PING_INTERVAL);
        }

        let connectors = self.connectors().await;
        let mut cached = false;
        for connector in &connectors {
            cached |= connector.has_status().await;
        }
        if caps.has_remote_trigger && !cached {
            if let Err(e) = self
                .trigger_message(MessageTrigger::StatusNotification, None)
                .await
            {
                debug!(charge_point_id = id, error = %e, "Failed to trigger StatusNotification");
            }
        } else {
            for connector in &connectors {
                connector.replay_status().await;
            }
        }

        if options.force_power_control {
            caps.charging_rate_unit = ChargingRateUnit::Watts;
            caps.phase_switching = true;
        }

        {
            let mut state = self.state.lock().await;
            state.capabilities = caps;
            state.initialized = true;
        }
        self.drain_boot_signal();

        info!(charge_point_id = id, "Setup complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::application::charge_point::tests::{boot_request, settings};
    use crate::application::commands::testing::FakeChargePoint;
    use crate::application::commands::CallReply;
    use crate::domain::OcppError;
    use crate::support::clock::system_clock;

    fn configuration(keys: Value) -> CallReply {
        Ok(json!({ "configurationKey": keys }))
    }

    fn charge_point(fake: Arc<FakeChargePoint>) -> Arc<ChargePoint> {
        ChargePoint::new("cp-1", settings(Duration::from_millis(50)), fake, system_clock())
    }

    fn change_configuration(fake: &FakeChargePoint) -> Vec<(String, String)> {
        fake.payloads("ChangeConfiguration")
            .iter()
            .map(|p| {
                (
                    p["key"].as_str().unwrap_or_default().to_string(),
                    p["value"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    fn triggered(fake: &FakeChargePoint) -> Vec<String> {
        fake.payloads("TriggerMessage")
            .iter()
            .map(|p| p["requestedMessage"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn probes_measurands_and_reads_capabilities() {
        let fake = FakeChargePoint::new(|action, payload| match action {
            "GetConfiguration" => Some(configuration(json!([
                {"key": "supportedfeatureprofiles", "readonly": true, "value": "Core,SmartCharging,RemoteTrigger"},
                {"key": "MeterValuesSampledDataMaxLength", "readonly": true, "value": "3"},
                {"key": "ChargingScheduleAllowedChargingRateUnit", "readonly": true, "value": "Current"},
                {"key": "NumberOfConnectors", "readonly": true, "value": "2"},
                {"key": "ChargeProfileMaxStackLevel", "readonly": true, "value": "8"},
                {"key": "MaxChargingProfilesInstalled", "readonly": true, "value": "5"},
                {"key": "AlfenPlugAndChargeIdentifier", "readonly": false, "value": "alfen-tag"},
                {"key": "HeartbeatInterval", "readonly": false},
            ]))),
            "ChangeConfiguration" => {
                let rejected = matches!(payload["value"].as_str(), Some("Voltage") | Some("SoC"));
                Some(Ok(json!({"status": if rejected { "Rejected" } else { "Accepted" }})))
            }
            _ => Some(Ok(json!({"status": "Accepted"}))),
        });
        let cp = charge_point(fake.clone());
        let options = SetupOptions {
            meter_interval: Duration::from_secs(10),
            ..Default::default()
        };

        cp.setup(&options).await.unwrap();

        let caps = cp.capabilities().await;
        assert_eq!(
            caps.meter_values_sample,
            "Power.Active.Import,Energy.Active.Import.Register,Current.Import"
        );
        assert_eq!(caps.number_of_connectors, 2);
        assert_eq!(caps.stack_level, 8);
        assert_eq!(caps.charging_profile_id, 5);
        assert_eq!(caps.charging_rate_unit, ChargingRateUnit::Amperes);
        assert!(caps.has_remote_trigger);
        assert_eq!(caps.id_tag.as_deref(), Some("alfen-tag"));
        assert!(cp.initialized().await);

        let changes = change_configuration(&fake);
        assert_eq!(changes.len(), 7 + 3);
        assert!(changes.contains(&(
            "MeterValuesSampledData".into(),
            "Power.Active.Import,Energy.Active.Import.Register,Current.Import".into()
        )));
        assert!(changes.contains(&("MeterValueSampleInterval".into(), "10".into())));
        assert!(changes.contains(&("WebSocketPingInterval".into(), "30".into())));

        assert_eq!(
            triggered(&fake),
            vec!["BootNotification", "MeterValues", "StatusNotification"]
        );
        assert_eq!(fake.actions()[0], "ChangeAvailability");
    }

    #[tokio::test]
    async fn remote_start_uses_vendor_id_tag_unless_configured() {
        let fake = FakeChargePoint::new(|action, _| match action {
            "GetConfiguration" => Some(configuration(json!([
                {"key": "AlfenPlugAndChargeIdentifier", "readonly": false, "value": "alfen-tag"},
            ]))),
            _ => Some(Ok(json!({"status": "Accepted"}))),
        });
        let cp = charge_point(fake);
        cp.setup(&SetupOptions::default()).await.unwrap();

        let first = cp.connector(1).await;
        first.enable_remote_start(None).await.unwrap();
        assert_eq!(first.remote_id_tag().await.as_deref(), Some("alfen-tag"));

        let second = cp.connector(2).await;
        second.enable_remote_start(Some("fleet-7")).await.unwrap();
        assert_eq!(second.remote_id_tag().await.as_deref(), Some("fleet-7"));
    }

    #[tokio::test]
    async fn stores_triggered_boot_notification() {
        let fake = FakeChargePoint::new(|action, _| match action {
            "GetConfiguration" => Some(configuration(json!([]))),
            _ => Some(Ok(json!({"status": "Accepted"}))),
        });
        let cp = charge_point(fake);
        cp.boot_notification(boot_request("Triggered")).await;

        cp.setup(&SetupOptions::default()).await.unwrap();

        let model = cp.boot_result().await.map(|boot| boot.charge_point_model);
        assert_eq!(model.as_deref(), Some("Triggered"));
    }

    #[tokio::test]
    async fn get_configuration_failure_aborts() {
        let fake = FakeChargePoint::new(|action, _| match action {
            "GetConfiguration" => Some(Err(OcppError::CallError {
                code: "NotSupported".into(),
                description: String::new(),
            })),
            _ => Some(Ok(json!({"status": "Accepted"}))),
        });
        let cp = charge_point(fake.clone());

        let res = cp.setup(&SetupOptions::default()).await;
        assert!(matches!(res, Err(OcppError::CallError { .. })));
        assert!(!cp.initialized().await);
        assert_eq!(fake.actions(), vec!["ChangeAvailability", "GetConfiguration"]);
    }

    #[tokio::test]
    async fn readonly_measurands_without_remote_trigger() {
        let fake = FakeChargePoint::new(|action, _| match action {
            "GetConfiguration" => Some(configuration(json!([
                {"key": "SupportedFeatureProfiles", "readonly": true, "value": "Core,SmartCharging"},
                {"key": "MeterValuesSampledData", "readonly": true, "value": "'Energy.Active.Import.Register', 'Power.Active.Import'"},
                {"key": "ChargingScheduleAllowedChargingRateUnit", "readonly": true, "value": "W"},
            ]))),
            _ => Some(Ok(json!({"status": "Accepted"}))),
        });
        let cp = charge_point(fake.clone());
        let connector = cp.connector(1).await;
        connector.set_remote_id_tag(Some("remote".into())).await;
        let preparing = serde_json::from_value(json!({
            "connectorId": 1, "errorCode": "NoError", "status": "Preparing"
        }))
        .unwrap();
        connector.status_notification(preparing).await;

        let options = SetupOptions {
            meter_values: "-Voltage,SoC".into(),
            ..Default::default()
        };
        cp.setup(&options).await.unwrap();

        let caps = cp.capabilities().await;
        assert!(!caps.has_remote_trigger);
        assert_eq!(caps.charging_rate_unit, ChargingRateUnit::Watts);
        assert!(caps.phase_switching);
        assert_eq!(
            caps.meter_values_sample,
            "Energy.Active.Import.Register,Power.Active.Import"
        );
        assert!(cp.has_measurement("power.active.import").await);
        assert!(triggered(&fake).is_empty());
        assert_eq!(change_configuration(&fake), vec![("WebSocketPingInterval".into(), "30".into())]);

        // cached status replayed, remote start issued again
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fake.payloads("RemoteStartTransaction").len(), 2);
    }

    #[tokio::test]
    async fn disabled_measurands_and_forced_power_control() {
        let fake = FakeChargePoint::new(|action, _| match action {
            "GetConfiguration" => Some(configuration(json!([
                {"key": "SupportedFeatureProfiles", "readonly": true, "value": "Core"},
            ]))),
            _ => Some(Ok(json!({"status": "Accepted"}))),
        });
        let cp = charge_point(fake.clone());
        let options = SetupOptions {
            meter_values: "disable".into(),
            force_power_control: true,
            ..Default::default()
        };

        cp.setup(&options).await.unwrap();

        let caps = cp.capabilities().await;
        assert_eq!(caps.charging_rate_unit, ChargingRateUnit::Watts);
        assert!(caps.phase_switching);
        assert!(caps.meter_values_sample.is_empty());
        assert!(change_configuration(&fake)
            .iter()
            .all(|(key, _)| key != "MeterValuesSampledData"));
    }

    #[test]
    fn bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
