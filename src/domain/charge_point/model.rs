//! Charge point value objects

use std::time::Duration;

/// Boot/connectivity state of a charge point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootState {
    /// Websocket link is down
    #[default]
    Disconnected,
    /// Link is up, boot timer armed
    AwaitingBoot,
    /// BootNotification received or boot timer expired
    Connected,
}

impl std::fmt::Display for BootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::AwaitingBoot => write!(f, "AwaitingBoot"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Unit used for charging profile limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargingRateUnit {
    #[default]
    Amperes,
    Watts,
}

impl ChargingRateUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amperes => "A",
            Self::Watts => "W",
        }
    }
}

/// What the charge point reported about itself during setup.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub stack_level: u32,
    pub charging_rate_unit: ChargingRateUnit,
    pub phase_switching: bool,
    /// Highest charging profile id to use (MaxChargingProfilesInstalled)
    pub charging_profile_id: u32,
    pub has_remote_trigger: bool,
    /// Comma separated MeterValuesSampledData
    pub meter_values_sample: String,
    pub number_of_connectors: u32,
    /// Vendor supplied idTag overriding the configured default
    pub id_tag: Option<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            stack_level: 0,
            charging_rate_unit: ChargingRateUnit::Amperes,
            phase_switching: false,
            charging_profile_id: 1,
            // assumed until SupportedFeatureProfiles says otherwise
            has_remote_trigger: true,
            meter_values_sample: String::new(),
            number_of_connectors: 1,
            id_tag: None,
        }
    }
}

impl Capabilities {
    /// Case-insensitive lookup in the configured measurand list.
    pub fn has_measurement(&self, measurand: &str) -> bool {
        has_property(&self.meter_values_sample, measurand)
    }

    /// Connector ids start at 1 and stop at NumberOfConnectors.
    pub fn has_connector(&self, connector_id: u32) -> bool {
        (1..=self.number_of_connectors).contains(&connector_id)
    }
}

/// Whether a comma separated list contains `property` (case-insensitive).
pub fn has_property(list: &str, property: &str) -> bool {
    list.split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(property))
}

/// Timing windows and defaults shared by every charge point.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Boot timer, outbound confirmation timeout and setup waits
    pub timeout: Duration,
    /// Status notifications older than this are not authoritative
    pub message_expiry: Duration,
    /// Start/StopTransaction timestamps older than this are distrusted
    pub transaction_expiry: Duration,
    /// idTag for RemoteStartTransaction
    pub default_id_tag: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            message_expiry: Duration::from_secs(30),
            transaction_expiry: Duration::from_secs(3600),
            default_id_tag: "ocpp-central".to_string(),
        }
    }
}

/// Options for the auto-configuration handshake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupOptions {
    /// Explicit MeterValuesSampledData; `-a,b` excludes measurands and
    /// auto-detects the rest; `disable` skips measurand configuration.
    pub meter_values: String,
    pub meter_interval: Duration,
    pub force_power_control: bool,
}
