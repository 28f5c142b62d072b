//! Outbound requests issued on behalf of a charge point

use rust_ocpp::v1_6::types::{AvailabilityType, ChargingProfile, MessageTrigger, ResetRequestStatus};
use serde_json::Value;

use super::ChargePoint;
use crate::application::commands::{self, ConfigurationResult};
use crate::domain::OcppResult;

impl ChargePoint {
    pub async fn change_availability(
        &self,
        connector_id: u32,
        kind: AvailabilityType,
    ) -> OcppResult<()> {
        commands::change_availability(&self.target(), connector_id, kind).await
    }

    pub async fn change_configuration(&self, key: &str, value: &str) -> OcppResult<()> {
        commands::change_configuration(&self.target(), key, value).await
    }

    pub async fn get_configuration(
        &self,
        keys: Option<Vec<String>>,
    ) -> OcppResult<ConfigurationResult> {
        commands::get_configuration(&self.target(), keys).await
    }

    /// Requested in the charge point's charging rate unit.
    pub async fn get_composite_schedule(
        &self,
        connector_id: u32,
        duration_secs: i32,
    ) -> OcppResult<Option<Value>> {
        let unit = self.state.lock().await.capabilities.charging_rate_unit;
        commands::get_composite_schedule(&self.target(), connector_id, duration_secs, Some(unit))
            .await
    }

    pub async fn remote_start_transaction(&self, connector_id: u32, id_tag: &str) -> OcppResult<()> {
        commands::remote_start_transaction(&self.target(), connector_id, id_tag).await
    }

    pub async fn set_charging_profile(
        &self,
        connector_id: u32,
        profile: ChargingProfile,
    ) -> OcppResult<()> {
        commands::set_charging_profile(&self.target(), connector_id, profile).await
    }

    pub async fn trigger_message(
        &self,
        requested_message: MessageTrigger,
        connector_id: Option<u32>,
    ) -> OcppResult<()> {
        commands::trigger_message(&self.target(), requested_message, connector_id).await
    }

    pub async fn reset(&self, kind: ResetRequestStatus) -> OcppResult<()> {
        commands::reset(&self.target(), kind).await
    }
}
