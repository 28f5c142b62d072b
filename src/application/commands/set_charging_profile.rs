//! Set Charging Profile command

use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::types::ChargingProfile;
use tracing::info;

use super::{ensure_status, CallTarget};
use crate::domain::OcppResult;
use crate::support::wire::wire_name;

/// `connector_id` 0 applies the profile to the whole charge point.
pub async fn set_charging_profile(
    target: &CallTarget<'_>,
    connector_id: u32,
    profile: ChargingProfile,
) -> OcppResult<()> {
    info!(
        charge_point_id = target.charge_point_id,
        connector_id,
        profile_id = profile.charging_profile_id,
        "SetChargingProfile"
    );

    let request = SetChargingProfileRequest {
        connector_id: connector_id as i32,
        cs_charging_profiles: profile,
    };
    let response: SetChargingProfileResponse =
        target.call("SetChargingProfile", &request).await?;

    ensure_status(&wire_name(&response.status), &["Accepted"])
}
