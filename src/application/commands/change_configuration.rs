//! Change Configuration command

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use tracing::info;

use super::{ensure_status, CallTarget};
use crate::domain::OcppResult;
use crate::support::wire::wire_name;

/// Succeeds on `Accepted` and `RebootRequired`.
pub async fn change_configuration(
    target: &CallTarget<'_>,
    key: &str,
    value: &str,
) -> OcppResult<()> {
    info!(
        charge_point_id = target.charge_point_id,
        key,
        value,
        "ChangeConfiguration"
    );

    let request = ChangeConfigurationRequest {
        key: key.to_string(),
        value: value.to_string(),
    };
    let response: ChangeConfigurationResponse =
        target.call("ChangeConfiguration", &request).await?;

    ensure_status(&wire_name(&response.status), &["Accepted", "RebootRequired"])
}
