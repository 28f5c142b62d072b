//! Get Configuration command

use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use tracing::info;

use super::CallTarget;
use crate::domain::OcppResult;

/// A configuration key as reported by the charge point.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub readonly: bool,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigurationResult {
    pub configuration_key: Vec<KeyValue>,
    pub unknown_key: Vec<String>,
}

/// `keys = None` requests the full configuration. There is no status to check.
pub async fn get_configuration(
    target: &CallTarget<'_>,
    keys: Option<Vec<String>>,
) -> OcppResult<ConfigurationResult> {
    info!(charge_point_id = target.charge_point_id, ?keys, "GetConfiguration");

    let request = GetConfigurationRequest { key: keys };
    let response: GetConfigurationResponse = target.call("GetConfiguration", &request).await?;

    let configuration_key = response
        .configuration_key
        .unwrap_or_default()
        .into_iter()
        .map(|kv| KeyValue {
            key: kv.key,
            readonly: kv.readonly,
            value: kv.value,
        })
        .collect();

    Ok(ConfigurationResult {
        configuration_key,
        unknown_key: response.unknown_key.unwrap_or_default(),
    })
}
