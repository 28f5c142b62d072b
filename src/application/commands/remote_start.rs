//! Remote Start Transaction command

use rust_ocpp::v1_6::messages::remote_start_transaction::RemoteStartTransactionResponse;
use serde_json::json;
use tracing::info;

use super::{ensure_status, CallTarget};
use crate::domain::{OcppError, OcppResult};
use crate::support::wire::wire_name;

pub async fn remote_start_transaction(
    target: &CallTarget<'_>,
    connector_id: u32,
    id_tag: &str,
) -> OcppResult<()> {
    info!(
        charge_point_id = target.charge_point_id,
        connector_id,
        id_tag,
        "RemoteStartTransaction"
    );

    let payload = json!({
        "connectorId": connector_id,
        "idTag": id_tag,
    });
    let result = target.call_value("RemoteStartTransaction", payload).await?;
    let response: RemoteStartTransactionResponse = serde_json::from_value(result)
        .map_err(|e| OcppError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    ensure_status(&wire_name(&response.status), &["Accepted"])
}
