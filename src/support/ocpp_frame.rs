//! OCPP-J message framing
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::{json, Value};
use thiserror::Error;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is not a non-empty array")]
    NotAnArray,
    #[error("unknown message type: {0}")]
    UnknownMessageType(Value),
    #[error("expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("{0} must be a string")]
    NotAString(&'static str),
}

impl OcppFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let arr = match value {
            Value::Array(arr) if !arr.is_empty() => arr,
            _ => return Err(FrameError::NotAnArray),
        };

        let (expected, msg_type) = match arr[0].as_u64() {
            Some(MSG_TYPE_CALL) => (4, MSG_TYPE_CALL),
            Some(MSG_TYPE_CALL_RESULT) => (3, MSG_TYPE_CALL_RESULT),
            Some(MSG_TYPE_CALL_ERROR) => (3, MSG_TYPE_CALL_ERROR),
            _ => return Err(FrameError::UnknownMessageType(arr[0].clone())),
        };
        if arr.len() < expected {
            return Err(FrameError::MissingFields {
                expected,
                got: arr.len(),
            });
        }

        let unique_id = string_field(&arr, 1, "uniqueId")?;
        let frame = match msg_type {
            MSG_TYPE_CALL => Self::Call {
                unique_id,
                action: string_field(&arr, 2, "action")?,
                payload: arr[3].clone(),
            },
            MSG_TYPE_CALL_RESULT => Self::CallResult {
                unique_id,
                payload: arr[2].clone(),
            },
            _ => Self::CallError {
                unique_id,
                error_code: arr[2].as_str().unwrap_or("GenericError").to_string(),
                error_description: arr.get(3).and_then(Value::as_str).unwrap_or("").to_string(),
                error_details: arr.get(4).cloned().unwrap_or_else(|| json!({})),
            },
        };

        Ok(frame)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([MSG_TYPE_CALL, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => {
                json!([MSG_TYPE_CALL_RESULT, unique_id, payload])
            }
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => json!([
                MSG_TYPE_CALL_ERROR,
                unique_id,
                error_code,
                error_description,
                error_details
            ]),
        }
    }

    pub fn serialize(&self) -> String {
        self.to_value().to_string()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// `CallError` answer for a given unique id.
    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: json!({}),
        }
    }
}

fn string_field(arr: &[Value], idx: usize, name: &'static str) -> Result<String, FrameError> {
    arr[idx]
        .as_str()
        .map(str::to_string)
        .ok_or(FrameError::NotAString(name))
}
