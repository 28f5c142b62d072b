//! Engine errors

use thiserror::Error;

/// Errors surfaced by the central system engine.
///
/// Inbound handlers never produce these for protocol traffic (they answer
/// leniently); they are returned to application code issuing outbound
/// requests or reading connector measurements.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OcppError {
    /// Charge point not link-connected, stale measurement during a
    /// transaction, or no confirmation within the timeout window.
    #[error("timeout")]
    Timeout,

    /// The requested measurement has never been reported.
    #[error("not available")]
    NotAvailable,

    /// The confirmation status is not one of the operation's success values.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The charge point answered with an OCPP-J CallError.
    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },

    /// Connector status carries an error code other than `NoError`.
    #[error("connector fault {error_code}: {info}")]
    Faulted { error_code: String, info: String },

    #[error("unknown charge point: {0}")]
    UnknownChargePoint(String),

    #[error("duplicate charge point id: {0}")]
    DuplicateId(String),

    #[error("charge point not connected: {0}")]
    NotConnected(String),

    #[error("failed to send: {0}")]
    SendFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid measurement {key}: {value}")]
    InvalidMeasurement { key: String, value: String },
}

/// Result type for engine operations
pub type OcppResult<T> = Result<T, OcppError>;
