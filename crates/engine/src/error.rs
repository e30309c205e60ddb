//! Engine-wide error taxonomy.

use coinforge_core::{EmailError, RateError};

use crate::services::otp::OtpError;
use crate::store::StoreError;

/// Errors surfaced by the engine services.
///
/// Each variant maps to one caller-visible failure class; transport layers
/// translate them to status codes without inspecting message text.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request was malformed or violated an input rule.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced order or customer does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The order is in a state that does not admit the requested operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Payment was requested before the order passed verification.
    #[error("order is not verified")]
    NotVerified,

    /// A verification-code failure (expired, exhausted, wrong code, or
    /// requested again too soon).
    #[error(transparent)]
    Otp(#[from] OtpError),

    /// The payment gateway refused the charge. Terminal for the order.
    #[error("payment declined: {reason_code}")]
    GatewayDeclined { reason_code: String },

    /// The gateway could not be reached or answered unintelligibly.
    #[error("payment gateway unavailable: {detail}")]
    GatewayUnavailable { detail: String },

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RateError> for EngineError {
    fn from(err: RateError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<EmailError> for EngineError {
    fn from(err: EmailError) -> Self {
        Self::Validation(err.to_string())
    }
}
