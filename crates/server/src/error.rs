//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Engine errors carry a stable machine-readable `code` in the JSON body so
//! clients can branch without parsing message text.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use coinforge_engine::EngineError;
use coinforge_engine::services::otp::OtpError;
use serde::Serialize;
use thiserror::Error;

/// Application-level error type for the server.
#[derive(Debug, Error)]
pub enum AppError {
    /// Engine operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Caller is not authorized for this route.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body returned to clients.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_in_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts_remaining: Option<u8>,
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Engine(err) => match err {
                EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Conflict(_) | EngineError::NotVerified => StatusCode::CONFLICT,
                EngineError::Otp(otp) => match otp {
                    OtpError::InvalidCode { .. } => StatusCode::BAD_REQUEST,
                    OtpError::Expired => StatusCode::GONE,
                    OtpError::NoChallenge => StatusCode::CONFLICT,
                    OtpError::TooManyAttempts | OtpError::TooSoon { .. } => {
                        StatusCode::TOO_MANY_REQUESTS
                    }
                },
                EngineError::GatewayDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
                EngineError::GatewayUnavailable { .. } => StatusCode::BAD_GATEWAY,
                EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable slug clients can branch on.
    const fn code(&self) -> &'static str {
        match self {
            Self::Engine(err) => match err {
                EngineError::Validation(_) => "validation_failed",
                EngineError::NotFound(_) => "not_found",
                EngineError::Conflict(_) => "conflict",
                EngineError::NotVerified => "not_verified",
                EngineError::Otp(otp) => match otp {
                    OtpError::NoChallenge => "no_verification_pending",
                    OtpError::Expired => "code_expired",
                    OtpError::TooManyAttempts => "too_many_attempts",
                    OtpError::InvalidCode { .. } => "invalid_code",
                    OtpError::TooSoon { .. } => "too_soon",
                },
                EngineError::GatewayDeclined { .. } => "payment_declined",
                EngineError::GatewayUnavailable { .. } => "gateway_unavailable",
                EngineError::Store(_) => "internal_error",
            },
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    fn body(&self) -> ErrorBody {
        // Don't expose internal error details to clients
        let message = match self {
            Self::Engine(EngineError::Store(_)) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::Engine(EngineError::GatewayUnavailable { .. }) => {
                "Payment processor unavailable".to_string()
            }
            _ => self.to_string(),
        };

        let (retry_in_secs, attempts_remaining) = match self {
            Self::Engine(EngineError::Otp(OtpError::TooSoon { retry_in_secs })) => {
                (Some(*retry_in_secs), None)
            }
            Self::Engine(EngineError::Otp(OtpError::InvalidCode { remaining })) => {
                (None, Some(*remaining))
            }
            _ => (None, None),
        };

        ErrorBody {
            error: message,
            code: self.code(),
            retry_in_secs,
            attempts_remaining,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(
            self,
            Self::Internal(_)
                | Self::Engine(EngineError::Store(_) | EngineError::GatewayUnavailable { .. })
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (self.status(), Json(self.body())).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order-123".to_string());
        assert_eq!(err.to_string(), "Not found: order-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_engine_error_status_codes() {
        assert_eq!(
            get_status(EngineError::Validation("bad".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(EngineError::NotVerified.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(
                EngineError::GatewayDeclined {
                    reason_code: "insufficient_funds".to_string(),
                }
                .into()
            ),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            get_status(
                EngineError::GatewayUnavailable {
                    detail: "timeout".to_string(),
                }
                .into()
            ),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_otp_error_status_codes() {
        assert_eq!(
            get_status(EngineError::Otp(OtpError::Expired).into()),
            StatusCode::GONE
        );
        assert_eq!(
            get_status(EngineError::Otp(OtpError::InvalidCode { remaining: 2 }).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(EngineError::Otp(OtpError::TooManyAttempts).into()),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            get_status(EngineError::Otp(OtpError::TooSoon { retry_in_secs: 41 }).into()),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            get_status(EngineError::Otp(OtpError::NoChallenge).into()),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_body_carries_machine_readable_fields() {
        let err = AppError::Engine(EngineError::Otp(OtpError::TooSoon { retry_in_secs: 41 }));
        let body = err.body();
        assert_eq!(body.code, "too_soon");
        assert_eq!(body.retry_in_secs, Some(41));

        let err = AppError::Engine(EngineError::Otp(OtpError::InvalidCode { remaining: 1 }));
        let body = err.body();
        assert_eq!(body.code, "invalid_code");
        assert_eq!(body.attempts_remaining, Some(1));
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let err = AppError::Internal("db password leaked here".to_string());
        let body = err.body();
        assert_eq!(body.error, "Internal server error");
    }
}
