//! Operator authentication for rate and fulfillment routes.
//!
//! Operator routes are guarded by a single bearer token configured via
//! `COINFORGE_OPERATOR_TOKEN`. The comparison is constant-time.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};

use crate::state::AppState;

/// Extractor that requires a valid operator bearer token.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(
///     _operator: RequireOperator,
///     State(state): State<AppState>,
/// ) -> impl IntoResponse {
///     // only reached with a valid token
/// }
/// ```
#[derive(Debug)]
pub struct RequireOperator;

/// Error returned when operator authentication fails.
pub enum OperatorAuthRejection {
    /// No usable `Authorization: Bearer` header was present.
    MissingToken,
    /// A token was presented but did not match.
    InvalidToken,
}

impl IntoResponse for OperatorAuthRejection {
    fn into_response(self) -> Response {
        let message = match self {
            Self::MissingToken => "Missing bearer token",
            Self::InvalidToken => "Invalid bearer token",
        };
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": message, "code": "unauthorized" })),
        )
            .into_response()
    }
}

impl FromRequestParts<AppState> for RequireOperator {
    type Rejection = OperatorAuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authorize_bearer(&parts.headers, &state.config().operator_token)?;
        Ok(Self)
    }
}

/// Check the `Authorization: Bearer` header against the expected token.
///
/// # Errors
///
/// Returns a rejection when the header is absent, malformed, or the token
/// does not match.
pub fn authorize_bearer(
    headers: &HeaderMap,
    expected: &SecretString,
) -> Result<(), OperatorAuthRejection> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(OperatorAuthRejection::MissingToken)?;

    if constant_time_compare(token, expected.expose_secret()) {
        Ok(())
    } else {
        Err(OperatorAuthRejection::InvalidToken)
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
