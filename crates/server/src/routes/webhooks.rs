//! Webhook handlers for asynchronous payment notices.
//!
//! The crypto processor posts here when a payment session changes state.
//! The notice body is never trusted on its own: reconciliation re-queries
//! the processor before any order transition.
//!
//! When `COINFORGE_WEBHOOK_SECRET` is set, requests must carry an
//! `X-Webhook-Signature` header holding the hex HMAC-SHA256 of the raw body.

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use coinforge_core::{OrderId, OrderStatus};
use coinforge_engine::services::{AsyncPaymentNotice, ReconcileOutcome};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, Result};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Create the webhook routes router.
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/crypto", post(crypto_notice))
}

/// Acknowledgement returned to the processor.
#[derive(Debug, Serialize)]
struct WebhookAck {
    /// What reconciliation concluded.
    disposition: &'static str,
    order_id: OrderId,
    status: OrderStatus,
}

/// Handle an async payment notice from the crypto processor.
///
/// POST /webhooks/crypto
///
/// Always answers 200 for a processed notice, whatever reconciliation
/// concluded, so the processor stops retrying. Transport-level failures
/// surface as 502 and are retried by the processor.
#[instrument(skip(state, headers, body))]
async fn crypto_notice(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse> {
    if let Some(secret) = &state.config().webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing signature header".to_string()))?;

        verify_signature(secret, &body, signature)
            .map_err(|e| AppError::Unauthorized(e.to_string()))?;
        debug!("webhook signature verified");
    }

    let notice: AsyncPaymentNotice = serde_json::from_str(&body)
        .map_err(|e| AppError::BadRequest(format!("Failed to parse notice: {e}")))?;

    let outcome = state.orders().reconcile_async_payment(notice).await?;

    let (disposition, order) = match outcome {
        ReconcileOutcome::Completed(order) => ("completed", order),
        ReconcileOutcome::Failed(order) => ("failed", order),
        ReconcileOutcome::StillWaiting(order) => ("still_waiting", order),
        ReconcileOutcome::NotPending(order) => ("not_pending", order),
    };

    info!(
        order_id = %order.id,
        disposition,
        "webhook notice reconciled"
    );

    Ok(Json(WebhookAck {
        disposition,
        order_id: order.id,
        status: order.status,
    }))
}

/// Error verifying a webhook signature.
#[derive(Debug, thiserror::Error)]
enum SignatureError {
    #[error("invalid signature: {0}")]
    Invalid(String),
}

/// Verify the hex HMAC-SHA256 signature over the raw body.
fn verify_signature(
    secret: &SecretString,
    body: &str,
    signature: &str,
) -> std::result::Result<(), SignatureError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| SignatureError::Invalid(e.to_string()))?;

    mac.update(body.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison
    if !constant_time_compare(&expected, signature) {
        warn!("webhook signature mismatch");
        return Err(SignatureError::Invalid("Signature mismatch".to_string()));
    }

    Ok(())
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
