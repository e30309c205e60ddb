//! Operator route handlers.
//!
//! Rate administration, order inspection, and fulfillment. Every handler
//! requires the operator bearer token via [`RequireOperator`].
//!
//! Mutations record an actor in the rate history; callers can name one with
//! `set_by`, otherwise the generic `"operator"` is written.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use coinforge_core::{EmailAddress, OrderId, Rate};
use coinforge_engine::models::{
    CustomerRateOverride, GatewayCorrelation, Order, RateHistoryEntry, RateRecord,
};
use coinforge_engine::services::{CustomerRateChange, ResolvedRate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::checkout::OrderView;
use crate::error::{AppError, Result};
use crate::middleware::RequireOperator;
use crate::state::AppState;

/// History actor recorded when a request names none.
const DEFAULT_ACTOR: &str = "operator";

/// Create the operator routes router.
pub fn operator_routes() -> Router<AppState> {
    use axum::routing::delete;

    Router::new()
        .route("/rates", get(rate_record))
        .route("/rates/global", put(set_global_rate))
        .route("/rates/customers", post(set_customer_rate))
        .route("/rates/customers/bulk", post(set_bulk_customer_rates))
        .route("/rates/customers/{email}", delete(remove_customer_rate))
        .route("/rates/history", get(rate_history))
        .route("/rates/resolve", get(resolve_rate))
        .route("/orders/{id}", get(order_detail))
        .route("/orders/{id}/fulfillment", post(fulfill_order))
}

/// Request to change the global rate.
#[derive(Debug, Deserialize)]
pub struct SetGlobalRateRequest {
    pub rate: Decimal,
    #[serde(default)]
    pub set_by: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Request to set one customer override.
#[derive(Debug, Deserialize)]
pub struct SetCustomerRateRequest {
    #[serde(flatten)]
    pub change: CustomerRateChange,
    #[serde(default)]
    pub set_by: Option<String>,
}

/// Request to set many customer overrides in one pass.
#[derive(Debug, Deserialize)]
pub struct BulkRateRequest {
    pub changes: Vec<CustomerRateChange>,
    #[serde(default)]
    pub set_by: Option<String>,
}

/// Actor and note attached to an override removal.
#[derive(Debug, Deserialize)]
pub struct RemoveRateParams {
    #[serde(default)]
    pub set_by: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Optional email filter for history and resolution.
#[derive(Debug, Deserialize)]
pub struct EmailParams {
    #[serde(default)]
    pub email: Option<String>,
}

/// Request to mark an order fulfilled.
#[derive(Debug, Default, Deserialize)]
pub struct FulfillRequest {
    /// Re-send the delivery notification when the order is already fulfilled.
    #[serde(default)]
    pub resend_notification: bool,
}

/// The global rate after a change.
#[derive(Debug, Serialize)]
pub struct GlobalRateView {
    pub rate: Rate,
}

/// Operator-facing order detail.
///
/// Extends the customer view with gateway correlation and verification
/// progress. The stored code hash stays private even here.
#[derive(Debug, Serialize)]
pub struct OperatorOrderView {
    #[serde(flatten)]
    pub summary: OrderView,
    pub gateway: GatewayCorrelation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationView>,
}

/// Verification challenge progress, without the code material.
#[derive(Debug, Serialize)]
pub struct VerificationView {
    pub attempts: u8,
    pub verified: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Order> for OperatorOrderView {
    fn from(order: Order) -> Self {
        let gateway = order.gateway.clone();
        let verification = order.otp.as_ref().map(|otp| VerificationView {
            attempts: otp.attempts,
            verified: otp.verified,
            issued_at: otp.issued_at,
            expires_at: otp.expires_at,
        });
        Self {
            summary: order.into(),
            gateway,
            verification,
        }
    }
}

/// Full rate record snapshot.
///
/// GET /operator/rates
#[instrument(skip(state))]
async fn rate_record(
    _operator: RequireOperator,
    State(state): State<AppState>,
) -> Json<RateRecord> {
    Json(state.rates().record().await)
}

/// Set the global rate.
///
/// PUT /operator/rates/global
#[instrument(skip(state, request))]
async fn set_global_rate(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Json(request): Json<SetGlobalRateRequest>,
) -> Result<Json<GlobalRateView>> {
    let set_by = request.set_by.as_deref().unwrap_or(DEFAULT_ACTOR);
    let rate = state
        .rates()
        .set_global_rate(request.rate, set_by, request.note)
        .await?;
    Ok(Json(GlobalRateView { rate }))
}

/// Set one customer override.
///
/// POST /operator/rates/customers
#[instrument(skip(state, request))]
async fn set_customer_rate(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Json(request): Json<SetCustomerRateRequest>,
) -> Result<Json<CustomerRateOverride>> {
    let set_by = request.set_by.as_deref().unwrap_or(DEFAULT_ACTOR);
    let overwrite = state
        .rates()
        .set_customer_rate(request.change, set_by)
        .await?;
    Ok(Json(overwrite))
}

/// Set many customer overrides in one validated pass.
///
/// POST /operator/rates/customers/bulk
#[instrument(skip(state, request), fields(rows = request.changes.len()))]
async fn set_bulk_customer_rates(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Json(request): Json<BulkRateRequest>,
) -> Result<Json<Vec<CustomerRateOverride>>> {
    let set_by = request.set_by.as_deref().unwrap_or(DEFAULT_ACTOR);
    let overrides = state
        .rates()
        .set_bulk_customer_rates(request.changes, set_by)
        .await?;
    Ok(Json(overrides))
}

/// Remove a customer override.
///
/// DELETE /operator/rates/customers/{email}
#[instrument(skip(state, params), fields(email = %email))]
async fn remove_customer_rate(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Path(email): Path<String>,
    Query(params): Query<RemoveRateParams>,
) -> Result<Json<CustomerRateOverride>> {
    let set_by = params.set_by.as_deref().unwrap_or(DEFAULT_ACTOR);
    let removed = state
        .rates()
        .remove_customer_rate(&email, set_by, params.note)
        .await?;
    removed
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no override for {email}")))
}

/// Change history, optionally narrowed to one email.
///
/// GET /operator/rates/history?email=
#[instrument(skip(state, params))]
async fn rate_history(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Query(params): Query<EmailParams>,
) -> Result<Json<Vec<RateHistoryEntry>>> {
    let history = state.rates().history(params.email.as_deref()).await?;
    Ok(Json(history))
}

/// Resolve the effective rate for an email (or the global rate without one).
///
/// GET /operator/rates/resolve?email=
#[instrument(skip(state, params))]
async fn resolve_rate(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Query(params): Query<EmailParams>,
) -> Result<Json<ResolvedRate>> {
    let email = params
        .email
        .as_deref()
        .map(EmailAddress::parse)
        .transpose()
        .map_err(coinforge_engine::EngineError::from)?;
    let resolved = state.rates().resolve(email.as_ref()).await?;
    Ok(Json(resolved))
}

/// Order detail with gateway correlation and verification progress.
///
/// GET /operator/orders/{id}
#[instrument(skip(state), fields(order_id = %id))]
async fn order_detail(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OperatorOrderView>> {
    let order = state.orders().get_order(id).await?;
    Ok(Json(order.into()))
}

/// Mark a completed order's coins as delivered.
///
/// POST /operator/orders/{id}/fulfillment
#[instrument(skip(state, request), fields(order_id = %id))]
async fn fulfill_order(
    _operator: RequireOperator,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(request): Json<FulfillRequest>,
) -> Result<Json<OrderView>> {
    let order = state
        .orders()
        .mark_fulfilled(id, request.resend_notification)
        .await?;
    Ok(Json(order.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coinforge_engine::models::OverrideKind;

    use super::*;

    #[test]
    fn test_customer_rate_request_flattens_change() {
        let request: SetCustomerRateRequest = serde_json::from_str(
            r#"{
                "email": "vip@example.com",
                "rate": 100,
                "kind": "permanent",
                "set_by": "alice"
            }"#,
        )
        .unwrap();

        assert_eq!(request.change.email, "vip@example.com");
        assert_eq!(request.change.kind, OverrideKind::Permanent);
        assert_eq!(request.set_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_fulfill_request_defaults_to_no_resend() {
        let request: FulfillRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.resend_notification);
    }

    #[test]
    fn test_email_params_allow_missing_filter() {
        let params: EmailParams = serde_json::from_str("{}").unwrap();
        assert!(params.email.is_none());
    }
}
