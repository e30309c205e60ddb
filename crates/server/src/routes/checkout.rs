//! Checkout route handlers.
//!
//! JSON API endpoints for the purchase flow: create an order, prove control
//! of the email with a verification code, then pay.
//!
//! Responses use [`OrderView`], which deliberately omits the stored
//! verification challenge. Only delivery timing and attempt state would be
//! safe to share, and the checkout flow does not need either.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use coinforge_core::{
    EmailAddress, FulfillmentStatus, Money, OrderId, OrderStatus, PaymentMethod, Rate,
};
use coinforge_engine::models::{LineItem, Order};
use coinforge_engine::services::{CreateOrderRequest, PaymentInstrument, PaymentOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::middleware::{checkout_rate_limiter, verification_rate_limiter};
use crate::state::AppState;

/// Create the checkout routes router.
pub fn order_routes() -> Router<AppState> {
    let verification = Router::new()
        .route("/{id}/verification", post(request_verification))
        .route("/{id}/verify", post(verify))
        .route_layer(verification_rate_limiter());

    Router::new()
        .route("/", post(create))
        .route("/{id}", get(show))
        .route("/{id}/payment", post(pay))
        .route_layer(checkout_rate_limiter())
        .merge(verification)
}

/// Customer-facing order representation.
///
/// Carries everything the purchaser needs to follow their order and nothing
/// else: no verification challenge, no gateway correlation ids.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub email: EmailAddress,
    pub status: OrderStatus,
    pub method: PaymentMethod,
    pub amount: Money,
    pub coins_total: Decimal,
    pub applied_rate: Rate,
    pub items: Vec<LineItem>,
    pub fulfillment: FulfillmentStatus,
    /// Machine-readable decline code, present once a charge was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            email: order.email,
            status: order.status,
            method: order.method,
            amount: order.amount,
            coins_total: order.coins_total,
            applied_rate: order.applied_rate,
            items: order.items,
            fulfillment: order.fulfillment,
            decline_code: order.gateway.decline_code,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Submitted verification code.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

/// How an authorization attempt ended.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentResponse {
    /// The charge settled synchronously.
    Completed { order: OrderView },
    /// A hosted crypto session is open; the customer finishes there.
    PendingAsync {
        order: OrderView,
        redirect_url: String,
        deposit_address: String,
    },
}

impl From<PaymentOutcome> for PaymentResponse {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Completed { order } => Self::Completed {
                order: order.into(),
            },
            PaymentOutcome::PendingAsync {
                order,
                redirect_url,
                deposit_address,
            } => Self::PendingAsync {
                order: order.into(),
                redirect_url,
                deposit_address,
            },
        }
    }
}

/// Create an order.
///
/// POST /api/orders
#[instrument(skip(state, request))]
async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderView>)> {
    let order = state.orders().create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// Fetch an order.
///
/// GET /api/orders/{id}
#[instrument(skip(state), fields(order_id = %id))]
async fn show(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>> {
    let order = state.orders().get_order(id).await?;
    Ok(Json(order.into()))
}

/// Send a verification code to the order's email address.
///
/// POST /api/orders/{id}/verification
#[instrument(skip(state), fields(order_id = %id))]
async fn request_verification(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<(StatusCode, Json<OrderView>)> {
    let order = state.orders().request_verification(id).await?;
    Ok((StatusCode::ACCEPTED, Json(order.into())))
}

/// Submit a verification code.
///
/// POST /api/orders/{id}/verify
#[instrument(skip(state, request), fields(order_id = %id))]
async fn verify(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<OrderView>> {
    let order = state.orders().verify_otp(id, &request.code).await?;
    Ok(Json(order.into()))
}

/// Authorize payment for a verified order.
///
/// POST /api/orders/{id}/payment
#[instrument(skip(state, instrument), fields(order_id = %id))]
async fn pay(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(instrument): Json<PaymentInstrument>,
) -> Result<Json<PaymentResponse>> {
    let outcome = state.orders().authorize_payment(id, instrument).await?;
    Ok(Json(outcome.into()))
}
