//! HTTP route handlers for the server.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                 - Liveness check
//! GET  /health/ready                           - Readiness check
//!
//! # Checkout (public, rate limited)
//! POST /api/orders                             - Create an order
//! GET  /api/orders/{id}                        - Fetch an order
//! POST /api/orders/{id}/verification           - Send a verification code
//! POST /api/orders/{id}/verify                 - Submit a verification code
//! POST /api/orders/{id}/payment                - Authorize payment
//!
//! # Webhooks
//! POST /webhooks/crypto                        - Async payment notice
//!
//! # Operator (bearer token)
//! GET    /operator/rates                       - Full rate record
//! PUT    /operator/rates/global                - Set the global rate
//! POST   /operator/rates/customers             - Set one customer override
//! POST   /operator/rates/customers/bulk        - Set many customer overrides
//! DELETE /operator/rates/customers/{email}     - Remove a customer override
//! GET    /operator/rates/history               - Change history (?email=)
//! GET    /operator/rates/resolve               - Resolve a rate (?email=)
//! GET    /operator/orders/{id}                 - Order detail with gateway state
//! POST   /operator/orders/{id}/fulfillment     - Mark coins delivered
//! ```

pub mod checkout;
pub mod operator;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Create all routes for the server.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/api/orders", checkout::order_routes())
        .nest("/webhooks", webhooks::webhook_routes())
        .nest("/operator", operator::operator_routes())
}
