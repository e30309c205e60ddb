//! HTTP middleware for the server.

pub mod auth;
pub mod rate_limit;

pub use auth::RequireOperator;
pub use rate_limit::{checkout_rate_limiter, verification_rate_limiter};
