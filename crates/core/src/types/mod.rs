//! Core types for Coinforge.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod money;
pub mod rate;
pub mod status;

pub use email::{EmailAddress, EmailError};
pub use id::OrderId;
pub use money::{CurrencyCode, Money};
pub use rate::{Rate, RateError};
pub use status::*;
