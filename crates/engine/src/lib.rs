//! Coinforge Engine - Order and payment orchestration.
//!
//! This crate implements the purchase lifecycle for virtual-currency orders:
//! customer-specific pricing, OTP-gated identity verification, and dispatch
//! to two structurally different payment rails (synchronous tokenized-card
//! capture and asynchronous webhook-confirmed crypto payment).
//!
//! # Architecture
//!
//! - [`models`] - Order, customer, and rate-record aggregates
//! - [`store`] - JSON-file-backed repositories with compare-and-set mutation
//! - [`services`] - Rate resolution, OTP issuance/checking, and the order
//!   orchestrator that drives the state machine
//! - [`gateway`] - Payment gateway ports and their HTTP client
//!   implementations
//! - [`notify`] - Outbound notification port (delivery lives in the server)
//!
//! The crate exposes contracts, not transports: HTTP routing, configuration,
//! and notification delivery live in `coinforge-server`.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod error;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod services;
pub mod store;

pub use error::EngineError;
