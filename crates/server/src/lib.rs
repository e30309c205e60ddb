//! Coinforge API server library.
//!
//! This crate provides the HTTP surface as a library, allowing it to be
//! tested and reused.
//!
//! # Security
//!
//! Operator routes (`/operator/*`) mutate rates and fulfillment and are
//! guarded by a bearer token. Checkout routes are public but rate limited,
//! and order payloads returned to customers never include verification-code
//! material.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod email;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
