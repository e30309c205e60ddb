//! Coinforge Core - Shared domain types.
//!
//! This crate provides common types used across the Coinforge components:
//! - `engine` - Order and payment orchestration engine
//! - `server` - Public checkout and operator API binary
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for emails, money, rates, ids, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
