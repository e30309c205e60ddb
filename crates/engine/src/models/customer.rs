//! Customer identity record.

use chrono::{DateTime, Utc};
use coinforge_core::EmailAddress;
use serde::{Deserialize, Serialize};

/// A customer, keyed by normalized email.
///
/// Created on first order and refreshed on every subsequent one. The
/// `account_id` is the external account the purchased coins are credited
/// to. It is customer-claimed; the OTP challenge verifies control of the
/// email, not of the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: EmailAddress,
    pub display_name: String,
    pub phone: Option<String>,
    /// Claimed external account receiving the coins.
    pub account_id: String,
    pub address: Option<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Postal address, used both on customer records and card billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}
