//! Rate record: global rate, per-customer overrides, audit history.
//!
//! This is the persisted pricing document. Field names and value shapes are
//! load-bearing: operators inspect and back up this file, and external
//! tooling reads it, so rates serialize as JSON numbers, timestamps as
//! RFC 3339 strings, and map keys as normalized emails.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use coinforge_core::{EmailAddress, Rate};
use serde::{Deserialize, Serialize};

/// The whole pricing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRecord {
    /// Coins per currency unit when no override applies.
    pub global_rate: Rate,
    /// Per-customer overrides, keyed by normalized email.
    #[serde(default)]
    pub customer_rates: BTreeMap<EmailAddress, CustomerRateOverride>,
    /// Append-only audit log of every rate mutation.
    #[serde(default)]
    pub history: Vec<RateHistoryEntry>,
}

impl RateRecord {
    /// A fresh record with no overrides and no history.
    #[must_use]
    pub fn new(global_rate: Rate) -> Self {
        Self {
            global_rate,
            customer_rates: BTreeMap::new(),
            history: Vec::new(),
        }
    }
}

/// Whether an override outlives the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Permanent,
    Temporary,
}

impl std::fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Temporary => write!(f, "temporary"),
        }
    }
}

/// A customer-specific rate replacing the global one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRateOverride {
    pub email: EmailAddress,
    pub rate: Rate,
    #[serde(rename = "type")]
    pub kind: OverrideKind,
    /// Required for `temporary`, always `null` for `permanent`.
    pub expires_at: Option<DateTime<Utc>>,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CustomerRateOverride {
    /// A temporary override past its expiry counts as absent.
    ///
    /// A temporary override missing its expiry should not exist; if one is
    /// ever encountered (hand-edited file), it is treated as expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            OverrideKind::Permanent => false,
            OverrideKind::Temporary => self.expires_at.is_none_or(|expires_at| now > expires_at),
        }
    }
}

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateAction {
    GlobalRateSet,
    CustomerRateSet,
    CustomerRateSetBulk,
    CustomerRateRemoved,
}

impl std::fmt::Display for RateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GlobalRateSet => write!(f, "global_rate_set"),
            Self::CustomerRateSet => write!(f, "customer_rate_set"),
            Self::CustomerRateSetBulk => write!(f, "customer_rate_set_bulk"),
            Self::CustomerRateRemoved => write!(f, "customer_rate_removed"),
        }
    }
}

/// One audit entry. Appended for every mutation, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: RateAction,
    /// Absent for global-rate changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailAddress>,
    /// Value before the change; absent when there was none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Rate>,
    /// Value after the change; absent for removals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Rate>,
    /// Operator identity, or `system` for lazy evictions.
    pub set_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn rate(value: rust_decimal::Decimal) -> Rate {
        Rate::new(value).unwrap()
    }

    #[test]
    fn test_record_serializes_with_camel_case_keys_and_numeric_rates() {
        let email = EmailAddress::parse("vip@example.com").unwrap();
        let set_at: DateTime<Utc> = "2026-03-01T10:00:00Z".parse().unwrap();
        let mut record = RateRecord::new(rate(dec!(87)));
        record.customer_rates.insert(
            email.clone(),
            CustomerRateOverride {
                email: email.clone(),
                rate: rate(dec!(100)),
                kind: OverrideKind::Permanent,
                expires_at: None,
                set_by: "ops@example.com".to_owned(),
                set_at,
                note: None,
            },
        );
        record.history.push(RateHistoryEntry {
            timestamp: set_at,
            action: RateAction::CustomerRateSet,
            email: Some(email),
            old_value: None,
            new_value: Some(rate(dec!(100))),
            set_by: "ops@example.com".to_owned(),
            note: Some("vip deal".to_owned()),
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["globalRate"], serde_json::json!(87.0));

        let entry = &json["customerRates"]["vip@example.com"];
        assert_eq!(entry["rate"], serde_json::json!(100.0));
        assert_eq!(entry["type"], "permanent");
        assert!(entry["expiresAt"].is_null());
        assert_eq!(entry["setBy"], "ops@example.com");
        assert!(entry.get("note").is_none());

        let history = &json["history"][0];
        assert_eq!(history["action"], "customer_rate_set");
        assert_eq!(history["newValue"], serde_json::json!(100.0));
        assert!(history.get("oldValue").is_none());
        assert_eq!(history["note"], "vip deal");
    }

    #[test]
    fn test_record_roundtrips() {
        let record = RateRecord::new(rate(dec!(87.5)));
        let json = serde_json::to_string(&record).unwrap();
        let parsed: RateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_permanent_override_never_expires() {
        let email = EmailAddress::parse("vip@example.com").unwrap();
        let over = CustomerRateOverride {
            email,
            rate: rate(dec!(100)),
            kind: OverrideKind::Permanent,
            expires_at: None,
            set_by: "ops".to_owned(),
            set_at: Utc::now(),
            note: None,
        };
        assert!(!over.is_expired_at(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn test_temporary_override_expires() {
        let email = EmailAddress::parse("vip@example.com").unwrap();
        let now = Utc::now();
        let over = CustomerRateOverride {
            email,
            rate: rate(dec!(150)),
            kind: OverrideKind::Temporary,
            expires_at: Some(now),
            set_by: "ops".to_owned(),
            set_at: now - chrono::Duration::hours(1),
            note: None,
        };
        assert!(!over.is_expired_at(now - chrono::Duration::seconds(1)));
        assert!(over.is_expired_at(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_temporary_without_expiry_counts_as_expired() {
        let email = EmailAddress::parse("vip@example.com").unwrap();
        let over = CustomerRateOverride {
            email,
            rate: rate(dec!(150)),
            kind: OverrideKind::Temporary,
            expires_at: None,
            set_by: "ops".to_owned(),
            set_at: Utc::now(),
            note: None,
        };
        assert!(over.is_expired_at(Utc::now()));
    }
}
