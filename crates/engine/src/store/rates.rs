//! Rate record repository.
//!
//! A single JSON document holds the global rate, the per-customer overrides
//! and the append-only change history. Every mutation appends its history
//! entries and flushes in the same critical section, so an override and the
//! entry describing it are never persisted apart.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use coinforge_core::{EmailAddress, Rate};
use tokio::sync::RwLock;

use super::{StoreError, read_json, write_json_atomic};
use crate::models::{CustomerRateOverride, RateAction, RateHistoryEntry, RateRecord};

/// Actor recorded on history entries written by the engine itself.
pub const SYSTEM_ACTOR: &str = "system";

const EXPIRED_NOTE: &str = "temporary override expired";

/// JSON-file-backed store for the [`RateRecord`] document.
#[derive(Debug)]
pub struct FileRateStore {
    path: Option<PathBuf>,
    state: RwLock<RateRecord>,
}

impl FileRateStore {
    /// Open the store at `path`; a missing file starts a fresh record at
    /// `default_global`.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>, default_global: Rate) -> Result<Self, StoreError> {
        let path = path.into();
        let state = read_json::<RateRecord>(&path)?.unwrap_or_else(|| RateRecord::new(default_global));
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// An ephemeral store that never touches disk.
    #[must_use]
    pub fn in_memory(global: Rate) -> Self {
        Self {
            path: None,
            state: RwLock::new(RateRecord::new(global)),
        }
    }

    fn flush(&self, state: &RateRecord) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_json_atomic(path, state),
            None => Ok(()),
        }
    }

    /// Clone of the full record, for the operator surface.
    pub async fn snapshot(&self) -> RateRecord {
        self.state.read().await.clone()
    }

    pub async fn global_rate(&self) -> Rate {
        self.state.read().await.global_rate
    }

    /// The stored override for `email`, expired or not.
    pub async fn override_for(&self, email: &EmailAddress) -> Option<CustomerRateOverride> {
        self.state.read().await.customer_rates.get(email).cloned()
    }

    /// Drop `email`'s override if it has expired as of `now`.
    ///
    /// Returns whether an eviction happened. The expiry check runs again
    /// under the write lock, so concurrent resolvers racing on the same
    /// stale override produce exactly one removal entry between them.
    pub async fn evict_if_expired(
        &self,
        email: &EmailAddress,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let expired = state
            .customer_rates
            .get(email)
            .is_some_and(|o| o.is_expired_at(now));
        if !expired {
            return Ok(false);
        }

        let removed = state.customer_rates.remove(email);
        state.history.push(RateHistoryEntry {
            timestamp: now,
            action: RateAction::CustomerRateRemoved,
            email: Some(email.clone()),
            old_value: removed.map(|o| o.rate),
            new_value: None,
            set_by: SYSTEM_ACTOR.to_owned(),
            note: Some(EXPIRED_NOTE.to_owned()),
        });
        self.flush(&state)?;
        Ok(true)
    }

    /// Replace the global rate.
    pub async fn set_global(
        &self,
        rate: Rate,
        set_by: &str,
        note: Option<String>,
    ) -> Result<Rate, StoreError> {
        let mut state = self.state.write().await;
        let old = state.global_rate;
        state.global_rate = rate;
        state.history.push(RateHistoryEntry {
            timestamp: Utc::now(),
            action: RateAction::GlobalRateSet,
            email: None,
            old_value: Some(old),
            new_value: Some(rate),
            set_by: set_by.to_owned(),
            note,
        });
        self.flush(&state)?;
        Ok(old)
    }

    /// Insert or replace one customer override.
    pub async fn set_customer(
        &self,
        overwrite: CustomerRateOverride,
    ) -> Result<Option<CustomerRateOverride>, StoreError> {
        let mut state = self.state.write().await;
        let previous = Self::put_override(&mut state, overwrite, RateAction::CustomerRateSet);
        self.flush(&state)?;
        Ok(previous)
    }

    /// Insert or replace a batch of overrides in one commit. Each email gets
    /// its own history entry, tagged as a bulk change.
    pub async fn set_customers_bulk(
        &self,
        overrides: Vec<CustomerRateOverride>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for overwrite in overrides {
            Self::put_override(&mut state, overwrite, RateAction::CustomerRateSetBulk);
        }
        self.flush(&state)
    }

    fn put_override(
        state: &mut RateRecord,
        overwrite: CustomerRateOverride,
        action: RateAction,
    ) -> Option<CustomerRateOverride> {
        let previous = state
            .customer_rates
            .insert(overwrite.email.clone(), overwrite.clone());
        state.history.push(RateHistoryEntry {
            timestamp: Utc::now(),
            action,
            email: Some(overwrite.email),
            old_value: previous.as_ref().map(|o| o.rate),
            new_value: Some(overwrite.rate),
            set_by: overwrite.set_by,
            note: overwrite.note,
        });
        previous
    }

    /// Remove `email`'s override. Returns the removed override, or `None`
    /// when there was nothing to remove (in which case no history entry is
    /// written).
    pub async fn remove_customer(
        &self,
        email: &EmailAddress,
        set_by: &str,
        note: Option<String>,
    ) -> Result<Option<CustomerRateOverride>, StoreError> {
        let mut state = self.state.write().await;
        let Some(removed) = state.customer_rates.remove(email) else {
            return Ok(None);
        };
        state.history.push(RateHistoryEntry {
            timestamp: Utc::now(),
            action: RateAction::CustomerRateRemoved,
            email: Some(email.clone()),
            old_value: Some(removed.rate),
            new_value: None,
            set_by: set_by.to_owned(),
            note,
        });
        self.flush(&state)?;
        Ok(Some(removed))
    }

    /// Change history, newest last, optionally narrowed to one email.
    pub async fn history(&self, email: Option<&EmailAddress>) -> Vec<RateHistoryEntry> {
        let state = self.state.read().await;
        match email {
            Some(email) => state
                .history
                .iter()
                .filter(|entry| entry.email.as_ref() == Some(email))
                .cloned()
                .collect(),
            None => state.history.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::OverrideKind;

    fn rate(value: rust_decimal::Decimal) -> Rate {
        Rate::new(value).unwrap()
    }

    fn email(addr: &str) -> EmailAddress {
        EmailAddress::parse(addr).unwrap()
    }

    fn permanent(addr: &str, value: rust_decimal::Decimal) -> CustomerRateOverride {
        CustomerRateOverride {
            email: email(addr),
            rate: rate(value),
            kind: OverrideKind::Permanent,
            expires_at: None,
            set_by: "ops@example.com".to_owned(),
            set_at: Utc::now(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_set_global_records_prior_value() {
        let store = FileRateStore::in_memory(rate(dec!(87)));
        store
            .set_global(rate(dec!(90)), "ops@example.com", Some("promo".to_owned()))
            .await
            .unwrap();

        assert_eq!(store.global_rate().await, rate(dec!(90)));
        let history = store.history(None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, RateAction::GlobalRateSet);
        assert_eq!(history[0].old_value, Some(rate(dec!(87))));
        assert_eq!(history[0].new_value, Some(rate(dec!(90))));
        assert_eq!(history[0].set_by, "ops@example.com");
    }

    #[tokio::test]
    async fn test_set_customer_then_replace() {
        let store = FileRateStore::in_memory(rate(dec!(87)));
        let vip = email("vip@example.com");

        store
            .set_customer(permanent("vip@example.com", dec!(100)))
            .await
            .unwrap();
        let previous = store
            .set_customer(permanent("vip@example.com", dec!(120)))
            .await
            .unwrap();

        assert_eq!(previous.unwrap().rate, rate(dec!(100)));
        assert_eq!(store.override_for(&vip).await.unwrap().rate, rate(dec!(120)));

        let history = store.history(Some(&vip)).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].old_value, None);
        assert_eq!(history[1].old_value, Some(rate(dec!(100))));
        assert!(history.iter().all(|e| e.action == RateAction::CustomerRateSet));
    }

    #[tokio::test]
    async fn test_bulk_set_tags_every_entry() {
        let store = FileRateStore::in_memory(rate(dec!(87)));
        store
            .set_customers_bulk(vec![
                permanent("a@example.com", dec!(95)),
                permanent("b@example.com", dec!(96)),
            ])
            .await
            .unwrap();

        let history = store.history(None).await;
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .all(|e| e.action == RateAction::CustomerRateSetBulk));
        assert!(store.override_for(&email("a@example.com")).await.is_some());
        assert!(store.override_for(&email("b@example.com")).await.is_some());
    }

    #[tokio::test]
    async fn test_evict_if_expired_writes_one_entry() {
        let store = FileRateStore::in_memory(rate(dec!(87)));
        let vip = email("vip@example.com");
        let now = Utc::now();
        store
            .set_customer(CustomerRateOverride {
                kind: OverrideKind::Temporary,
                expires_at: Some(now - Duration::seconds(1)),
                ..permanent("vip@example.com", dec!(150))
            })
            .await
            .unwrap();

        assert!(store.evict_if_expired(&vip, now).await.unwrap());
        // A second pass finds nothing left to evict.
        assert!(!store.evict_if_expired(&vip, now).await.unwrap());

        let removals: Vec<_> = store
            .history(Some(&vip))
            .await
            .into_iter()
            .filter(|e| e.action == RateAction::CustomerRateRemoved)
            .collect();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].set_by, SYSTEM_ACTOR);
        assert_eq!(removals[0].old_value, Some(rate(dec!(150))));
        assert_eq!(removals[0].new_value, None);
        assert_eq!(removals[0].note.as_deref(), Some("temporary override expired"));
    }

    #[tokio::test]
    async fn test_evict_leaves_unexpired_overrides_alone() {
        let store = FileRateStore::in_memory(rate(dec!(87)));
        let vip = email("vip@example.com");
        let now = Utc::now();
        store
            .set_customer(CustomerRateOverride {
                kind: OverrideKind::Temporary,
                expires_at: Some(now + Duration::hours(1)),
                ..permanent("vip@example.com", dec!(150))
            })
            .await
            .unwrap();

        assert!(!store.evict_if_expired(&vip, now).await.unwrap());
        assert!(store.override_for(&vip).await.is_some());
        assert_eq!(store.history(Some(&vip)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_override_is_silent() {
        let store = FileRateStore::in_memory(rate(dec!(87)));
        let removed = store
            .remove_customer(&email("ghost@example.com"), "ops@example.com", None)
            .await
            .unwrap();
        assert!(removed.is_none());
        assert!(store.history(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.json");

        {
            let store = FileRateStore::open(&path, rate(dec!(87))).unwrap();
            store
                .set_customer(permanent("vip@example.com", dec!(100)))
                .await
                .unwrap();
        }

        let reopened = FileRateStore::open(&path, rate(dec!(1))).unwrap();
        // Loaded state wins over the default.
        assert_eq!(reopened.global_rate().await, rate(dec!(87)));
        assert!(reopened
            .override_for(&email("vip@example.com"))
            .await
            .is_some());
        assert_eq!(reopened.history(None).await.len(), 1);
    }
}
