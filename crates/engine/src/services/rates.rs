//! Coin-rate resolution and administration.
//!
//! Reads go through a TTL cache in front of the rate store; every write
//! invalidates the keys it touches, so operators see their changes on the
//! next read regardless of TTL. Cached override entries carry their expiry,
//! which is re-checked on every hit so a temporary rate can never outlive
//! its window by way of the cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use coinforge_core::{EmailAddress, Rate};
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::EngineError;
use crate::models::{CustomerRateOverride, OverrideKind, RateHistoryEntry, RateRecord};
use crate::notify::{Notification, Notifier, send_best_effort};
use crate::store::FileRateStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Global,
    Customer(EmailAddress),
}

#[derive(Debug, Clone)]
enum CacheValue {
    Global(Rate),
    /// The stored override for a customer, or a remembered miss.
    Override(Option<Box<CustomerRateOverride>>),
}

/// Read-through cache in front of the rate store.
///
/// Owns its TTL (injected at construction) and exposes invalidation so
/// writers can evict exactly the keys they changed.
#[derive(Debug, Clone)]
pub struct RateCache {
    inner: Cache<CacheKey, CacheValue>,
}

impl RateCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.inner.get(key).await
    }

    async fn insert(&self, key: CacheKey, value: CacheValue) {
        self.inner.insert(key, value).await;
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.inner.invalidate(key).await;
    }
}

/// Where a resolved rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Global,
    CustomerOverride,
}

/// Result of a rate lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedRate {
    pub rate: Rate,
    pub source: RateSource,
}

/// One requested override change, as submitted by an operator.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerRateChange {
    pub email: String,
    pub rate: Decimal,
    pub kind: OverrideKind,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Rate lookups and operator mutations.
#[derive(Clone)]
pub struct RateService {
    store: Arc<FileRateStore>,
    cache: RateCache,
    notifier: Arc<dyn Notifier>,
    admin_email: EmailAddress,
}

impl RateService {
    #[must_use]
    pub fn new(
        store: Arc<FileRateStore>,
        cache: RateCache,
        notifier: Arc<dyn Notifier>,
        admin_email: EmailAddress,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            admin_email,
        }
    }

    /// Resolve the coins-per-unit rate for a purchase.
    ///
    /// Without an email this is the global rate. With one, a live override
    /// wins; a temporary override past its expiry is evicted from the store
    /// (with a history entry) and resolution falls back to the global rate.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors during expired-override eviction.
    pub async fn resolve(
        &self,
        email: Option<&EmailAddress>,
    ) -> Result<ResolvedRate, EngineError> {
        let Some(email) = email else {
            return Ok(ResolvedRate {
                rate: self.global().await,
                source: RateSource::Global,
            });
        };

        let Some(overwrite) = self.override_for(email).await else {
            return Ok(ResolvedRate {
                rate: self.global().await,
                source: RateSource::Global,
            });
        };

        if overwrite.is_expired_at(Utc::now()) {
            self.store.evict_if_expired(email, Utc::now()).await?;
            self.cache
                .invalidate(&CacheKey::Customer(email.clone()))
                .await;
            return Ok(ResolvedRate {
                rate: self.global().await,
                source: RateSource::Global,
            });
        }

        Ok(ResolvedRate {
            rate: overwrite.rate,
            source: RateSource::CustomerOverride,
        })
    }

    async fn global(&self) -> Rate {
        if let Some(CacheValue::Global(rate)) = self.cache.get(&CacheKey::Global).await {
            debug!("cache hit for global rate");
            return rate;
        }
        let rate = self.store.global_rate().await;
        self.cache
            .insert(CacheKey::Global, CacheValue::Global(rate))
            .await;
        rate
    }

    async fn override_for(&self, email: &EmailAddress) -> Option<CustomerRateOverride> {
        let key = CacheKey::Customer(email.clone());
        if let Some(CacheValue::Override(overwrite)) = self.cache.get(&key).await {
            debug!("cache hit for customer rate");
            return overwrite.map(|boxed| *boxed);
        }
        let overwrite = self.store.override_for(email).await;
        self.cache
            .insert(
                key,
                CacheValue::Override(overwrite.clone().map(Box::new)),
            )
            .await;
        overwrite
    }

    /// Replace the global rate. The operator inbox is told about the change.
    ///
    /// # Errors
    ///
    /// Fails on a non-positive rate or a storage error.
    pub async fn set_global_rate(
        &self,
        rate: Decimal,
        set_by: &str,
        note: Option<String>,
    ) -> Result<Rate, EngineError> {
        let rate = Rate::new(rate)?;
        let old = self.store.set_global(rate, set_by, note.clone()).await?;
        self.cache.invalidate(&CacheKey::Global).await;

        send_best_effort(
            self.notifier.as_ref(),
            &self.admin_email,
            Notification::RateChanged {
                old_rate: Some(old),
                new_rate: Some(rate),
                note,
            },
        )
        .await;
        Ok(rate)
    }

    /// Set one customer override. The affected customer is told about the
    /// change.
    ///
    /// # Errors
    ///
    /// Fails on a bad email, a non-positive rate, an expiry that disagrees
    /// with the override kind, or a storage error.
    pub async fn set_customer_rate(
        &self,
        change: CustomerRateChange,
        set_by: &str,
    ) -> Result<CustomerRateOverride, EngineError> {
        let overwrite = Self::build_override(change, set_by)?;
        let email = overwrite.email.clone();
        let previous = self.store.set_customer(overwrite.clone()).await?;
        self.cache
            .invalidate(&CacheKey::Customer(email.clone()))
            .await;

        send_best_effort(
            self.notifier.as_ref(),
            &email,
            Notification::RateChanged {
                old_rate: previous.map(|p| p.rate),
                new_rate: Some(overwrite.rate),
                note: overwrite.note.clone(),
            },
        )
        .await;
        Ok(overwrite)
    }

    /// Set a batch of overrides in one commit. Validation covers the whole
    /// batch before anything is written; one bad row rejects the lot.
    ///
    /// # Errors
    ///
    /// Fails if any row is invalid, or on a storage error.
    pub async fn set_bulk_customer_rates(
        &self,
        changes: Vec<CustomerRateChange>,
        set_by: &str,
    ) -> Result<Vec<CustomerRateOverride>, EngineError> {
        if changes.is_empty() {
            return Err(EngineError::Validation(
                "bulk rate change contains no rows".to_owned(),
            ));
        }

        let mut overrides = Vec::with_capacity(changes.len());
        for (index, change) in changes.into_iter().enumerate() {
            let overwrite = Self::build_override(change, set_by).map_err(|err| {
                EngineError::Validation(format!("row {index}: {err}"))
            })?;
            overrides.push(overwrite);
        }

        self.store.set_customers_bulk(overrides.clone()).await?;
        for overwrite in &overrides {
            self.cache
                .invalidate(&CacheKey::Customer(overwrite.email.clone()))
                .await;
            send_best_effort(
                self.notifier.as_ref(),
                &overwrite.email,
                Notification::RateChanged {
                    old_rate: None,
                    new_rate: Some(overwrite.rate),
                    note: overwrite.note.clone(),
                },
            )
            .await;
        }
        Ok(overrides)
    }

    /// Remove a customer override, if it exists. Removal of a live override
    /// is announced to the customer.
    ///
    /// # Errors
    ///
    /// Fails on a bad email or a storage error.
    pub async fn remove_customer_rate(
        &self,
        email: &str,
        set_by: &str,
        note: Option<String>,
    ) -> Result<Option<CustomerRateOverride>, EngineError> {
        let email = EmailAddress::parse(email)?;
        let removed = self
            .store
            .remove_customer(&email, set_by, note.clone())
            .await?;
        self.cache
            .invalidate(&CacheKey::Customer(email.clone()))
            .await;

        if let Some(removed) = &removed {
            send_best_effort(
                self.notifier.as_ref(),
                &email,
                Notification::RateChanged {
                    old_rate: Some(removed.rate),
                    new_rate: None,
                    note,
                },
            )
            .await;
        }
        Ok(removed)
    }

    /// Full record snapshot, for the operator surface.
    pub async fn record(&self) -> RateRecord {
        self.store.snapshot().await
    }

    /// Change history, optionally narrowed to one email.
    ///
    /// # Errors
    ///
    /// Fails on a bad email filter.
    pub async fn history(
        &self,
        email: Option<&str>,
    ) -> Result<Vec<RateHistoryEntry>, EngineError> {
        let email = email.map(EmailAddress::parse).transpose()?;
        Ok(self.store.history(email.as_ref()).await)
    }

    fn build_override(
        change: CustomerRateChange,
        set_by: &str,
    ) -> Result<CustomerRateOverride, EngineError> {
        let email = EmailAddress::parse(&change.email)?;
        let rate = Rate::new(change.rate)?;
        match (change.kind, change.expires_at) {
            (OverrideKind::Temporary, None) => {
                return Err(EngineError::Validation(
                    "temporary override requires an expiry".to_owned(),
                ));
            }
            (OverrideKind::Permanent, Some(_)) => {
                return Err(EngineError::Validation(
                    "permanent override cannot carry an expiry".to_owned(),
                ));
            }
            _ => {}
        }
        Ok(CustomerRateOverride {
            email,
            rate,
            kind: change.kind,
            expires_at: change.expires_at,
            set_by: set_by.to_owned(),
            set_at: Utc::now(),
            note: change.note,
        })
    }
}
