//! Order and customer repository.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use coinforge_core::{EmailAddress, FulfillmentStatus, OrderId, OrderStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{StoreError, read_json, write_json_atomic};
use crate::models::{Customer, Order, OrderEvent};

/// Outcome of a compare-and-set status transition.
#[derive(Debug, Clone)]
pub enum Cas {
    /// The order matched an expected status and the event was applied.
    Applied(Order),
    /// The order sat in none of the expected statuses; nothing changed.
    /// Carries the current order so callers can decide whether that is an
    /// idempotent success or a conflict.
    Stale(Order),
}

/// Port for order and customer persistence.
///
/// Mutations are atomic with respect to each other: the duplicate-request
/// guarantees (at most one OTP verification success, at most one payment
/// authorization) rest on [`OrderStore::apply`] checking status and writing
/// the event under one critical section.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order.
    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    /// Fetch an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Fetch the order holding the given gateway payment session id.
    async fn get_by_payment_session(
        &self,
        payment_session_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    /// Compare-and-set: apply `event` iff the order currently sits in one of
    /// `expected`, and the move is legal for the state machine.
    async fn apply(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        event: OrderEvent,
    ) -> Result<Cas, StoreError>;

    /// Count a failed verification attempt; returns the updated attempt
    /// count. Counting against an order whose challenge has vanished is
    /// meaningless and returns 0 without changes.
    async fn record_failed_attempt(&self, id: OrderId) -> Result<u8, StoreError>;

    /// Set the fulfillment flag.
    async fn set_fulfillment(
        &self,
        id: OrderId,
        status: FulfillmentStatus,
    ) -> Result<Order, StoreError>;

    /// Create the customer or refresh an existing record (`created_at` is
    /// preserved).
    async fn upsert_customer(&self, customer: Customer) -> Result<Customer, StoreError>;

    /// Fetch a customer by normalized email.
    async fn get_customer(&self, email: &EmailAddress) -> Result<Option<Customer>, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OrdersFile {
    orders: HashMap<OrderId, Order>,
    customers: HashMap<EmailAddress, Customer>,
}

/// JSON-file-backed [`OrderStore`].
///
/// The full document lives in memory behind an `RwLock`; every mutation
/// rewrites the file atomically before the lock is released, so a flushed
/// state is always a consistent one.
#[derive(Debug)]
pub struct FileOrderStore {
    path: Option<PathBuf>,
    state: RwLock<OrdersFile>,
}

impl FileOrderStore {
    /// Open the store at `path`, loading the existing document if present.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = read_json::<OrdersFile>(&path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// An ephemeral store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(OrdersFile::default()),
        }
    }

    fn flush(&self, state: &OrdersFile) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_json_atomic(path, state),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OrderStore for FileOrderStore {
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.orders.insert(order.id, order);
        self.flush(&state)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn get_by_payment_session(
        &self,
        payment_session_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|order| {
                order.gateway.payment_session_id.as_deref() == Some(payment_session_id)
            })
            .cloned())
    }

    async fn apply(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        event: OrderEvent,
    ) -> Result<Cas, StoreError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;

        if !expected.contains(&order.status) {
            return Ok(Cas::Stale(order.clone()));
        }

        let target = event.target();
        // Re-entering the current status is allowed (a fresh OTP while one
        // is already pending); anything else must be in the transition table.
        if order.status != target && !order.status.can_transition_to(target) {
            return Err(StoreError::IllegalTransition {
                from: order.status,
                to: target,
            });
        }

        order.apply_event(event, Utc::now());
        let snapshot = order.clone();
        self.flush(&state)?;
        Ok(Cas::Applied(snapshot))
    }

    async fn record_failed_attempt(&self, id: OrderId) -> Result<u8, StoreError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;

        let Some(otp) = order.otp.as_mut() else {
            return Ok(0);
        };
        otp.attempts = otp.attempts.saturating_add(1);
        let attempts = otp.attempts;
        order.updated_at = Utc::now();
        self.flush(&state)?;
        Ok(attempts)
    }

    async fn set_fulfillment(
        &self,
        id: OrderId,
        status: FulfillmentStatus,
    ) -> Result<Order, StoreError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;

        order.fulfillment = status;
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        self.flush(&state)?;
        Ok(snapshot)
    }

    async fn upsert_customer(&self, customer: Customer) -> Result<Customer, StoreError> {
        let mut state = self.state.write().await;
        let merged = match state.customers.get(&customer.email) {
            Some(existing) => Customer {
                created_at: existing.created_at,
                ..customer
            },
            None => customer,
        };
        state.customers.insert(merged.email.clone(), merged.clone());
        self.flush(&state)?;
        Ok(merged)
    }

    async fn get_customer(&self, email: &EmailAddress) -> Result<Option<Customer>, StoreError> {
        let state = self.state.read().await;
        Ok(state.customers.get(email).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use coinforge_core::{CurrencyCode, Money, PaymentMethod, Rate};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{GatewayCorrelation, LineItem, OtpChallenge};

    fn sample_order() -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            email: EmailAddress::parse("buyer@example.com").unwrap(),
            items: vec![LineItem {
                name: "Coin pack".to_owned(),
                unit_price: dec!(20),
                quantity: 1,
                coins_per_item: dec!(1740),
            }],
            amount: Money::new(dec!(20), CurrencyCode::USD),
            coins_total: dec!(1740),
            applied_rate: Rate::new(dec!(87)).unwrap(),
            method: PaymentMethod::Card,
            status: OrderStatus::Created,
            otp: None,
            gateway: GatewayCorrelation::default(),
            fulfillment: FulfillmentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn challenge() -> OtpChallenge {
        let now = Utc::now();
        OtpChallenge {
            code_hash: "hash".to_owned(),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(10),
            attempts: 0,
            verified: false,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = FileOrderStore::in_memory();
        let order = sample_order();
        let id = order.id;

        store.insert(order.clone()).await.unwrap();
        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded, order);

        assert!(store.get(OrderId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_respects_expected_statuses() {
        let store = FileOrderStore::in_memory();
        let order = sample_order();
        let id = order.id;
        store.insert(order).await.unwrap();

        // Claiming authorization from Created is stale, not an error.
        let result = store
            .apply(
                id,
                &[OrderStatus::OtpVerified],
                OrderEvent::AuthorizationStarted,
            )
            .await
            .unwrap();
        assert!(matches!(result, Cas::Stale(ref o) if o.status == OrderStatus::Created));

        let result = store
            .apply(
                id,
                &[OrderStatus::Created, OrderStatus::OtpPending],
                OrderEvent::OtpIssued(challenge()),
            )
            .await
            .unwrap();
        assert!(matches!(result, Cas::Applied(ref o) if o.status == OrderStatus::OtpPending));
    }

    #[tokio::test]
    async fn test_apply_allows_reissuing_a_pending_code() {
        let store = FileOrderStore::in_memory();
        let order = sample_order();
        let id = order.id;
        store.insert(order).await.unwrap();

        let expected = [OrderStatus::Created, OrderStatus::OtpPending];
        store
            .apply(id, &expected, OrderEvent::OtpIssued(challenge()))
            .await
            .unwrap();
        let second = challenge();
        let result = store
            .apply(id, &expected, OrderEvent::OtpIssued(second.clone()))
            .await
            .unwrap();
        let Cas::Applied(order) = result else {
            panic!("expected Applied");
        };
        assert_eq!(order.otp, Some(second));
    }

    #[tokio::test]
    async fn test_apply_rejects_illegal_targets() {
        let store = FileOrderStore::in_memory();
        let order = sample_order();
        let id = order.id;
        store.insert(order).await.unwrap();

        // Completing straight out of Created is a caller bug.
        let result = store
            .apply(
                id,
                &[OrderStatus::Created],
                OrderEvent::CryptoConfirmed,
            )
            .await;
        assert!(matches!(
            result,
            Err(StoreError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_missing_order_is_not_found() {
        let store = FileOrderStore::in_memory();
        let result = store
            .apply(
                OrderId::new(),
                &[OrderStatus::Created],
                OrderEvent::AuthorizationStarted,
            )
            .await;
        assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_record_failed_attempt_counts_up() {
        let store = FileOrderStore::in_memory();
        let order = sample_order();
        let id = order.id;
        store.insert(order).await.unwrap();

        // No challenge yet: nothing to count.
        assert_eq!(store.record_failed_attempt(id).await.unwrap(), 0);

        store
            .apply(
                id,
                &[OrderStatus::Created],
                OrderEvent::OtpIssued(challenge()),
            )
            .await
            .unwrap();
        assert_eq!(store.record_failed_attempt(id).await.unwrap(), 1);
        assert_eq!(store.record_failed_attempt(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lookup_by_payment_session() {
        let store = FileOrderStore::in_memory();
        let mut order = sample_order();
        order.method = PaymentMethod::Crypto;
        let id = order.id;
        store.insert(order).await.unwrap();

        store
            .apply(
                id,
                &[OrderStatus::Created],
                OrderEvent::OtpIssued(challenge()),
            )
            .await
            .unwrap();
        store
            .apply(id, &[OrderStatus::OtpPending], OrderEvent::OtpConfirmed)
            .await
            .unwrap();
        store
            .apply(
                id,
                &[OrderStatus::OtpVerified],
                OrderEvent::AuthorizationStarted,
            )
            .await
            .unwrap();
        store
            .apply(
                id,
                &[OrderStatus::PaymentAuthorizing],
                OrderEvent::CryptoSessionOpened {
                    payment_session_id: "ps_42".to_owned(),
                    deposit_address: "addr".to_owned(),
                    redirect_url: "https://pay.example/ps_42".to_owned(),
                    crypto_currency: "BTC".to_owned(),
                },
            )
            .await
            .unwrap();

        let found = store.get_by_payment_session("ps_42").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(store.get_by_payment_session("ps_0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_customer_preserves_created_at() {
        let store = FileOrderStore::in_memory();
        let email = EmailAddress::parse("buyer@example.com").unwrap();
        let first_seen = Utc::now() - chrono::Duration::days(30);
        let customer = Customer {
            email: email.clone(),
            display_name: "Buyer".to_owned(),
            phone: None,
            account_id: "player-1".to_owned(),
            address: None,
            created_at: first_seen,
            updated_at: first_seen,
        };
        store.upsert_customer(customer.clone()).await.unwrap();

        let updated = Customer {
            display_name: "Buyer Prime".to_owned(),
            phone: Some("+1555".to_owned()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            ..customer
        };
        let merged = store.upsert_customer(updated).await.unwrap();
        assert_eq!(merged.created_at, first_seen);
        assert_eq!(merged.display_name, "Buyer Prime");

        let loaded = store.get_customer(&email).await.unwrap().unwrap();
        assert_eq!(loaded, merged);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");

        let order = sample_order();
        let id = order.id;
        {
            let store = FileOrderStore::open(&path).unwrap();
            store.insert(order).await.unwrap();
            store
                .apply(
                    id,
                    &[OrderStatus::Created],
                    OrderEvent::OtpIssued(challenge()),
                )
                .await
                .unwrap();
        }

        let reopened = FileOrderStore::open(&path).unwrap();
        let loaded = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::OtpPending);
        assert!(loaded.otp.is_some());
    }
}
