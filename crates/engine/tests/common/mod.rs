#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

//! Shared fixtures: scripted gateways, a recording notifier, and a fully
//! wired engine over in-memory stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coinforge_core::{CurrencyCode, EmailAddress, PaymentMethod, Rate};
use coinforge_engine::gateway::{
    CardChargeRequest, CardGateway, CardGatewayError, CardReceipt, CryptoGateway,
    CryptoGatewayError, CryptoPaymentStatus, CryptoQuote, CryptoSession, SessionRequest,
};
use coinforge_engine::models::{Address, Order};
use coinforge_engine::notify::{Notification, Notifier, NotifierError};
use coinforge_engine::services::{
    CheckoutUrls, CreateOrderRequest, CustomerDetails, LineItemRequest, OrderService, RateCache,
    RateService,
};
use coinforge_engine::store::{FileOrderStore, FileRateStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Scripted card gateway
// =============================================================================

/// What the scripted card gateway should do with every capture.
#[derive(Debug, Clone, Copy)]
pub enum CardOutcome {
    Approve,
    Decline(&'static str),
    Unavailable,
}

pub struct MockCardGateway {
    outcome: CardOutcome,
    pub calls: AtomicUsize,
}

impl MockCardGateway {
    pub fn new(outcome: CardOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CardGateway for MockCardGateway {
    async fn capture(&self, _request: &CardChargeRequest) -> Result<CardReceipt, CardGatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            CardOutcome::Approve => Ok(CardReceipt {
                transaction_id: "txn_1001".to_owned(),
                auth_code: "AUTH99".to_owned(),
            }),
            CardOutcome::Decline(reason_code) => Err(CardGatewayError::Declined {
                reason_code: reason_code.to_owned(),
            }),
            CardOutcome::Unavailable => Err(CardGatewayError::Api {
                status: 503,
                message: "processor offline".to_owned(),
            }),
        }
    }
}

// =============================================================================
// Scripted crypto gateway
// =============================================================================

pub struct MockCryptoGateway {
    status: Mutex<CryptoPaymentStatus>,
    pub quote_calls: AtomicUsize,
    pub session_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    expire_first_session: AtomicBool,
}

impl Default for MockCryptoGateway {
    fn default() -> Self {
        Self {
            status: Mutex::new(CryptoPaymentStatus::Waiting),
            quote_calls: AtomicUsize::new(0),
            session_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            expire_first_session: AtomicBool::new(false),
        }
    }
}

impl MockCryptoGateway {
    /// Script what `check_status` reports from now on.
    pub fn set_status(&self, status: CryptoPaymentStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Make the first `start_session` fail with a lapsed quote.
    pub fn expire_first_session(&self) {
        self.expire_first_session.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CryptoGateway for MockCryptoGateway {
    async fn quote(
        &self,
        _invoice_currency: &str,
        invoice_amount: Decimal,
        _target_currency: &str,
    ) -> Result<CryptoQuote, CryptoGatewayError> {
        let n = self.quote_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CryptoQuote {
            quote_id: format!("q_{n}"),
            rate: dec!(43000),
            crypto_amount: invoice_amount / dec!(43000),
        })
    }

    async fn start_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CryptoSession, CryptoGatewayError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        if self.expire_first_session.swap(false, Ordering::SeqCst) {
            return Err(CryptoGatewayError::QuoteExpired);
        }
        Ok(CryptoSession {
            redirect_url: format!("https://pay.example/session/{}", request.quote_id),
            deposit_address: "bc1qscripted".to_owned(),
            payment_session_id: "cs_1".to_owned(),
        })
    }

    async fn check_status(
        &self,
        _payment_session_id: &str,
        _deposit_address: &str,
        _currency: &str,
    ) -> Result<CryptoPaymentStatus, CryptoGatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.status.lock().unwrap())
    }
}

// =============================================================================
// Recording notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(EmailAddress, Notification)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(EmailAddress, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    /// The code from the most recent verification message.
    pub fn latest_code(&self) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find_map(|(_, notification)| match notification {
                Notification::VerificationCode { code, .. } => Some(code),
                _ => None,
            })
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.sent()
            .iter()
            .filter(|(_, n)| n.kind() == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipient: &EmailAddress,
        notification: &Notification,
    ) -> Result<(), NotifierError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.clone(), notification.clone()));
        Ok(())
    }
}

// =============================================================================
// Wired engine
// =============================================================================

pub struct Harness {
    pub orders: OrderService,
    pub rates: RateService,
    pub order_store: Arc<FileOrderStore>,
    pub rate_store: Arc<FileRateStore>,
    pub card: Arc<MockCardGateway>,
    pub crypto: Arc<MockCryptoGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn admin_email() -> EmailAddress {
    EmailAddress::parse("ops@example.com").unwrap()
}

pub fn global_rate() -> Rate {
    Rate::new(dec!(87)).unwrap()
}

/// Engine over in-memory stores with an approving card gateway.
pub fn harness() -> Harness {
    harness_with_card(CardOutcome::Approve)
}

pub fn harness_with_card(outcome: CardOutcome) -> Harness {
    let order_store = Arc::new(FileOrderStore::in_memory());
    let rate_store = Arc::new(FileRateStore::in_memory(global_rate()));
    let notifier = Arc::new(RecordingNotifier::default());
    let card = Arc::new(MockCardGateway::new(outcome));
    let crypto = Arc::new(MockCryptoGateway::default());

    let rates = RateService::new(
        rate_store.clone(),
        RateCache::new(Duration::from_secs(60)),
        notifier.clone(),
        admin_email(),
    );
    let orders = OrderService::new(
        order_store.clone(),
        rates.clone(),
        card.clone(),
        crypto.clone(),
        notifier.clone(),
        CheckoutUrls {
            webhook_url: "https://shop.example/webhooks/crypto".to_owned(),
            success_url: "https://shop.example/checkout/success".to_owned(),
            failure_url: "https://shop.example/checkout/failure".to_owned(),
        },
        admin_email(),
    );

    Harness {
        orders,
        rates,
        order_store,
        rate_store,
        card,
        crypto,
        notifier,
    }
}

impl Harness {
    /// Create an order, walk it through verification, and return it in
    /// `OtpVerified`.
    pub async fn verified_order(&self, email: &str, method: PaymentMethod) -> Order {
        let order = self.orders.create_order(purchase(email, method)).await.unwrap();
        self.orders.request_verification(order.id).await.unwrap();
        let code = self.notifier.latest_code().unwrap();
        self.orders.verify_otp(order.id, &code).await.unwrap()
    }
}

pub fn billing_address() -> Address {
    Address {
        line1: "1 Test Street".to_owned(),
        line2: None,
        city: "Testville".to_owned(),
        region: Some("CA".to_owned()),
        postal_code: "90210".to_owned(),
        country: "US".to_owned(),
    }
}

/// A single-item $20.00 purchase.
pub fn purchase(email: &str, method: PaymentMethod) -> CreateOrderRequest {
    purchase_for(email, method, dec!(20))
}

pub fn purchase_for(email: &str, method: PaymentMethod, unit_price: Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        customer: CustomerDetails {
            email: email.to_owned(),
            display_name: "Test Buyer".to_owned(),
            phone: None,
            account_id: "player-77".to_owned(),
            address: None,
        },
        items: vec![LineItemRequest {
            name: "Coin pack".to_owned(),
            unit_price,
            quantity: 1,
        }],
        method,
        currency: CurrencyCode::USD,
    }
}
