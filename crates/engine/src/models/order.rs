//! Order aggregate and its transition events.

use chrono::{DateTime, Utc};
use coinforge_core::{
    EmailAddress, FulfillmentStatus, Money, OrderId, OrderStatus, PaymentMethod, Rate,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single purchasable position on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    /// Price per unit in the order's currency.
    pub unit_price: Decimal,
    pub quantity: u32,
    /// Coins credited per unit, computed from the applied rate at creation.
    pub coins_per_item: Decimal,
}

impl LineItem {
    /// Line total in the order's currency.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Coins credited for this line.
    #[must_use]
    pub fn coins_subtotal(&self) -> Decimal {
        self.coins_per_item * Decimal::from(self.quantity)
    }
}

/// One-time verification code sub-state. At most one per order; issuing a
/// new code replaces the previous one and resets the attempt counter.
///
/// Only the code's hash is stored; the plaintext exists just long enough to
/// hand to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u8,
    pub verified: bool,
}

impl OtpChallenge {
    /// Whether the code is past its validity window.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Gateway-side identifiers and outcomes correlated with this order.
///
/// Which fields are populated depends on the payment rail and how far the
/// order got; everything here is needed for manual reconciliation, so
/// nothing is ever cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCorrelation {
    /// Card gateway transaction id (synchronous capture).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Card gateway authorization code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,
    /// Crypto gateway payment session id (asynchronous flow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    /// Deposit address shown to the payer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_address: Option<String>,
    /// Hosted payment page the payer was redirected to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Crypto currency the payer settles in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_currency: Option<String>,
    /// Machine-readable decline code from the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    /// Human-readable detail for non-decline failures (timeouts, 5xx).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

/// The order aggregate: one purchase of coins by one customer.
///
/// Orders are financial records and are never deleted. All status changes
/// flow through [`OrderEvent`] applied by the store's compare-and-set, so an
/// order can never hold an illegal combination of status and sub-state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub email: EmailAddress,
    pub items: Vec<LineItem>,
    /// Total charged, fixed at creation.
    pub amount: Money,
    /// Total coins credited on fulfillment, fixed at creation.
    pub coins_total: Decimal,
    /// Rate frozen at creation; later rate changes never touch this order.
    pub applied_rate: Rate,
    pub method: PaymentMethod,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<OtpChallenge>,
    #[serde(default)]
    pub gateway: GatewayCorrelation,
    #[serde(default)]
    pub fulfillment: FulfillmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether the customer has proven control of the order's email.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.otp.as_ref().is_some_and(|otp| otp.verified)
    }

    /// Apply a transition event, moving to its target status.
    ///
    /// Legality of the move is the store's responsibility; this only writes
    /// the fields the event carries.
    pub(crate) fn apply_event(&mut self, event: OrderEvent, now: DateTime<Utc>) {
        let target = event.target();
        match event {
            OrderEvent::OtpIssued(challenge) => {
                self.otp = Some(challenge);
            }
            OrderEvent::OtpConfirmed => {
                if let Some(otp) = self.otp.as_mut() {
                    otp.verified = true;
                    otp.attempts = 0;
                }
            }
            OrderEvent::AuthorizationStarted => {}
            OrderEvent::CardCaptured {
                transaction_id,
                auth_code,
            } => {
                self.gateway.transaction_id = Some(transaction_id);
                self.gateway.auth_code = Some(auth_code);
            }
            OrderEvent::PaymentDeclined { reason_code } => {
                self.gateway.decline_code = Some(reason_code);
            }
            OrderEvent::PaymentErrored { detail } => {
                self.gateway.failure_detail = Some(detail);
            }
            OrderEvent::CryptoSessionOpened {
                payment_session_id,
                deposit_address,
                redirect_url,
                crypto_currency,
            } => {
                self.gateway.payment_session_id = Some(payment_session_id);
                self.gateway.deposit_address = Some(deposit_address);
                self.gateway.redirect_url = Some(redirect_url);
                self.gateway.crypto_currency = Some(crypto_currency);
            }
            OrderEvent::CryptoConfirmed | OrderEvent::CryptoCancelled => {}
        }
        self.status = target;
        self.updated_at = now;
    }
}

/// The only way an order's status changes.
///
/// Each event names its target status; the store applies an event only when
/// the order sits in a caller-expected status and the move is legal per
/// [`OrderStatus::valid_transitions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// A fresh verification code was issued (also re-issues).
    OtpIssued(OtpChallenge),
    /// The customer presented the correct code in time.
    OtpConfirmed,
    /// Payment authorization claimed the order before any gateway call.
    AuthorizationStarted,
    /// Synchronous card capture succeeded.
    CardCaptured {
        transaction_id: String,
        auth_code: String,
    },
    /// The gateway explicitly declined the payment.
    PaymentDeclined { reason_code: String },
    /// The gateway was unreachable or misbehaved; the order fails rather
    /// than staying ambiguous.
    PaymentErrored { detail: String },
    /// A hosted crypto payment session was opened; settlement is now
    /// webhook-driven.
    CryptoSessionOpened {
        payment_session_id: String,
        deposit_address: String,
        redirect_url: String,
        crypto_currency: String,
    },
    /// The crypto gateway confirmed settlement.
    CryptoConfirmed,
    /// The crypto gateway reported the session cancelled.
    CryptoCancelled,
}

impl OrderEvent {
    /// Status the order holds after this event.
    #[must_use]
    pub const fn target(&self) -> OrderStatus {
        match self {
            Self::OtpIssued(_) => OrderStatus::OtpPending,
            Self::OtpConfirmed => OrderStatus::OtpVerified,
            Self::AuthorizationStarted => OrderStatus::PaymentAuthorizing,
            Self::CardCaptured { .. } | Self::CryptoConfirmed => OrderStatus::Completed,
            Self::PaymentDeclined { .. }
            | Self::PaymentErrored { .. }
            | Self::CryptoCancelled => OrderStatus::Failed,
            Self::CryptoSessionOpened { .. } => OrderStatus::PendingAsync,
        }
    }
}
