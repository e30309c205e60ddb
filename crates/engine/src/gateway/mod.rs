//! Payment gateway ports and their HTTP adapters.
//!
//! Services talk to [`CardGateway`] and [`CryptoGateway`] only; the concrete
//! clients in [`card`] and [`crypto`] translate those calls into the
//! processors' HTTP APIs. Tests substitute scripted implementations.

use async_trait::async_trait;
use coinforge_core::{EmailAddress, Money, OrderId};
use rust_decimal::Decimal;

use crate::models::Address;

pub mod card;
pub mod crypto;

pub use card::{CardClient, CardGatewayConfig};
pub use crypto::{CryptoClient, CryptoGatewayConfig};

/// One card charge, ready for capture.
///
/// The instrument token is an opaque reference minted by the processor's
/// client-side tokenizer; raw card numbers never reach this system.
#[derive(Debug, Clone)]
pub struct CardChargeRequest {
    pub amount: Money,
    pub order_ref: OrderId,
    pub customer_name: String,
    pub customer_email: EmailAddress,
    pub instrument_token: String,
    pub billing_address: Address,
}

/// Proof of a captured charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardReceipt {
    pub transaction_id: String,
    pub auth_code: String,
}

/// Card processor failures.
#[derive(Debug, thiserror::Error)]
pub enum CardGatewayError {
    /// The processor refused the charge.
    #[error("charge declined: {reason_code}")]
    Declined { reason_code: String },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Synchronous card capture port.
#[async_trait]
pub trait CardGateway: Send + Sync {
    /// Capture the full amount in one step.
    async fn capture(&self, request: &CardChargeRequest) -> Result<CardReceipt, CardGatewayError>;
}

/// A priced conversion offer, valid for a short window.
#[derive(Debug, Clone, PartialEq)]
pub struct CryptoQuote {
    pub quote_id: String,
    pub rate: Decimal,
    pub crypto_amount: Decimal,
}

/// Who is paying, as shown on the processor's hosted page.
#[derive(Debug, Clone)]
pub struct PayerInfo {
    pub name: String,
    pub email: EmailAddress,
}

/// Everything needed to open a hosted payment session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub quote_id: String,
    pub reference: String,
    pub payer: PayerInfo,
    pub webhook_url: String,
    pub success_url: String,
    pub failure_url: String,
}

/// An open hosted payment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoSession {
    pub redirect_url: String,
    pub deposit_address: String,
    pub payment_session_id: String,
}

/// Settlement state of a crypto payment, as the processor reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoPaymentStatus {
    /// Funds arrived and confirmed; safe to complete the order.
    Confirmed,
    /// The payer backed out or the session lapsed; the order fails.
    Cancelled,
    /// Nothing settled yet; ask again later.
    Waiting,
}

/// Crypto processor failures.
#[derive(Debug, thiserror::Error)]
pub enum CryptoGatewayError {
    /// The quote lapsed before the session opened; fetch a fresh one.
    #[error("quote expired")]
    QuoteExpired,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Asynchronous crypto payment port.
#[async_trait]
pub trait CryptoGateway: Send + Sync {
    /// Price `invoice_amount` of `invoice_currency` in `target_currency`.
    async fn quote(
        &self,
        invoice_currency: &str,
        invoice_amount: Decimal,
        target_currency: &str,
    ) -> Result<CryptoQuote, CryptoGatewayError>;

    /// Open a hosted payment session against a live quote.
    async fn start_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CryptoSession, CryptoGatewayError>;

    /// Ask the processor for the authoritative settlement state. Webhook
    /// bodies are hints only; this call is the source of truth.
    async fn check_status(
        &self,
        payment_session_id: &str,
        deposit_address: &str,
        currency: &str,
    ) -> Result<CryptoPaymentStatus, CryptoGatewayError>;
}
