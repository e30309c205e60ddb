//! Outbound messaging port.
//!
//! Delivery is best-effort everywhere: a committed state change is never
//! rolled back because an email could not be sent. Failures are logged and
//! the caller moves on.

use async_trait::async_trait;
use coinforge_core::{EmailAddress, Money, OrderId, PaymentMethod, Rate};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Messages the engine can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The six-digit verification code, sent to the purchaser.
    VerificationCode { order_id: OrderId, code: String },
    /// Payment receipt for a completed order, sent to the purchaser.
    PaymentReceipt {
        order_id: OrderId,
        amount: Money,
        coins: Decimal,
    },
    /// New completed order alert, sent to the operator inbox.
    NewOrderAlert {
        order_id: OrderId,
        customer: EmailAddress,
        amount: Money,
        method: PaymentMethod,
    },
    /// A rate relevant to the recipient changed. `new_rate` is `None` when
    /// an override was removed.
    RateChanged {
        old_rate: Option<Rate>,
        new_rate: Option<Rate>,
        note: Option<String>,
    },
    /// Coins were credited to the customer's account.
    FulfillmentConfirmed {
        order_id: OrderId,
        coins: Decimal,
        account_id: String,
    },
}

impl Notification {
    /// Stable tag used in logs and message templates.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::VerificationCode { .. } => "verification_code",
            Self::PaymentReceipt { .. } => "payment_receipt",
            Self::NewOrderAlert { .. } => "new_order_alert",
            Self::RateChanged { .. } => "rate_changed",
            Self::FulfillmentConfirmed { .. } => "fulfillment_confirmed",
        }
    }
}

/// Errors from a notification transport.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// The transport could not deliver the message.
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Port for delivering [`Notification`]s.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        recipient: &EmailAddress,
        notification: &Notification,
    ) -> Result<(), NotifierError>;
}

/// Deliver a notification, logging the outcome instead of returning it.
pub async fn send_best_effort(
    notifier: &dyn Notifier,
    recipient: &EmailAddress,
    notification: Notification,
) {
    match notifier.send(recipient, &notification).await {
        Ok(()) => {
            debug!(
                kind = notification.kind(),
                recipient = %recipient,
                "notification sent"
            );
        }
        Err(err) => {
            warn!(
                kind = notification.kind(),
                recipient = %recipient,
                error = %err,
                "notification delivery failed"
            );
        }
    }
}

/// Notifier that only writes to the log. Used when no mail transport is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        recipient: &EmailAddress,
        notification: &Notification,
    ) -> Result<(), NotifierError> {
        info!(
            kind = notification.kind(),
            recipient = %recipient,
            "mail transport disabled; notification logged only"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_always_delivers() {
        let recipient = EmailAddress::parse("buyer@example.com").unwrap();
        let notification = Notification::VerificationCode {
            order_id: OrderId::new(),
            code: "123456".to_owned(),
        };
        assert_eq!(notification.kind(), "verification_code");
        LogNotifier
            .send(&recipient, &notification)
            .await
            .unwrap();
    }
}
