//! Status enums for orders, payments, and fulfillment.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// The happy path is `Created → OtpPending → OtpVerified →
/// PaymentAuthorizing → Completed`. Card payments resolve synchronously out
/// of `PaymentAuthorizing`; crypto payments park in `PendingAsync` until a
/// webhook-triggered reconciliation confirms or cancels them. `Failed` is
/// terminal; a customer retries by creating a fresh order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Created,
    OtpPending,
    OtpVerified,
    PaymentAuthorizing,
    PendingAsync,
    Completed,
    Failed,
}

impl OrderStatus {
    /// Statuses this one may transition to.
    ///
    /// This table is the single source of truth for legal transitions; the
    /// order store refuses any status change not listed here (re-entering
    /// the current status is the one allowed exception, used when a fresh
    /// verification code is issued).
    #[must_use]
    pub const fn valid_transitions(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::OtpPending],
            Self::OtpPending => &[Self::OtpVerified, Self::Failed],
            Self::OtpVerified => &[Self::PaymentAuthorizing],
            Self::PaymentAuthorizing => &[Self::Completed, Self::PendingAsync, Self::Failed],
            Self::PendingAsync => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    /// Whether moving to `next` is legal from this status.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Terminal statuses admit no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::OtpPending => write!(f, "otp_pending"),
            Self::OtpVerified => write!(f, "otp_verified"),
            Self::PaymentAuthorizing => write!(f, "payment_authorizing"),
            Self::PendingAsync => write!(f, "pending_async"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "otp_pending" => Ok(Self::OtpPending),
            "otp_verified" => Ok(Self::OtpVerified),
            "payment_authorizing" => Ok(Self::PaymentAuthorizing),
            "pending_async" => Ok(Self::PendingAsync),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// Payment rail chosen at order creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Synchronous capture of an opaque card token.
    Card,
    /// Asynchronous hosted crypto payment session.
    Crypto,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Card => write!(f, "card"),
            Self::Crypto => write!(f, "crypto"),
        }
    }
}

/// Delivery of the purchased coins, tracked separately from payment.
///
/// An operator flips this to `Fulfilled` once the coins are credited;
/// marking an already-fulfilled order again is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    #[default]
    Pending,
    Fulfilled,
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fulfilled => write!(f, "fulfilled"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::OtpPending));
        assert!(OrderStatus::OtpPending.can_transition_to(OrderStatus::OtpVerified));
        assert!(OrderStatus::OtpVerified.can_transition_to(OrderStatus::PaymentAuthorizing));
        assert!(OrderStatus::PaymentAuthorizing.can_transition_to(OrderStatus::Completed));
    }

    #[test]
    fn test_async_path_is_legal() {
        assert!(OrderStatus::PaymentAuthorizing.can_transition_to(OrderStatus::PendingAsync));
        assert!(OrderStatus::PendingAsync.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::PendingAsync.can_transition_to(OrderStatus::Failed));
    }

    #[test]
    fn test_skipping_verification_is_illegal() {
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::OtpVerified));
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::PaymentAuthorizing));
        assert!(!OrderStatus::OtpPending.can_transition_to(OrderStatus::PaymentAuthorizing));
        assert!(!OrderStatus::OtpPending.can_transition_to(OrderStatus::Completed));
    }

    #[test]
    fn test_terminal_states_admit_nothing() {
        for next in [
            OrderStatus::Created,
            OrderStatus::OtpPending,
            OrderStatus::Completed,
            OrderStatus::Failed,
        ] {
            assert!(!OrderStatus::Completed.can_transition_to(next));
            assert!(!OrderStatus::Failed.can_transition_to(next));
        }
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::PendingAsync.is_terminal());
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&OrderStatus::PendingAsync).unwrap();
        assert_eq!(json, "\"pending_async\"");
        assert_eq!(OrderStatus::PendingAsync.to_string(), "pending_async");

        let parsed: OrderStatus = "payment_authorizing".parse().unwrap();
        assert_eq!(parsed, OrderStatus::PaymentAuthorizing);
    }

    #[test]
    fn test_fulfillment_default_is_pending() {
        assert_eq!(FulfillmentStatus::default(), FulfillmentStatus::Pending);
    }
}
