//! Verification-code issuance and checking rules.
//!
//! Codes are six digits, live for ten minutes, allow three attempts, and a
//! fresh code cannot be requested within a minute of the last one. Only a
//! digest of the code is stored; the clear text exists just long enough to
//! be delivered.

use chrono::{DateTime, Duration, Utc};
use coinforge_core::OrderId;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::models::OtpChallenge;

/// How long an issued code stays valid.
pub const CODE_TTL_MINUTES: i64 = 10;

/// Failed attempts allowed before the challenge locks.
pub const MAX_ATTEMPTS: u8 = 3;

/// Minimum spacing between two codes for the same order.
pub const REISSUE_COOLDOWN_SECS: i64 = 60;

/// Verification failures, in caller-visible terms.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum OtpError {
    /// No code has been issued for this order yet.
    #[error("no verification code has been issued for this order")]
    NoChallenge,

    /// The code's validity window has passed.
    #[error("verification code has expired")]
    Expired,

    /// The attempt budget is spent; a fresh code is required.
    #[error("too many failed attempts; request a new code")]
    TooManyAttempts,

    /// The supplied code did not match.
    #[error("invalid verification code; {remaining} attempts remaining")]
    InvalidCode { remaining: u8 },

    /// The previous code is too recent to replace.
    #[error("a code was issued recently; retry in {retry_in_secs} seconds")]
    TooSoon { retry_in_secs: i64 },
}

/// A fresh six-digit code.
#[must_use]
pub fn generate_code() -> String {
    rand::rng().random_range(100_000..1_000_000).to_string()
}

/// Digest stored in place of the clear-text code. Salted with the order id
/// so equal codes on different orders hash apart.
#[must_use]
pub fn hash_code(order_id: OrderId, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(order_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the challenge recorded against the order for `code`.
#[must_use]
pub fn new_challenge(order_id: OrderId, code: &str, now: DateTime<Utc>) -> OtpChallenge {
    OtpChallenge {
        code_hash: hash_code(order_id, code),
        issued_at: now,
        expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
        attempts: 0,
        verified: false,
    }
}

/// Seconds until a replacement code may be issued, or `None` once the
/// cooldown has passed.
#[must_use]
pub fn seconds_until_reissue(challenge: &OtpChallenge, now: DateTime<Utc>) -> Option<i64> {
    let ready_at = challenge.issued_at + Duration::seconds(REISSUE_COOLDOWN_SECS);
    let remaining = (ready_at - now).num_seconds();
    (remaining > 0).then_some(remaining)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..64 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(code.chars().next(), Some('0'));
        }
    }

    #[test]
    fn test_hash_is_stable_and_order_scoped() {
        let a = OrderId::new();
        let b = OrderId::new();

        assert_eq!(hash_code(a, "123456"), hash_code(a, "123456"));
        assert_ne!(hash_code(a, "123456"), hash_code(a, "123457"));
        assert_ne!(hash_code(a, "123456"), hash_code(b, "123456"));
    }

    #[test]
    fn test_new_challenge_sets_expiry_ten_minutes_out() {
        let id = OrderId::new();
        let now = Utc::now();
        let challenge = new_challenge(id, "123456", now);

        assert_eq!(challenge.expires_at, now + Duration::minutes(10));
        assert_eq!(challenge.attempts, 0);
        assert!(!challenge.verified);
        assert!(!challenge.is_expired_at(now));
        assert!(challenge.is_expired_at(now + Duration::minutes(10) + Duration::seconds(1)));
    }

    #[test]
    fn test_reissue_cooldown_counts_down() {
        let id = OrderId::new();
        let now = Utc::now();
        let challenge = new_challenge(id, "123456", now);

        assert_eq!(
            seconds_until_reissue(&challenge, now),
            Some(REISSUE_COOLDOWN_SECS)
        );
        assert_eq!(
            seconds_until_reissue(&challenge, now + Duration::seconds(59)),
            Some(1)
        );
        assert_eq!(
            seconds_until_reissue(&challenge, now + Duration::seconds(60)),
            None
        );
    }
}
