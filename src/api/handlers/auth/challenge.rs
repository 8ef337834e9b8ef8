//! Ordered checks shared by every code-verification step.
//!
//! All three pending-request kinds reduce to the same shape here. The check
//! order is load-bearing: expiry wins over the attempt counter, and the
//! counter wins over the comparison, so a correct code can never rescue an
//! expired or locked request.

use chrono::{DateTime, Utc};

/// Snapshot of a pending row's verification-relevant fields.
pub(super) struct Challenge<'a> {
    pub otp_hash: &'a [u8],
    pub attempts_left: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum ChallengeOutcome {
    Verified,
    Expired,
    Locked,
    Mismatch,
}

impl Challenge<'_> {
    /// Run the ordered checks against a submitted digest.
    ///
    /// On `Mismatch` the caller performs the atomic decrement and reports
    /// the count the store returns.
    pub(super) fn check(&self, submitted_hash: &[u8], now: DateTime<Utc>) -> ChallengeOutcome {
        if now > self.expires_at {
            return ChallengeOutcome::Expired;
        }
        if self.attempts_left <= 0 {
            return ChallengeOutcome::Locked;
        }
        if self.otp_hash != submitted_hash {
            return ChallengeOutcome::Mismatch;
        }
        ChallengeOutcome::Verified
    }
}

/// Whether the cooldown window for a resend has elapsed.
pub(super) fn resend_ready(resend_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= resend_at
}

/// Seconds left before a resend is accepted, clamped at zero.
pub(super) fn resend_wait_seconds(resend_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (resend_at - now).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn challenge(hash: &[u8], attempts_left: i32, expires_in: Duration) -> Challenge<'_> {
        Challenge {
            otp_hash: hash,
            attempts_left,
            expires_at: now() + expires_in,
        }
    }

    #[test]
    fn correct_digest_verifies() {
        let c = challenge(b"digest", 5, Duration::minutes(10));
        assert_eq!(c.check(b"digest", now()), ChallengeOutcome::Verified);
    }

    #[test]
    fn wrong_digest_is_a_mismatch() {
        let c = challenge(b"digest", 5, Duration::minutes(10));
        assert_eq!(c.check(b"other", now()), ChallengeOutcome::Mismatch);
    }

    #[test]
    fn expiry_wins_even_with_attempts_and_correct_digest() {
        let c = challenge(b"digest", 5, Duration::minutes(-1));
        assert_eq!(c.check(b"digest", now()), ChallengeOutcome::Expired);
    }

    #[test]
    fn locked_wins_even_with_correct_digest() {
        let c = challenge(b"digest", 0, Duration::minutes(10));
        assert_eq!(c.check(b"digest", now()), ChallengeOutcome::Locked);
        let c = challenge(b"digest", -1, Duration::minutes(10));
        assert_eq!(c.check(b"digest", now()), ChallengeOutcome::Locked);
    }

    #[test]
    fn expiry_checked_before_lock() {
        let c = challenge(b"digest", 0, Duration::minutes(-1));
        assert_eq!(c.check(b"digest", now()), ChallengeOutcome::Expired);
    }

    #[test]
    fn boundary_instant_is_not_expired() {
        let c = challenge(b"digest", 1, Duration::zero());
        assert_eq!(c.check(b"digest", now()), ChallengeOutcome::Verified);
    }

    #[test]
    fn resend_gate() {
        assert!(!resend_ready(now() + Duration::seconds(30), now()));
        assert!(resend_ready(now(), now()));
        assert!(resend_ready(now() - Duration::seconds(1), now()));
    }

    #[test]
    fn resend_wait_clamps_at_zero() {
        assert_eq!(resend_wait_seconds(now() + Duration::seconds(42), now()), 42);
        assert_eq!(resend_wait_seconds(now() - Duration::seconds(5), now()), 0);
    }
}
