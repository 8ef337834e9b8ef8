//! Auth configuration, server-held keys, and shared handler state.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::api::email::EmailSender;

use super::rate_limit::RateLimiter;

const DEFAULT_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    otp_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    otp_max_attempts: i32,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_max_attempts(mut self, attempts: i32) -> Self {
        self.otp_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    pub(super) fn otp_ttl_minutes(&self) -> i64 {
        self.otp_ttl_seconds / 60
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(super) fn otp_max_attempts(&self) -> i32 {
        self.otp_max_attempts
    }

    pub(super) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }
}

/// Server-held keys, loaded once at startup and never mutated.
///
/// Rotating the OTP key invalidates every outstanding pending code; rotating
/// the session key invalidates every live session. No versioning scheme
/// exists, so rotation is a deliberate flag-day operation.
pub struct AuthSecrets {
    otp_key: SecretString,
    session_key: SecretString,
}

impl AuthSecrets {
    #[must_use]
    pub fn new(otp_key: SecretString, session_key: SecretString) -> Self {
        Self {
            otp_key,
            session_key,
        }
    }

    pub(crate) fn otp_key(&self) -> &[u8] {
        self.otp_key.expose_secret().as_bytes()
    }

    pub(crate) fn session_key(&self) -> &[u8] {
        self.session_key.expose_secret().as_bytes()
    }
}

pub struct AuthState {
    config: AuthConfig,
    secrets: AuthSecrets,
    rate_limiter: Arc<dyn RateLimiter>,
    email_sender: Arc<dyn EmailSender>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        secrets: AuthSecrets,
        rate_limiter: Arc<dyn RateLimiter>,
        email_sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            secrets,
            rate_limiter,
            email_sender,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn secrets(&self) -> &AuthSecrets {
        &self.secrets
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(super) fn email_sender(&self) -> &dyn EmailSender {
        self.email_sender.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::*;
    use crate::api::email::LogEmailSender;

    fn test_state() -> Arc<AuthState> {
        let config = AuthConfig::new("https://dashboard.example.com".to_string());
        let secrets = AuthSecrets::new(
            SecretString::from("test-otp-key".to_string()),
            SecretString::from("test-session-key".to_string()),
        );
        Arc::new(AuthState::new(
            config,
            secrets,
            Arc::new(NoopRateLimiter),
            Arc::new(LogEmailSender),
        ))
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = AuthConfig::new("https://dashboard.example.com".to_string());
        assert_eq!(config.otp_ttl_seconds(), super::DEFAULT_OTP_TTL_SECONDS);
        assert_eq!(config.otp_ttl_minutes(), 10);
        assert_eq!(
            config.resend_cooldown_seconds(),
            super::DEFAULT_RESEND_COOLDOWN_SECONDS
        );
        assert_eq!(config.otp_max_attempts(), super::DEFAULT_OTP_MAX_ATTEMPTS);
        assert_eq!(
            config.session_ttl_seconds(),
            super::DEFAULT_SESSION_TTL_SECONDS
        );

        let config = config
            .with_otp_ttl_seconds(120)
            .with_resend_cooldown_seconds(30)
            .with_otp_max_attempts(3)
            .with_session_ttl_seconds(3600);
        assert_eq!(config.otp_ttl_seconds(), 120);
        assert_eq!(config.otp_ttl_minutes(), 2);
        assert_eq!(config.resend_cooldown_seconds(), 30);
        assert_eq!(config.otp_max_attempts(), 3);
        assert_eq!(config.session_ttl_seconds(), 3600);
    }

    #[test]
    fn secrets_expose_key_bytes() {
        let state = test_state();
        assert_eq!(state.secrets().otp_key(), b"test-otp-key");
        assert_eq!(state.secrets().session_key(), b"test-session-key");
    }
}
