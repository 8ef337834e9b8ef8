use crate::api::{self, handlers::auth, LogEmailSender};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub otp_ttl_seconds: i64,
    pub otp_resend_cooldown_seconds: i64,
    pub otp_max_attempts: i32,
    pub session_ttl_seconds: i64,
    pub otp_key: SecretString,
    pub session_key: SecretString,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keys stay out of debug output.
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &self.dsn)
            .field("frontend_base_url", &self.frontend_base_url)
            .field("otp_ttl_seconds", &self.otp_ttl_seconds)
            .field(
                "otp_resend_cooldown_seconds",
                &self.otp_resend_cooldown_seconds,
            )
            .field("otp_max_attempts", &self.otp_max_attempts)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .finish_non_exhaustive()
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = auth::AuthConfig::new(args.frontend_base_url)
        .with_otp_ttl_seconds(args.otp_ttl_seconds)
        .with_resend_cooldown_seconds(args.otp_resend_cooldown_seconds)
        .with_otp_max_attempts(args.otp_max_attempts)
        .with_session_ttl_seconds(args.session_ttl_seconds);

    let secrets = auth::AuthSecrets::new(args.otp_key, args.session_key);

    let auth_state = auth::AuthState::new(
        config,
        secrets,
        Arc::new(auth::NoopRateLimiter),
        Arc::new(LogEmailSender),
    );

    api::new(args.port, args.dsn, auth_state).await
}
