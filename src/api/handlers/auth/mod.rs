//! Auth handlers and supporting modules.
//!
//! Every flow is an independent entry point over the same building blocks:
//! the pending-request store, the keyed code digests, and the session token
//! signer. Flows never call each other.
//!
//! ## Keys
//!
//! Two server-held keys are loaded once at startup: one for code digests,
//! one for session token signatures. All instances must share them.
//!
//! > **Warning:** Rotating the OTP key invalidates every pending code;
//! > rotating the session key invalidates every live session.

use sqlx::PgPool;
use tracing::error;

use crate::api::audit::record_auth_event;
use crate::api::email::{notice_message, otp_message, EmailSender};

mod challenge;
pub(crate) mod email_change;
mod error;
pub(crate) mod login;
mod otp;
mod password;
pub(crate) mod password_change;
mod rate_limit;
pub(crate) mod session;
pub(crate) mod signup;
mod state;
mod storage;
pub(crate) mod types;
mod utils;

pub use error::FlowError;
pub use rate_limit::NoopRateLimiter;
pub use state::{AuthConfig, AuthSecrets, AuthState};

/// Dispatch a one-time code and surface delivery failure to the caller.
///
/// The pending row is deliberately left in place on failure so a resend
/// reuses the existing expiry/cooldown window.
pub(super) async fn send_otp_email(
    pool: &PgPool,
    sender: &dyn EmailSender,
    to_email: &str,
    template: &str,
    code: &str,
    expires_in_minutes: i64,
    action: &str,
) -> Result<(), FlowError> {
    let message = otp_message(to_email, template, code, expires_in_minutes)?;
    if let Err(err) = sender.send(&message) {
        error!(to_email, template, "failed to deliver code: {err:#}");
        record_auth_event(pool, to_email, action, false, Some("email_delivery_failed")).await;
        return Err(FlowError::EmailDeliveryFailed);
    }
    Ok(())
}

/// Dispatch a post-change confirmation notice, best effort.
pub(super) fn send_notice_email(sender: &dyn EmailSender, to_email: &str, template: &str) {
    match notice_message(to_email, template) {
        Ok(message) => {
            if let Err(err) = sender.send(&message) {
                error!(to_email, template, "failed to deliver notice: {err:#}");
            }
        }
        Err(err) => error!(to_email, template, "failed to build notice: {err:#}"),
    }
}
