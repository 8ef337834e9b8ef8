//! Outbound email abstraction.
//!
//! Flows dispatch mail synchronously and observe the result: a failed OTP
//! send surfaces to the caller (the pending row stays in place so a resend
//! reuses the same window), while post-change confirmations are best-effort.
//! The sender decides how to deliver (SMTP, API, etc.); the default for local
//! dev is `LogEmailSender`, which logs the payload and returns `Ok(())`.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction used by the auth flows.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error for the caller to act on.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}

/// A one-time code message for any of the OTP-gated flows.
pub(crate) fn otp_message(
    to_email: &str,
    template: &str,
    code: &str,
    expires_in_minutes: i64,
) -> Result<EmailMessage> {
    let payload = json!({
        "email": to_email,
        "code": code,
        "expires_in_minutes": expires_in_minutes,
    });
    Ok(EmailMessage {
        to_email: to_email.to_string(),
        template: template.to_string(),
        payload_json: serde_json::to_string(&payload).context("failed to serialize email payload")?,
    })
}

/// A post-change confirmation notice (no secrets in the payload).
pub(crate) fn notice_message(to_email: &str, template: &str) -> Result<EmailMessage> {
    let payload = json!({ "email": to_email });
    Ok(EmailMessage {
        to_email: to_email.to_string(),
        template: template.to_string(),
        payload_json: serde_json::to_string(&payload).context("failed to serialize email payload")?,
    })
}
