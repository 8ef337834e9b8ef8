//! Protocol-visible failure taxonomy for the auth flows.
//!
//! Callers switch on the machine-readable `code`, never on message text.
//! Infrastructure failures collapse into `Internal` and keep their detail in
//! the server log only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("password does not meet the strength policy")]
    WeakPassword,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is not active")]
    AccountInactive,
    #[error("no account with this email")]
    UserNotFound,
    #[error("no pending request for this subject")]
    NoPendingRequest,
    #[error("code has expired")]
    OtpExpired,
    #[error("too many invalid attempts")]
    OtpLocked,
    #[error("invalid code")]
    InvalidOtp { attempts_left: i32 },
    #[error("request is not at this stage")]
    WrongStage,
    #[error("new email matches the current email")]
    SameEmail,
    #[error("missing or invalid session credential")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("could not deliver the code")]
    EmailDeliveryFailed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl FlowError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::WeakPassword => "WEAK_PASSWORD",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountInactive => "ACCOUNT_INACTIVE",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::NoPendingRequest => "NO_PENDING_REQUEST",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::OtpLocked => "OTP_LOCKED",
            Self::InvalidOtp { .. } => "INVALID_OTP",
            Self::WrongStage => "WRONG_STAGE",
            Self::SameEmail => "SAME_EMAIL",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::EmailDeliveryFailed => "EMAIL_DELIVERY_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::EmailTaken
            | Self::WeakPassword
            | Self::InvalidCredentials
            | Self::UserNotFound
            | Self::OtpExpired
            | Self::OtpLocked
            | Self::InvalidOtp { .. }
            | Self::WrongStage
            | Self::SameEmail => StatusCode::BAD_REQUEST,
            Self::AccountInactive => StatusCode::FORBIDDEN,
            Self::NoPendingRequest => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::EmailDeliveryFailed => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            // Detail stays in the log; the caller sees a generic failure.
            error!("internal error in auth flow: {err:#}");
        }

        let mut body = json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Self::InvalidOtp { attempts_left } = &self {
            body["attempts_left"] = json!(attempts_left);
        }
        if let Self::Internal(_) = &self {
            body["message"] = json!("internal error");
        }

        (self.status(), Json(body)).into_response()
    }
}
