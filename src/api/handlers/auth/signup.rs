//! Signup flow: send code, resend, verify, create the account.

use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::audit::record_auth_event;
use crate::token;

use super::challenge::{resend_ready, resend_wait_seconds, Challenge, ChallengeOutcome};
use super::error::FlowError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage;
use super::types::{
    OtpSentResponse, PublicUser, SessionResponse, SignupResendRequest, SignupStartRequest,
    SignupVerifyRequest,
};
use super::utils::{extract_client_ip, normalize_email, redirect_for_role, strong_password, valid_email};
use super::{otp, password, send_otp_email};

const ACTION_START: &str = "signup_start";
const ACTION_RESEND: &str = "signup_resend";
const ACTION_VERIFY: &str = "signup_verify";
const TEMPLATE_SIGNUP_OTP: &str = "signup_otp";

/// Start a signup: validate, stash the pending request, send the code.
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupStartRequest,
    responses(
        (status = 200, description = "Code sent", body = OtpSentResponse),
        (status = 400, description = "Email taken or weak password"),
        (status = 429, description = "Rate limited"),
        (status = 502, description = "Code could not be delivered")
    ),
    tag = "auth"
)]
pub async fn start(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupStartRequest>>,
) -> Result<Json<OtpSentResponse>, FlowError> {
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(FlowError::InvalidRequest("invalid email"));
    }
    let name = request.name.trim();
    if name.is_empty() {
        return Err(FlowError::InvalidRequest("missing name"));
    }
    if !strong_password(&request.password) {
        return Err(FlowError::WeakPassword);
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Signup)
        == RateLimitDecision::Limited
        || state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Signup)
            == RateLimitDecision::Limited
    {
        return Err(FlowError::RateLimited);
    }

    if storage::active_email_taken(&pool, &email).await? {
        record_auth_event(&pool, &email, ACTION_START, false, Some("email_taken")).await;
        return Err(FlowError::EmailTaken);
    }

    // The password is hashed up front and held on the pending row until the
    // mailbox proves control; the raw password is never stored.
    let password_hash = password::hash_password(&request.password)?;
    let code = otp::generate_otp();
    let otp_hash = otp::hash_otp(state.secrets().otp_key(), &code)?;

    let config = state.config();
    let now = Utc::now();
    let pending = storage::PendingSignup {
        email: email.clone(),
        name: name.to_string(),
        password_hash,
        otp_hash,
        attempts_left: config.otp_max_attempts(),
        expires_at: now + Duration::seconds(config.otp_ttl_seconds()),
        resend_at: now + Duration::seconds(config.resend_cooldown_seconds()),
    };
    storage::replace_pending_signup(&pool, &pending).await?;

    // A failed send leaves the pending row in place so a resend reuses the
    // same window.
    send_otp_email(
        &pool,
        state.email_sender(),
        &email,
        TEMPLATE_SIGNUP_OTP,
        &code,
        config.otp_ttl_minutes(),
        ACTION_START,
    )
    .await?;

    record_auth_event(&pool, &email, ACTION_START, true, None).await;
    Ok(Json(OtpSentResponse {
        success: true,
        resend_after_seconds: config.resend_cooldown_seconds(),
        expires_in_minutes: config.otp_ttl_minutes(),
    }))
}

/// Resend the signup code, replacing the pending request.
#[utoipa::path(
    post,
    path = "/v1/auth/signup/resend",
    request_body = SignupResendRequest,
    responses(
        (status = 200, description = "Code re-sent (or cooldown still running)", body = OtpSentResponse),
        (status = 404, description = "No pending signup for this email")
    ),
    tag = "auth"
)]
pub async fn resend(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupResendRequest>>,
) -> Result<Json<OtpSentResponse>, FlowError> {
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(FlowError::InvalidRequest("invalid email"));
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendOtp)
        == RateLimitDecision::Limited
    {
        return Err(FlowError::RateLimited);
    }

    let Some(prior) = storage::get_pending_signup(&pool, &email).await? else {
        record_auth_event(&pool, &email, ACTION_RESEND, false, Some("no_pending_request")).await;
        return Err(FlowError::NoPendingRequest);
    };

    let config = state.config();
    let now = Utc::now();
    if !resend_ready(prior.resend_at, now) {
        // Cooldown still running: no new code, the prior row stays live.
        return Ok(Json(OtpSentResponse {
            success: true,
            resend_after_seconds: resend_wait_seconds(prior.resend_at, now),
            expires_in_minutes: config.otp_ttl_minutes(),
        }));
    }

    let code = otp::generate_otp();
    let pending = storage::PendingSignup {
        email: email.clone(),
        name: prior.name,
        password_hash: prior.password_hash,
        otp_hash: otp::hash_otp(state.secrets().otp_key(), &code)?,
        attempts_left: config.otp_max_attempts(),
        expires_at: now + Duration::seconds(config.otp_ttl_seconds()),
        resend_at: now + Duration::seconds(config.resend_cooldown_seconds()),
    };
    storage::replace_pending_signup(&pool, &pending).await?;

    send_otp_email(
        &pool,
        state.email_sender(),
        &email,
        TEMPLATE_SIGNUP_OTP,
        &code,
        config.otp_ttl_minutes(),
        ACTION_RESEND,
    )
    .await?;

    record_auth_event(&pool, &email, ACTION_RESEND, true, None).await;
    Ok(Json(OtpSentResponse {
        success: true,
        resend_after_seconds: config.resend_cooldown_seconds(),
        expires_in_minutes: config.otp_ttl_minutes(),
    }))
}

/// Verify the signup code and create the account.
#[utoipa::path(
    post,
    path = "/v1/auth/signup/verify",
    request_body = SignupVerifyRequest,
    responses(
        (status = 200, description = "Account created, session issued", body = SessionResponse),
        (status = 400, description = "Invalid, expired, or locked code"),
        (status = 404, description = "No pending signup for this email")
    ),
    tag = "auth"
)]
pub async fn verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupVerifyRequest>>,
) -> Result<Json<SessionResponse>, FlowError> {
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };

    let email = normalize_email(&request.email);
    let code = request.otp.trim();
    if !valid_email(&email) || code.is_empty() {
        return Err(FlowError::InvalidRequest("invalid email or code"));
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyOtp)
        == RateLimitDecision::Limited
    {
        return Err(FlowError::RateLimited);
    }

    let Some(pending) = storage::get_pending_signup(&pool, &email).await? else {
        record_auth_event(&pool, &email, ACTION_VERIFY, false, Some("no_pending_request")).await;
        return Err(FlowError::NoPendingRequest);
    };

    let submitted = otp::hash_otp(state.secrets().otp_key(), code)?;
    let challenge = Challenge {
        otp_hash: &pending.otp_hash,
        attempts_left: pending.attempts_left,
        expires_at: pending.expires_at,
    };
    match challenge.check(&submitted, Utc::now()) {
        ChallengeOutcome::Expired => {
            record_auth_event(&pool, &email, ACTION_VERIFY, false, Some("otp_expired")).await;
            Err(FlowError::OtpExpired)
        }
        ChallengeOutcome::Locked => {
            record_auth_event(&pool, &email, ACTION_VERIFY, false, Some("otp_locked")).await;
            Err(FlowError::OtpLocked)
        }
        ChallengeOutcome::Mismatch => {
            let attempts_left = storage::decrement_signup_attempts(&pool, &email).await?;
            record_auth_event(&pool, &email, ACTION_VERIFY, false, Some("invalid_otp")).await;
            Err(FlowError::InvalidOtp { attempts_left })
        }
        ChallengeOutcome::Verified => {
            let Some(user) =
                storage::insert_user(&pool, &pending.name, &email, &pending.password_hash).await?
            else {
                // The email was claimed while this signup was pending.
                record_auth_event(&pool, &email, ACTION_VERIFY, false, Some("email_taken")).await;
                return Err(FlowError::EmailTaken);
            };
            storage::delete_pending_signup(&pool, &email).await?;

            let claims = token::SessionClaims::new(
                user.id,
                user.email.clone(),
                user.role.clone(),
                Utc::now().timestamp(),
                state.config().session_ttl_seconds(),
            );
            let session_token = token::sign_hs256(state.secrets().session_key(), &claims)
                .map_err(|err| anyhow::anyhow!("failed to sign session token: {err}"))?;

            record_auth_event(&pool, &email, ACTION_VERIFY, true, None).await;
            Ok(Json(SessionResponse {
                success: true,
                token: session_token,
                redirect_to: redirect_for_role(&user.role).to_string(),
                user: PublicUser::from(&user),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::super::state::{AuthConfig, AuthSecrets, AuthState};
    use super::*;
    use crate::api::email::LogEmailSender;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("https://dashboard.example.com".to_string()),
            AuthSecrets::new(
                SecretString::from("test-otp-key".to_string()),
                SecretString::from("test-session-key".to_string()),
            ),
            Arc::new(NoopRateLimiter),
            Arc::new(LogEmailSender),
        ))
    }

    fn lazy_pool() -> anyhow::Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn start_rejects_missing_payload() -> anyhow::Result<()> {
        let result = start(HeaderMap::new(), Extension(lazy_pool()?), Extension(auth_state()), None)
            .await;
        assert!(matches!(result, Err(FlowError::InvalidRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_invalid_email() -> anyhow::Result<()> {
        let result = start(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(SignupStartRequest {
                name: "Alice".to_string(),
                email: "not-an-email".to_string(),
                password: "Password1!".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(FlowError::InvalidRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_weak_password_before_any_state() -> anyhow::Result<()> {
        // The lazy pool has no live server behind it, so reaching the store
        // would fail; a weak password must be rejected before that.
        let result = start(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(SignupStartRequest {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "password".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(FlowError::WeakPassword)));
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_empty_code() -> anyhow::Result<()> {
        let result = verify(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(SignupVerifyRequest {
                email: "alice@example.com".to_string(),
                otp: "  ".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(FlowError::InvalidRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn resend_rejects_invalid_email() -> anyhow::Result<()> {
        let result = resend(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(SignupResendRequest {
                email: "nope".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(FlowError::InvalidRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_otp_error_serializes_attempts_left() -> anyhow::Result<()> {
        let response = FlowError::InvalidOtp { attempts_left: 4 }.into_response();
        let body = response.into_body().collect().await?.to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(value["code"], "INVALID_OTP");
        assert_eq!(value["attempts_left"], 4);
        Ok(())
    }
}
