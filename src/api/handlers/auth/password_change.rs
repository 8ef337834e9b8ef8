//! Password change (authenticated) and reset (forgot-password) flows.
//!
//! Both variants share the pending shape and the completion checks; they
//! differ only in how the subject is established — verified token claims for
//! the change variant, the submitted email for the reset variant.

use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::audit::record_auth_event;

use super::challenge::{Challenge, ChallengeOutcome};
use super::error::FlowError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::authenticate;
use super::state::AuthState;
use super::storage;
use super::types::{
    ForgotPasswordRequest, OkResponse, OtpSentResponse, PasswordChangeRequest,
    PasswordResetRequest,
};
use super::utils::{extract_client_ip, normalize_email, strong_password, valid_email};
use super::{otp, password, send_notice_email, send_otp_email};

const ACTION_SEND: &str = "password_otp";
const ACTION_CHANGE: &str = "password_change";
const ACTION_FORGOT: &str = "password_forgot";
const ACTION_RESET: &str = "password_reset";
const TEMPLATE_OTP: &str = "password_change_otp";
const TEMPLATE_CHANGED: &str = "password_changed";

/// Replace any pending row for this user and send a fresh code.
async fn issue_password_otp(
    pool: &PgPool,
    state: &AuthState,
    user_id: Uuid,
    email: &str,
    action: &str,
) -> Result<Json<OtpSentResponse>, FlowError> {
    let code = otp::generate_otp();
    let config = state.config();
    let now = Utc::now();
    let pending = storage::PendingPasswordReset {
        email: email.to_string(),
        user_id,
        otp_hash: otp::hash_otp(state.secrets().otp_key(), &code)?,
        attempts_left: config.otp_max_attempts(),
        expires_at: now + Duration::seconds(config.otp_ttl_seconds()),
        resend_at: now + Duration::seconds(config.resend_cooldown_seconds()),
    };
    storage::replace_pending_password_reset(pool, &pending).await?;

    send_otp_email(
        pool,
        state.email_sender(),
        email,
        TEMPLATE_OTP,
        &code,
        config.otp_ttl_minutes(),
        action,
    )
    .await?;

    record_auth_event(pool, email, action, true, None).await;
    Ok(Json(OtpSentResponse {
        success: true,
        resend_after_seconds: config.resend_cooldown_seconds(),
        expires_in_minutes: config.otp_ttl_minutes(),
    }))
}

/// Shared completion: policy check, ordered code checks, then persist.
async fn complete_password_change(
    pool: &PgPool,
    state: &AuthState,
    email: &str,
    code: &str,
    new_password: &str,
    action: &str,
) -> Result<Json<OkResponse>, FlowError> {
    // Policy runs before any state is touched: a weak password must not
    // consume an attempt or reveal whether a pending row exists.
    if !strong_password(new_password) {
        return Err(FlowError::WeakPassword);
    }
    if code.trim().is_empty() {
        return Err(FlowError::InvalidRequest("missing code"));
    }

    let Some(pending) = storage::get_pending_password_reset(pool, email).await? else {
        record_auth_event(pool, email, action, false, Some("no_pending_request")).await;
        return Err(FlowError::NoPendingRequest);
    };

    let submitted = otp::hash_otp(state.secrets().otp_key(), code.trim())?;
    let challenge = Challenge {
        otp_hash: &pending.otp_hash,
        attempts_left: pending.attempts_left,
        expires_at: pending.expires_at,
    };
    match challenge.check(&submitted, Utc::now()) {
        ChallengeOutcome::Expired => {
            record_auth_event(pool, email, action, false, Some("otp_expired")).await;
            Err(FlowError::OtpExpired)
        }
        ChallengeOutcome::Locked => {
            record_auth_event(pool, email, action, false, Some("otp_locked")).await;
            Err(FlowError::OtpLocked)
        }
        ChallengeOutcome::Mismatch => {
            let attempts_left = storage::decrement_password_reset_attempts(pool, email).await?;
            record_auth_event(pool, email, action, false, Some("invalid_otp")).await;
            Err(FlowError::InvalidOtp { attempts_left })
        }
        ChallengeOutcome::Verified => {
            let password_hash = password::hash_password(new_password)?;
            storage::update_user_password(pool, pending.user_id, &password_hash).await?;
            storage::delete_pending_password_reset(pool, email).await?;

            // Best effort: the password is already changed, a lost
            // confirmation must not roll it back.
            send_notice_email(state.email_sender(), email, TEMPLATE_CHANGED);

            record_auth_event(pool, email, action, true, None).await;
            Ok(Json(OkResponse::ok()))
        }
    }
}

/// Send a password-change code to the authenticated caller.
#[utoipa::path(
    post,
    path = "/v1/auth/password/otp",
    responses(
        (status = 200, description = "Code sent", body = OtpSentResponse),
        (status = 401, description = "Missing or invalid session"),
        (status = 502, description = "Code could not be delivered")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn send_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Result<Json<OtpSentResponse>, FlowError> {
    let principal = authenticate(&headers, &state)?;

    // Resolve the subject from the user row, not from the (possibly stale)
    // token snapshot.
    let Some(user) = storage::lookup_user_by_id(&pool, principal.user_id).await? else {
        return Err(FlowError::Unauthorized);
    };

    issue_password_otp(&pool, &state, user.id, &user.email, ACTION_SEND).await
}

/// Verify the code and set the new password for the authenticated caller.
#[utoipa::path(
    post,
    path = "/v1/auth/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed", body = OkResponse),
        (status = 400, description = "Weak password, invalid or expired code"),
        (status = 401, description = "Missing or invalid session")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn change(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordChangeRequest>>,
) -> Result<Json<OkResponse>, FlowError> {
    let principal = authenticate(&headers, &state)?;
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };

    let Some(user) = storage::lookup_user_by_id(&pool, principal.user_id).await? else {
        return Err(FlowError::Unauthorized);
    };

    complete_password_change(
        &pool,
        &state,
        &user.email,
        &request.otp,
        &request.new_password,
        ACTION_CHANGE,
    )
    .await
}

/// Start an anonymous reset. The subject is rejected before any code is
/// generated or sent when the account is missing or inactive.
#[utoipa::path(
    post,
    path = "/v1/auth/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Code sent", body = OtpSentResponse),
        (status = 400, description = "Unknown email"),
        (status = 403, description = "Account inactive"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn forgot(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
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
        .check_ip(client_ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
        || state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ForgotPassword)
            == RateLimitDecision::Limited
    {
        return Err(FlowError::RateLimited);
    }

    let Some(user) = storage::lookup_user_by_email(&pool, &email).await? else {
        record_auth_event(&pool, &email, ACTION_FORGOT, false, Some("user_not_found")).await;
        return Err(FlowError::UserNotFound);
    };
    if !user.is_active() {
        record_auth_event(&pool, &email, ACTION_FORGOT, false, Some("account_inactive")).await;
        return Err(FlowError::AccountInactive);
    }

    issue_password_otp(&pool, &state, user.id, &user.email, ACTION_FORGOT).await
}

/// Complete an anonymous reset with the emailed code.
#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Password reset", body = OkResponse),
        (status = 400, description = "Weak password, invalid or expired code"),
        (status = 404, description = "No pending reset for this email")
    ),
    tag = "auth"
)]
pub async fn reset(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> Result<Json<OkResponse>, FlowError> {
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
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyOtp)
        == RateLimitDecision::Limited
    {
        return Err(FlowError::RateLimited);
    }

    complete_password_change(
        &pool,
        &state,
        &email,
        &request.otp,
        &request.new_password,
        ACTION_RESET,
    )
    .await
}
