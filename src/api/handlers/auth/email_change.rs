//! Email change flow: prove control of both mailboxes before migrating the
//! account identity.
//!
//! Stages per user id: `verifying_old -> verifying_new -> (commit)`. The two
//! code digests are independent; a compromised "new email" submission alone
//! can never move the account.

use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::audit::record_auth_event;

use super::challenge::{Challenge, ChallengeOutcome};
use super::error::FlowError;
use super::session::authenticate;
use super::state::AuthState;
use super::storage::{self, STAGE_VERIFYING_NEW, STAGE_VERIFYING_OLD};
use super::types::{NewEmailRequest, OkResponse, OtpRequest, OtpSentResponse};
use super::utils::{normalize_email, valid_email};
use super::{otp, send_notice_email, send_otp_email};

const ACTION_START: &str = "email_change_start";
const ACTION_VERIFY_OLD: &str = "email_change_verify_old";
const ACTION_SUBMIT_NEW: &str = "email_change_submit_new";
const ACTION_CONFIRM: &str = "email_change_confirm";
const TEMPLATE_OLD_OTP: &str = "email_change_old_otp";
const TEMPLATE_NEW_OTP: &str = "email_change_new_otp";
const TEMPLATE_CHANGED: &str = "email_changed";

/// Open the flow: send a code to the caller's current address.
#[utoipa::path(
    post,
    path = "/v1/auth/email/otp",
    responses(
        (status = 200, description = "Code sent to the current address", body = OtpSentResponse),
        (status = 401, description = "Missing or invalid session"),
        (status = 502, description = "Code could not be delivered")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn start(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Result<Json<OtpSentResponse>, FlowError> {
    let principal = authenticate(&headers, &state)?;
    let Some(user) = storage::lookup_user_by_id(&pool, principal.user_id).await? else {
        return Err(FlowError::Unauthorized);
    };

    let code = otp::generate_otp();
    let config = state.config();
    let now = Utc::now();
    let pending = storage::PendingEmailChange {
        user_id: user.id,
        old_email: user.email.clone(),
        new_email: None,
        old_otp_hash: otp::hash_otp(state.secrets().otp_key(), &code)?,
        new_otp_hash: None,
        stage: STAGE_VERIFYING_OLD.to_string(),
        attempts_left: config.otp_max_attempts(),
        expires_at: now + Duration::seconds(config.otp_ttl_seconds()),
        resend_at: now + Duration::seconds(config.resend_cooldown_seconds()),
    };
    storage::replace_pending_email_change(&pool, &pending).await?;

    send_otp_email(
        &pool,
        state.email_sender(),
        &user.email,
        TEMPLATE_OLD_OTP,
        &code,
        config.otp_ttl_minutes(),
        ACTION_START,
    )
    .await?;

    record_auth_event(&pool, &user.email, ACTION_START, true, None).await;
    Ok(Json(OtpSentResponse {
        success: true,
        resend_after_seconds: config.resend_cooldown_seconds(),
        expires_in_minutes: config.otp_ttl_minutes(),
    }))
}

/// Verify the code sent to the current address; advances to the second stage.
#[utoipa::path(
    post,
    path = "/v1/auth/email/verify-old",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Current mailbox verified", body = OkResponse),
        (status = 400, description = "Invalid, expired, or locked code"),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "No email change in flight")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn verify_old(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpRequest>>,
) -> Result<Json<OkResponse>, FlowError> {
    let principal = authenticate(&headers, &state)?;
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };
    let code = request.otp.trim();
    if code.is_empty() {
        return Err(FlowError::InvalidRequest("missing code"));
    }

    let Some(pending) = storage::get_pending_email_change(&pool, principal.user_id).await? else {
        record_auth_event(
            &pool,
            &principal.email,
            ACTION_VERIFY_OLD,
            false,
            Some("no_pending_request"),
        )
        .await;
        return Err(FlowError::NoPendingRequest);
    };
    if pending.stage != STAGE_VERIFYING_OLD {
        record_auth_event(
            &pool,
            &pending.old_email,
            ACTION_VERIFY_OLD,
            false,
            Some("wrong_stage"),
        )
        .await;
        return Err(FlowError::WrongStage);
    }

    let submitted = otp::hash_otp(state.secrets().otp_key(), code)?;
    let challenge = Challenge {
        otp_hash: &pending.old_otp_hash,
        attempts_left: pending.attempts_left,
        expires_at: pending.expires_at,
    };
    match challenge.check(&submitted, Utc::now()) {
        ChallengeOutcome::Expired => {
            record_auth_event(
                &pool,
                &pending.old_email,
                ACTION_VERIFY_OLD,
                false,
                Some("otp_expired"),
            )
            .await;
            Err(FlowError::OtpExpired)
        }
        ChallengeOutcome::Locked => {
            record_auth_event(
                &pool,
                &pending.old_email,
                ACTION_VERIFY_OLD,
                false,
                Some("otp_locked"),
            )
            .await;
            Err(FlowError::OtpLocked)
        }
        ChallengeOutcome::Mismatch => {
            let attempts_left =
                storage::decrement_email_change_attempts(&pool, principal.user_id).await?;
            record_auth_event(
                &pool,
                &pending.old_email,
                ACTION_VERIFY_OLD,
                false,
                Some("invalid_otp"),
            )
            .await;
            Err(FlowError::InvalidOtp { attempts_left })
        }
        ChallengeOutcome::Verified => {
            // Attempts and expiry reset for the second mailbox; the row is
            // retained because the new address is not yet known.
            let config = state.config();
            storage::mark_email_change_old_verified(
                &pool,
                principal.user_id,
                config.otp_max_attempts(),
                Utc::now() + Duration::seconds(config.otp_ttl_seconds()),
            )
            .await?;
            record_auth_event(&pool, &pending.old_email, ACTION_VERIFY_OLD, true, None).await;
            Ok(Json(OkResponse::ok()))
        }
    }
}

/// Submit the new address; sends a second, independent code to it.
#[utoipa::path(
    post,
    path = "/v1/auth/email/new",
    request_body = NewEmailRequest,
    responses(
        (status = 200, description = "Code sent to the new address", body = OtpSentResponse),
        (status = 400, description = "Taken or same email, or wrong stage"),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "No email change in flight")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn submit_new(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<NewEmailRequest>>,
) -> Result<Json<OtpSentResponse>, FlowError> {
    let principal = authenticate(&headers, &state)?;
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };

    let new_email = normalize_email(&request.new_email);
    if !valid_email(&new_email) {
        return Err(FlowError::InvalidRequest("invalid email"));
    }

    let Some(user) = storage::lookup_user_by_id(&pool, principal.user_id).await? else {
        return Err(FlowError::Unauthorized);
    };

    let Some(pending) = storage::get_pending_email_change(&pool, user.id).await? else {
        record_auth_event(
            &pool,
            &user.email,
            ACTION_SUBMIT_NEW,
            false,
            Some("no_pending_request"),
        )
        .await;
        return Err(FlowError::NoPendingRequest);
    };
    if pending.stage != STAGE_VERIFYING_NEW {
        record_auth_event(&pool, &user.email, ACTION_SUBMIT_NEW, false, Some("wrong_stage")).await;
        return Err(FlowError::WrongStage);
    }

    // Rejections below leave the row untouched: stage and both digests stay
    // exactly as they were.
    if new_email == normalize_email(&user.email) {
        record_auth_event(&pool, &user.email, ACTION_SUBMIT_NEW, false, Some("same_email")).await;
        return Err(FlowError::SameEmail);
    }
    if storage::email_taken_by_other(&pool, &new_email, user.id).await? {
        record_auth_event(&pool, &user.email, ACTION_SUBMIT_NEW, false, Some("email_taken")).await;
        return Err(FlowError::EmailTaken);
    }

    let code = otp::generate_otp();
    let config = state.config();
    let now = Utc::now();
    storage::store_email_change_new_email(
        &pool,
        user.id,
        &new_email,
        &otp::hash_otp(state.secrets().otp_key(), &code)?,
        config.otp_max_attempts(),
        now + Duration::seconds(config.otp_ttl_seconds()),
        now + Duration::seconds(config.resend_cooldown_seconds()),
    )
    .await?;

    send_otp_email(
        &pool,
        state.email_sender(),
        &new_email,
        TEMPLATE_NEW_OTP,
        &code,
        config.otp_ttl_minutes(),
        ACTION_SUBMIT_NEW,
    )
    .await?;

    record_auth_event(&pool, &user.email, ACTION_SUBMIT_NEW, true, None).await;
    Ok(Json(OtpSentResponse {
        success: true,
        resend_after_seconds: config.resend_cooldown_seconds(),
        expires_in_minutes: config.otp_ttl_minutes(),
    }))
}

/// Verify the code sent to the new address and commit the migration.
#[utoipa::path(
    post,
    path = "/v1/auth/email/confirm",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Email changed", body = OkResponse),
        (status = 400, description = "Invalid, expired, or locked code, or wrong stage"),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "No email change in flight")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn confirm(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpRequest>>,
) -> Result<Json<OkResponse>, FlowError> {
    let principal = authenticate(&headers, &state)?;
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };
    let code = request.otp.trim();
    if code.is_empty() {
        return Err(FlowError::InvalidRequest("missing code"));
    }

    let Some(pending) = storage::get_pending_email_change(&pool, principal.user_id).await? else {
        record_auth_event(
            &pool,
            &principal.email,
            ACTION_CONFIRM,
            false,
            Some("no_pending_request"),
        )
        .await;
        return Err(FlowError::NoPendingRequest);
    };

    // Both the stage and the stage-2 payload must be present; anything else
    // means the flow never reached a confirmable state.
    let (new_email, new_otp_hash) = match (
        pending.stage.as_str(),
        &pending.new_email,
        &pending.new_otp_hash,
    ) {
        (STAGE_VERIFYING_NEW, Some(new_email), Some(new_otp_hash)) => (new_email, new_otp_hash),
        _ => {
            record_auth_event(
                &pool,
                &pending.old_email,
                ACTION_CONFIRM,
                false,
                Some("wrong_stage"),
            )
            .await;
            return Err(FlowError::WrongStage);
        }
    };

    let submitted = otp::hash_otp(state.secrets().otp_key(), code)?;
    let challenge = Challenge {
        otp_hash: new_otp_hash,
        attempts_left: pending.attempts_left,
        expires_at: pending.expires_at,
    };
    match challenge.check(&submitted, Utc::now()) {
        ChallengeOutcome::Expired => {
            record_auth_event(
                &pool,
                &pending.old_email,
                ACTION_CONFIRM,
                false,
                Some("otp_expired"),
            )
            .await;
            Err(FlowError::OtpExpired)
        }
        ChallengeOutcome::Locked => {
            record_auth_event(
                &pool,
                &pending.old_email,
                ACTION_CONFIRM,
                false,
                Some("otp_locked"),
            )
            .await;
            Err(FlowError::OtpLocked)
        }
        ChallengeOutcome::Mismatch => {
            let attempts_left =
                storage::decrement_email_change_attempts(&pool, principal.user_id).await?;
            record_auth_event(
                &pool,
                &pending.old_email,
                ACTION_CONFIRM,
                false,
                Some("invalid_otp"),
            )
            .await;
            Err(FlowError::InvalidOtp { attempts_left })
        }
        ChallengeOutcome::Verified => {
            storage::update_user_email(&pool, principal.user_id, new_email).await?;
            storage::delete_pending_email_change(&pool, principal.user_id).await?;

            // Best effort: the identity already moved; a lost notice must
            // not roll it back.
            send_notice_email(state.email_sender(), new_email, TEMPLATE_CHANGED);

            record_auth_event(&pool, &pending.old_email, ACTION_CONFIRM, true, None).await;
            Ok(Json(OkResponse::ok()))
        }
    }
}
