//! Login flow: credential check, status gating, session issuance.
//!
//! A missing account and a wrong password collapse into one externally
//! visible error so login cannot be used to probe which emails exist; the
//! precise reason is still recorded for operators.

use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::audit::record_auth_event;
use crate::token;

use super::error::FlowError;
use super::password::verify_password;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage;
use super::types::{LoginRequest, PublicUser, SessionResponse};
use super::utils::{extract_client_ip, normalize_email, redirect_for_role, valid_email};

const ACTION_LOGIN: &str = "login";

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 400, description = "Wrong credentials"),
        (status = 403, description = "Account inactive"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<SessionResponse>, FlowError> {
    let Some(Json(request)) = payload else {
        return Err(FlowError::InvalidRequest("missing payload"));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return Err(FlowError::InvalidRequest("missing credentials"));
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
        || state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Login)
            == RateLimitDecision::Limited
    {
        return Err(FlowError::RateLimited);
    }

    let Some(user) = storage::lookup_user_by_email(&pool, &email).await? else {
        record_auth_event(&pool, &email, ACTION_LOGIN, false, Some("user_not_found")).await;
        return Err(FlowError::InvalidCredentials);
    };

    if !user.is_active() {
        record_auth_event(&pool, &email, ACTION_LOGIN, false, Some("account_inactive")).await;
        return Err(FlowError::AccountInactive);
    }

    if !verify_password(&user.password_hash, &request.password) {
        record_auth_event(&pool, &email, ACTION_LOGIN, false, Some("invalid_password")).await;
        return Err(FlowError::InvalidCredentials);
    }

    storage::touch_last_login(&pool, user.id).await?;

    let claims = token::SessionClaims::new(
        user.id,
        user.email.clone(),
        user.role.clone(),
        Utc::now().timestamp(),
        state.config().session_ttl_seconds(),
    );
    let session_token = token::sign_hs256(state.secrets().session_key(), &claims)
        .map_err(|err| anyhow::anyhow!("failed to sign session token: {err}"))?;

    record_auth_event(&pool, &email, ACTION_LOGIN, true, None).await;
    Ok(Json(SessionResponse {
        success: true,
        token: session_token,
        redirect_to: redirect_for_role(&user.role).to_string(),
        user: PublicUser::from(&user),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::super::state::{AuthConfig, AuthSecrets, AuthState};
    use super::*;
    use crate::api::email::LogEmailSender;
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
    async fn login_rejects_missing_payload() -> anyhow::Result<()> {
        let result = login(HeaderMap::new(), Extension(lazy_pool()?), Extension(auth_state()), None)
            .await;
        assert!(matches!(result, Err(FlowError::InvalidRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn login_rejects_empty_password() -> anyhow::Result<()> {
        let result = login(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                email: "alice@example.com".to_string(),
                password: String::new(),
            })),
        )
        .await;
        assert!(matches!(result, Err(FlowError::InvalidRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn login_rejects_malformed_email() -> anyhow::Result<()> {
        let result = login(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                email: "not-an-email".to_string(),
                password: "Password1!".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(FlowError::InvalidRequest(_))));
        Ok(())
    }
}
