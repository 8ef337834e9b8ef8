//! Bearer credential extraction for authenticated flows.
//!
//! The subject is always taken from verified token claims, never from the
//! request body.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use uuid::Uuid;

use crate::token;

use super::error::FlowError;
use super::state::AuthState;

/// Verified caller identity from the session token.
pub(super) struct Principal {
    pub(super) user_id: Uuid,
    pub(super) email: String,
    pub(super) role: String,
}

/// Verify the bearer token and return the caller's identity.
///
/// Any failure (missing header, malformed token, bad signature, expiry)
/// collapses into `Unauthorized`; the precise cause stays in the log.
pub(super) fn authenticate(headers: &HeaderMap, state: &AuthState) -> Result<Principal, FlowError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(FlowError::Unauthorized)?;

    let claims = token::verify_hs256(bearer, state.secrets().session_key(), Utc::now().timestamp())
        .map_err(|err| {
            tracing::debug!("session token rejected: {err}");
            FlowError::Unauthorized
        })?;

    Ok(Principal {
        user_id: claims.sub,
        email: claims.email,
        role: claims.role,
    })
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::super::state::{AuthConfig, AuthSecrets, AuthState};
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::token::SessionClaims;
    use axum::http::HeaderValue;
    use secrecy::SecretString;
    use std::sync::Arc;

    fn auth_state() -> AuthState {
        AuthState::new(
            AuthConfig::new("https://dashboard.example.com".to_string()),
            AuthSecrets::new(
                SecretString::from("test-otp-key".to_string()),
                SecretString::from("test-session-key".to_string()),
            ),
            Arc::new(NoopRateLimiter),
            Arc::new(LogEmailSender),
        )
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_a_valid_token() -> anyhow::Result<()> {
        let state = auth_state();
        let user_id = Uuid::new_v4();
        let claims = SessionClaims::new(
            user_id,
            "alice@example.com".to_string(),
            "viewer".to_string(),
            Utc::now().timestamp(),
            3600,
        );
        let token = token::sign_hs256(state.secrets().session_key(), &claims)?;

        let principal = authenticate(&bearer_headers(&token), &state)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        assert_eq!(principal.user_id, user_id);
        assert_eq!(principal.email, "alice@example.com");
        assert_eq!(principal.role, "viewer");
        Ok(())
    }

    #[test]
    fn rejects_missing_header() {
        let state = auth_state();
        let result = authenticate(&HeaderMap::new(), &state);
        assert!(matches!(result, Err(FlowError::Unauthorized)));
    }

    #[test]
    fn rejects_garbage_token() {
        let state = auth_state();
        let result = authenticate(&bearer_headers("not-a-token"), &state);
        assert!(matches!(result, Err(FlowError::Unauthorized)));
    }

    #[test]
    fn rejects_expired_token() -> anyhow::Result<()> {
        let state = auth_state();
        let claims = SessionClaims::new(
            Uuid::new_v4(),
            "alice@example.com".to_string(),
            "viewer".to_string(),
            Utc::now().timestamp() - 7200,
            3600,
        );
        let token = token::sign_hs256(state.secrets().session_key(), &claims)?;
        let result = authenticate(&bearer_headers(&token), &state);
        assert!(matches!(result, Err(FlowError::Unauthorized)));
        Ok(())
    }

    #[test]
    fn rejects_token_signed_with_other_key() -> anyhow::Result<()> {
        let state = auth_state();
        let claims = SessionClaims::new(
            Uuid::new_v4(),
            "alice@example.com".to_string(),
            "viewer".to_string(),
            Utc::now().timestamp(),
            3600,
        );
        let token = token::sign_hs256(b"a-different-key", &claims)?;
        let result = authenticate(&bearer_headers(&token), &state);
        assert!(matches!(result, Err(FlowError::Unauthorized)));
        Ok(())
    }
}
