//! Self-contained session credentials.
//!
//! Sessions are HS256 JWTs signed with a single server-held key; there is no
//! server-side session table, so expiry is the only invalidation and rotating
//! the key invalidates every outstanding token.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTokenHeader {
    pub alg: String,
    pub typ: String,
}

impl SessionTokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried by a session token. The subject is the user id; `email`
/// and `role` are snapshots taken at issuance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    #[must_use]
    pub fn new(sub: Uuid, email: String, role: String, now_unix_seconds: i64, ttl_seconds: i64) -> Self {
        Self {
            sub,
            email,
            role,
            iat: now_unix_seconds,
            exp: now_unix_seconds + ttl_seconds,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Create an HS256 signed session token.
///
/// # Errors
///
/// Returns an error if the key is unusable or claims/header JSON cannot be
/// encoded.
pub fn sign_hs256(key: &[u8], claims: &SessionClaims) -> Result<String, Error> {
    let header_b64 = b64e_json(&SessionTokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an HS256 session token and return its decoded claims.
///
/// The signature is checked before any claim is trusted; expiry is checked
/// even when the signature is valid.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the algorithm is not HS256,
/// - the signature does not verify under `key`,
/// - `exp` is at or before `now_unix_seconds`.
pub fn verify_hs256(token: &str, key: &[u8], now_unix_seconds: i64) -> Result<SessionClaims, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: SessionTokenHeader = b64d_json(header_b64)?;
    if header.alg != "HS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidKey)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: SessionClaims = b64d_json(claims_b64)?;
    if claims.exp <= now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const KEY: &[u8] = b"test-session-signing-key";

    fn test_claims() -> SessionClaims {
        SessionClaims::new(
            Uuid::nil(),
            "alice@example.com".to_string(),
            "viewer".to_string(),
            NOW,
            7 * 24 * 60 * 60,
        )
    }

    #[test]
    fn sign_and_verify_round_trip() -> Result<(), Error> {
        let token = sign_hs256(KEY, &test_claims())?;
        let verified = verify_hs256(&token, KEY, NOW)?;
        assert_eq!(verified, test_claims());
        Ok(())
    }

    #[test]
    fn claims_carry_ttl() {
        let claims = test_claims();
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn rejects_wrong_key() -> Result<(), Error> {
        let token = sign_hs256(KEY, &test_claims())?;
        let result = verify_hs256(&token, b"another-key", NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_tampered_claims() -> Result<(), Error> {
        let token = sign_hs256(KEY, &test_claims())?;
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = b64e_json(&SessionClaims::new(
            Uuid::nil(),
            "alice@example.com".to_string(),
            "admin".to_string(),
            NOW,
            7 * 24 * 60 * 60,
        ))?;
        parts[1] = &forged;
        let forged_token = parts.join(".");
        let result = verify_hs256(&forged_token, KEY, NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_expired_even_with_valid_signature() -> Result<(), Error> {
        let token = sign_hs256(KEY, &test_claims())?;
        let result = verify_hs256(&token, KEY, NOW + 8 * 24 * 60 * 60);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            verify_hs256("only.two", KEY, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_hs256("a.b.c.d", KEY, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_hs256("!!!.###.$$$", KEY, NOW),
            Err(Error::Base64)
        ));
    }

    #[test]
    fn rejects_foreign_algorithm() -> Result<(), Error> {
        let header = SessionTokenHeader {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
        };
        let header_b64 = b64e_json(&header)?;
        let claims_b64 = b64e_json(&test_claims())?;
        let token = format!("{header_b64}.{claims_b64}.AAAA");
        let result = verify_hs256(&token, KEY, NOW);
        assert!(matches!(result, Err(Error::UnsupportedAlg(alg)) if alg == "RS256"));
        Ok(())
    }
}
