//! Password hashing.
//!
//! Argon2id with per-hash random salts, stored as PHC strings. Every path
//! that writes `password_hash` goes through here so the stored format stays
//! uniform.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use rand::{rngs::OsRng, RngCore};

/// Hash a password into a PHC string with a fresh random salt.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Verify a password against a stored PHC string.
///
/// Unparseable hashes verify as false rather than erroring; a corrupt stored
/// hash must never let a login through.
pub(super) fn verify_password(phc: &str, password: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() -> Result<()> {
        let phc = hash_password("Password1!")?;
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password(&phc, "Password1!"));
        assert!(!verify_password(&phc, "Password1?"));
        Ok(())
    }

    #[test]
    fn salts_differ_between_hashes() -> Result<()> {
        let first = hash_password("Password1!")?;
        let second = hash_password("Password1!")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn garbage_stored_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "Password1!"));
        assert!(!verify_password("", "Password1!"));
    }
}
