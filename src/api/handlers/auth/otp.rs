//! One-time code generation and keyed digests.
//!
//! Codes are short-lived and attempt-limited, so they are stored as a fast
//! keyed HMAC-SHA256 digest rather than an adaptive hash. The raw code is
//! only ever sent to the user; the database sees the digest.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Width of generated codes in decimal digits.
pub(super) const OTP_DIGITS: u32 = 6;

/// Generate a fixed-width numeric code, uniform over the digit space.
pub(super) fn generate_otp() -> String {
    let bound = 10u32.pow(OTP_DIGITS);
    let value = OsRng.gen_range(0..bound);
    format!("{value:0width$}", width = OTP_DIGITS as usize)
}

/// Digest a code under the server-held OTP key.
///
/// Deterministic per (key, code); rotating the key invalidates every
/// outstanding code.
pub(super) fn hash_otp(key: &[u8], code: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).context("invalid OTP key")?;
    mac.update(code.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_fixed_width_digits() {
        for _ in 0..32 {
            let code = generate_otp();
            assert_eq!(code.len(), OTP_DIGITS as usize);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_otp_stable_per_key() -> anyhow::Result<()> {
        let first = hash_otp(b"server-key", "123456")?;
        let second = hash_otp(b"server-key", "123456")?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn hash_otp_diverges_across_keys_and_codes() -> anyhow::Result<()> {
        let base = hash_otp(b"server-key", "123456")?;
        assert_ne!(base, hash_otp(b"other-key", "123456")?);
        assert_ne!(base, hash_otp(b"server-key", "654321")?);
        Ok(())
    }

    #[test]
    fn digest_is_sha256_sized() -> anyhow::Result<()> {
        assert_eq!(hash_otp(b"k", "000000")?.len(), 32);
        Ok(())
    }
}
