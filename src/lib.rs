//! # Vestibule (OTP-gated identity service)
//!
//! `vestibule` is the authentication and credential-change backend for the
//! dashboard product. It owns the flows with real protocol state:
//! signup-via-OTP, login, password change/reset, and email change.
//!
//! ## Flow model
//!
//! Every flow is an independent HTTP entry point over the same building
//! blocks: a single-row-per-subject pending-request store, keyed one-time
//! code digests, and self-contained session tokens.
//!
//! - **Single flight:** starting a flow for a subject replaces any prior
//!   pending request of that kind, so stale state cannot accumulate.
//! - **Ordered checks:** expiry beats the attempt counter, the counter beats
//!   the code comparison; a correct code never rescues an expired or locked
//!   request.
//! - **Fail closed:** ambiguous state (missing row, unreadable store) always
//!   rejects, never silently succeeds.
//!
//! ## Sessions
//!
//! Sessions are stateless signed tokens with a fixed validity window. There
//! is no revocation list; expiry is the only invalidation, and rotating the
//! signing key invalidates every live session at once.

pub mod api;
pub mod cli;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
