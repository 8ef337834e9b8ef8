//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    // Validate key material beyond clap's presence checks
    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        otp_ttl_seconds: auth_opts.otp_ttl_seconds,
        otp_resend_cooldown_seconds: auth_opts.otp_resend_cooldown_seconds,
        otp_max_attempts: auth_opts.otp_max_attempts,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        otp_key: auth_opts.otp_key,
        session_key: auth_opts.session_key,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;
    use secrecy::ExposeSecret;

    #[test]
    fn builds_server_action_from_matches() -> Result<()> {
        temp_env::with_vars([("VESTIBULE_LOG_LEVEL", None::<&str>)], || {
            let command = crate::cli::commands::new();
            let matches = command.get_matches_from(vec![
                "vestibule",
                "--dsn",
                "postgres://user@localhost:5432/vestibule",
                "--otp-key",
                "otp-key-0123456789abcdef",
                "--session-key",
                "session-key-0123456789abcdef",
                "--otp-max-attempts",
                "3",
            ]);
            let Action::Server(args) = handler(&matches)?;
            assert_eq!(args.port, 8080);
            assert_eq!(args.dsn, "postgres://user@localhost:5432/vestibule");
            assert_eq!(args.otp_max_attempts, 3);
            assert_eq!(args.otp_ttl_seconds, 600);
            assert_eq!(args.session_ttl_seconds, 604_800);
            assert_eq!(args.otp_key.expose_secret(), "otp-key-0123456789abcdef");
            Ok(())
        })
    }

    #[test]
    fn short_otp_key_rejected() {
        let command = crate::cli::commands::new();
        let matches = command.get_matches_from(vec![
            "vestibule",
            "--dsn",
            "postgres://user@localhost:5432/vestibule",
            "--otp-key",
            "short",
            "--session-key",
            "session-key-0123456789abcdef",
        ]);
        let result = handler(&matches);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("at least 16 bytes"));
        }
    }
}
