//! Auth-related CLI arguments: server-held keys, windows, and counters.

use anyhow::{Context, Result};
use clap::{Arg, Command};
use secrecy::SecretString;

pub const ARG_OTP_KEY: &str = "otp-key";
pub const ARG_SESSION_KEY: &str = "session-key";

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL, used for the CORS origin")
                .env("VESTIBULE_FRONTEND_BASE_URL")
                .default_value("https://dashboard.vestibule.dev"),
        )
        .arg(
            Arg::new("otp-ttl-seconds")
                .long("otp-ttl-seconds")
                .help("One-time code TTL in seconds")
                .env("VESTIBULE_OTP_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("otp-resend-cooldown-seconds")
                .long("otp-resend-cooldown-seconds")
                .help("Cooldown before a code can be re-sent")
                .env("VESTIBULE_OTP_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("otp-max-attempts")
                .long("otp-max-attempts")
                .help("Verification attempts before a code locks")
                .env("VESTIBULE_OTP_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session token TTL in seconds")
                .env("VESTIBULE_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OTP_KEY)
                .long(ARG_OTP_KEY)
                .help("Server key for one-time code digests")
                .env("VESTIBULE_OTP_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_KEY)
                .long(ARG_SESSION_KEY)
                .help("Server key for session token signatures")
                .env("VESTIBULE_SESSION_KEY")
                .required(true),
        )
}

pub struct Options {
    pub frontend_base_url: String,
    pub otp_ttl_seconds: i64,
    pub otp_resend_cooldown_seconds: i64,
    pub otp_max_attempts: i32,
    pub session_ttl_seconds: i64,
    pub otp_key: SecretString,
    pub session_key: SecretString,
}

impl Options {
    /// Collect the auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let otp_key = matches
            .get_one::<String>(ARG_OTP_KEY)
            .cloned()
            .context("missing required argument: --otp-key")?;
        let session_key = matches
            .get_one::<String>(ARG_SESSION_KEY)
            .cloned()
            .context("missing required argument: --session-key")?;

        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .unwrap_or_else(|| "https://dashboard.vestibule.dev".to_string()),
            otp_ttl_seconds: matches
                .get_one::<i64>("otp-ttl-seconds")
                .copied()
                .unwrap_or(600),
            otp_resend_cooldown_seconds: matches
                .get_one::<i64>("otp-resend-cooldown-seconds")
                .copied()
                .unwrap_or(60),
            otp_max_attempts: matches
                .get_one::<i32>("otp-max-attempts")
                .copied()
                .unwrap_or(5),
            session_ttl_seconds: matches
                .get_one::<i64>("session-ttl-seconds")
                .copied()
                .unwrap_or(604_800),
            otp_key: SecretString::from(otp_key),
            session_key: SecretString::from(session_key),
        })
    }
}
