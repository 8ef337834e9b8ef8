//! Database helpers for the user table and the pending-request tables.
//!
//! Pending rows are single-flight per subject: `replace_*` deletes any prior
//! row for the subject inside the same transaction that inserts the new one,
//! so at most one live row exists per email or user id. Attempt counters are
//! decremented atomically in SQL and the new value is returned to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Email-change stages; `new_email` and `new_otp_hash` are only populated in
/// the second stage.
pub(super) const STAGE_VERIFYING_OLD: &str = "verifying_old";
pub(super) const STAGE_VERIFYING_NEW: &str = "verifying_new";

pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) name: String,
    pub(super) email: String,
    pub(super) password_hash: String,
    pub(super) role: String,
    pub(super) status: String,
}

impl UserRecord {
    pub(super) fn is_active(&self) -> bool {
        self.status == "active"
    }
}

pub(super) struct PendingSignup {
    pub(super) email: String,
    pub(super) name: String,
    pub(super) password_hash: String,
    pub(super) otp_hash: Vec<u8>,
    pub(super) attempts_left: i32,
    pub(super) expires_at: DateTime<Utc>,
    pub(super) resend_at: DateTime<Utc>,
}

pub(super) struct PendingPasswordReset {
    pub(super) email: String,
    pub(super) user_id: Uuid,
    pub(super) otp_hash: Vec<u8>,
    pub(super) attempts_left: i32,
    pub(super) expires_at: DateTime<Utc>,
    pub(super) resend_at: DateTime<Utc>,
}

pub(super) struct PendingEmailChange {
    pub(super) user_id: Uuid,
    pub(super) old_email: String,
    pub(super) new_email: Option<String>,
    pub(super) old_otp_hash: Vec<u8>,
    pub(super) new_otp_hash: Option<Vec<u8>>,
    pub(super) stage: String,
    pub(super) attempts_left: i32,
    pub(super) expires_at: DateTime<Utc>,
    pub(super) resend_at: DateTime<Utc>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        status: row.get("status"),
    }
}

// --- users ---------------------------------------------------------------

/// Look up a user by normalized email among non-deleted rows.
pub(super) async fn lookup_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, name, email, password_hash, role, status
        FROM users
        WHERE email = $1
          AND NOT deleted
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;
    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn lookup_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, name, email, password_hash, role, status
        FROM users
        WHERE id = $1
          AND NOT deleted
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;
    Ok(row.as_ref().map(user_from_row))
}

/// Whether a non-deleted active account already owns this email (signup
/// uniqueness check).
pub(super) async fn active_email_taken(pool: &PgPool, email: &str) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM users
        WHERE email = $1
          AND NOT deleted
          AND status = 'active'
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check email availability")?;
    Ok(row.is_some())
}

/// Whether any other non-deleted account owns this email (email-change
/// uniqueness check; status does not matter here).
pub(super) async fn email_taken_by_other(
    pool: &PgPool,
    email: &str,
    user_id: Uuid,
) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM users
        WHERE email = $1
          AND NOT deleted
          AND id <> $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check email ownership")?;
    Ok(row.is_some())
}

/// Create the user row at signup completion. Returns `None` when the email
/// was claimed concurrently (unique violation), which callers surface the
/// same way as the pre-check.
pub(super) async fn insert_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<Option<UserRecord>> {
    let query = r"
        INSERT INTO users (name, email, password_hash, role, status)
        VALUES ($1, $2, $3, 'viewer', 'active')
        RETURNING id, name, email, password_hash, role, status
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(Some(user_from_row(&row))),
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(super) async fn touch_last_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET last_login_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update last login timestamp")?;
    Ok(())
}

pub(super) async fn update_user_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

pub(super) async fn update_user_email(pool: &PgPool, user_id: Uuid, email: &str) -> Result<()> {
    let query = r"
        UPDATE users
        SET email = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update user email")?;
    Ok(())
}

// --- pending signups -----------------------------------------------------

/// Replace any pending signup for the email with a fresh row.
pub(super) async fn replace_pending_signup(pool: &PgPool, pending: &PendingSignup) -> Result<()> {
    let mut tx = pool.begin().await.context("begin signup replace")?;

    let query = "DELETE FROM pending_signups WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&pending.email)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete prior pending signup")?;

    let query = r"
        INSERT INTO pending_signups
            (email, name, password_hash, otp_hash, attempts_left, expires_at, resend_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&pending.email)
        .bind(&pending.name)
        .bind(&pending.password_hash)
        .bind(&pending.otp_hash)
        .bind(pending.attempts_left)
        .bind(pending.expires_at)
        .bind(pending.resend_at)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert pending signup")?;

    tx.commit().await.context("commit signup replace")?;
    Ok(())
}

pub(super) async fn get_pending_signup(
    pool: &PgPool,
    email: &str,
) -> Result<Option<PendingSignup>> {
    let query = r"
        SELECT email, name, password_hash, otp_hash, attempts_left, expires_at, resend_at
        FROM pending_signups
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load pending signup")?;

    Ok(row.map(|row| PendingSignup {
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        otp_hash: row.get("otp_hash"),
        attempts_left: row.get("attempts_left"),
        expires_at: row.get("expires_at"),
        resend_at: row.get("resend_at"),
    }))
}

/// Atomic decrement; returns the post-decrement count the caller reports.
pub(super) async fn decrement_signup_attempts(pool: &PgPool, email: &str) -> Result<i32> {
    let query = r"
        UPDATE pending_signups
        SET attempts_left = attempts_left - 1
        WHERE email = $1
        RETURNING attempts_left
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to decrement signup attempts")?;
    Ok(row.get("attempts_left"))
}

pub(super) async fn delete_pending_signup(pool: &PgPool, email: &str) -> Result<()> {
    let query = "DELETE FROM pending_signups WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete pending signup")?;
    Ok(())
}

// --- pending password changes / resets -----------------------------------

/// Replace any pending password change for the email with a fresh row. Both
/// the authenticated and the forgot-password variant key on the (normalized)
/// email; the owning user id is recorded alongside.
pub(super) async fn replace_pending_password_reset(
    pool: &PgPool,
    pending: &PendingPasswordReset,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin password reset replace")?;

    let query = "DELETE FROM pending_password_resets WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&pending.email)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete prior pending password reset")?;

    let query = r"
        INSERT INTO pending_password_resets
            (email, user_id, otp_hash, attempts_left, expires_at, resend_at)
        VALUES ($1, $2, $3, $4, $5, $6)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&pending.email)
        .bind(pending.user_id)
        .bind(&pending.otp_hash)
        .bind(pending.attempts_left)
        .bind(pending.expires_at)
        .bind(pending.resend_at)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert pending password reset")?;

    tx.commit().await.context("commit password reset replace")?;
    Ok(())
}

pub(super) async fn get_pending_password_reset(
    pool: &PgPool,
    email: &str,
) -> Result<Option<PendingPasswordReset>> {
    let query = r"
        SELECT email, user_id, otp_hash, attempts_left, expires_at, resend_at
        FROM pending_password_resets
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load pending password reset")?;

    Ok(row.map(|row| PendingPasswordReset {
        email: row.get("email"),
        user_id: row.get("user_id"),
        otp_hash: row.get("otp_hash"),
        attempts_left: row.get("attempts_left"),
        expires_at: row.get("expires_at"),
        resend_at: row.get("resend_at"),
    }))
}

pub(super) async fn decrement_password_reset_attempts(pool: &PgPool, email: &str) -> Result<i32> {
    let query = r"
        UPDATE pending_password_resets
        SET attempts_left = attempts_left - 1
        WHERE email = $1
        RETURNING attempts_left
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to decrement password reset attempts")?;
    Ok(row.get("attempts_left"))
}

pub(super) async fn delete_pending_password_reset(pool: &PgPool, email: &str) -> Result<()> {
    let query = "DELETE FROM pending_password_resets WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete pending password reset")?;
    Ok(())
}

// --- pending email changes -----------------------------------------------

pub(super) async fn replace_pending_email_change(
    pool: &PgPool,
    pending: &PendingEmailChange,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin email change replace")?;

    let query = "DELETE FROM pending_email_changes WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(pending.user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete prior pending email change")?;

    let query = r"
        INSERT INTO pending_email_changes
            (user_id, old_email, new_email, old_otp_hash, new_otp_hash,
             stage, attempts_left, expires_at, resend_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(pending.user_id)
        .bind(&pending.old_email)
        .bind(&pending.new_email)
        .bind(&pending.old_otp_hash)
        .bind(&pending.new_otp_hash)
        .bind(&pending.stage)
        .bind(pending.attempts_left)
        .bind(pending.expires_at)
        .bind(pending.resend_at)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert pending email change")?;

    tx.commit().await.context("commit email change replace")?;
    Ok(())
}

pub(super) async fn get_pending_email_change(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<PendingEmailChange>> {
    let query = r"
        SELECT user_id, old_email, new_email, old_otp_hash, new_otp_hash,
               stage, attempts_left, expires_at, resend_at
        FROM pending_email_changes
        WHERE user_id = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load pending email change")?;

    Ok(row.map(|row| PendingEmailChange {
        user_id: row.get("user_id"),
        old_email: row.get("old_email"),
        new_email: row.get("new_email"),
        old_otp_hash: row.get("old_otp_hash"),
        new_otp_hash: row.get("new_otp_hash"),
        stage: row.get("stage"),
        attempts_left: row.get("attempts_left"),
        expires_at: row.get("expires_at"),
        resend_at: row.get("resend_at"),
    }))
}

/// Transition `verifying_old -> verifying_new` after the old mailbox proved
/// control. Attempts and expiry are reset; the new email is not yet known.
pub(super) async fn mark_email_change_old_verified(
    pool: &PgPool,
    user_id: Uuid,
    attempts_left: i32,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE pending_email_changes
        SET stage = 'verifying_new',
            attempts_left = $2,
            expires_at = $3
        WHERE user_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(attempts_left)
        .bind(expires_at)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to advance email change stage")?;
    Ok(())
}

/// Record the submitted new address and its own code digest; stage stays
/// `verifying_new`, counters reset for the second mailbox.
pub(super) async fn store_email_change_new_email(
    pool: &PgPool,
    user_id: Uuid,
    new_email: &str,
    new_otp_hash: &[u8],
    attempts_left: i32,
    expires_at: DateTime<Utc>,
    resend_at: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE pending_email_changes
        SET new_email = $2,
            new_otp_hash = $3,
            attempts_left = $4,
            expires_at = $5,
            resend_at = $6
        WHERE user_id = $1
          AND stage = 'verifying_new'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(new_email)
        .bind(new_otp_hash)
        .bind(attempts_left)
        .bind(expires_at)
        .bind(resend_at)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store new email on pending change")?;
    Ok(())
}

pub(super) async fn decrement_email_change_attempts(pool: &PgPool, user_id: Uuid) -> Result<i32> {
    let query = r"
        UPDATE pending_email_changes
        SET attempts_left = attempts_left - 1
        WHERE user_id = $1
        RETURNING attempts_left
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to decrement email change attempts")?;
    Ok(row.get("attempts_left"))
}

pub(super) async fn delete_pending_email_change(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "DELETE FROM pending_email_changes WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete pending email change")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn user_record_active_check() {
        let mut record = UserRecord {
            id: Uuid::nil(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "viewer".to_string(),
            status: "active".to_string(),
        };
        assert!(record.is_active());
        record.status = "inactive".to_string();
        assert!(!record.is_active());
    }

    #[test]
    fn email_change_starts_without_new_email() {
        let pending = PendingEmailChange {
            user_id: Uuid::nil(),
            old_email: "old@example.com".to_string(),
            new_email: None,
            old_otp_hash: vec![1, 2, 3],
            new_otp_hash: None,
            stage: STAGE_VERIFYING_OLD.to_string(),
            attempts_left: 5,
            expires_at: Utc::now() + Duration::minutes(10),
            resend_at: Utc::now() + Duration::seconds(60),
        };
        assert_eq!(pending.stage, "verifying_old");
        assert!(pending.new_email.is_none());
        assert!(pending.new_otp_hash.is_none());
    }
}
