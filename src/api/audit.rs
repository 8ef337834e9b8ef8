//! Best-effort audit event sink.
//!
//! Every terminal flow outcome is recorded with the actor's email, a success
//! flag, and an internal reason code. Recording must never change a flow's
//! result: storage errors are logged and swallowed.

use sqlx::PgPool;
use tracing::{error, Instrument};

pub(crate) async fn record_auth_event(
    pool: &PgPool,
    actor_email: &str,
    action: &str,
    success: bool,
    reason: Option<&str>,
) {
    let query = r"
        INSERT INTO audit_log (actor_email, action, success, reason)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(actor_email)
        .bind(action)
        .bind(success)
        .bind(reason)
        .execute(pool)
        .instrument(span)
        .await;

    if let Err(err) = result {
        error!(action, actor_email, "failed to record audit event: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::record_auth_event;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn recording_never_propagates_storage_errors() -> anyhow::Result<()> {
        // A lazy pool with nothing listening: the insert fails internally
        // and the call still returns.
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost:1/none")?;
        record_auth_event(&pool, "alice@example.com", "login", false, Some("invalid_password"))
            .await;
        Ok(())
    }
}
