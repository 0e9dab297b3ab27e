//! Database repository for the email outbox.
//!
//! Rows move `pending` -> `sent`, or `pending` -> `failed` once the retry schedule is used up.
//! A claim is a lease (`claimed_until`) rather than a lock, so a crashed sender only delays a
//! message until the lease runs out.

use crate::db::{
    errors::{DbError, Result},
    models::email_outbox::{OutboxEmailCreateDBRequest, OutboxEmailDBResponse, OutboxStatus},
};
use crate::types::OutboxId;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct EmailOutbox<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> EmailOutbox<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Persist a message intent, due immediately.
    #[instrument(skip(self, request), fields(subject = %request.subject), err)]
    pub async fn enqueue(&mut self, request: &OutboxEmailCreateDBRequest) -> Result<OutboxEmailDBResponse> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, OutboxEmailDBResponse>(
            r#"
            INSERT INTO email_outbox (user_id, to_address, subject, html_body, status, next_attempt_at, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            RETURNING *
            "#,
        )
        .bind(request.user_id)
        .bind(&request.to_address)
        .bind(&request.subject)
        .bind(&request.html_body)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: OutboxId) -> Result<Option<OutboxEmailDBResponse>> {
        let row = sqlx::query_as::<_, OutboxEmailDBResponse>("SELECT * FROM email_outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row)
    }

    /// Claim one specific message if it is due and not leased. Used for the send right after commit.
    #[instrument(skip(self), err)]
    pub async fn claim(&mut self, id: OutboxId, now: DateTime<Utc>, lease: Duration) -> Result<Option<OutboxEmailDBResponse>> {
        let row = sqlx::query_as::<_, OutboxEmailDBResponse>(
            r#"
            UPDATE email_outbox
            SET claimed_until = ?, attempts = attempts + 1
            WHERE id = ?
              AND status = 'pending'
              AND next_attempt_at <= ?
              AND (claimed_until IS NULL OR claimed_until <= ?)
            RETURNING *
            "#,
        )
        .bind(now + lease)
        .bind(id)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(row)
    }

    /// Claim up to `limit` due messages, oldest first.
    #[instrument(skip(self), err)]
    pub async fn claim_due(&mut self, now: DateTime<Utc>, lease: Duration, limit: i64) -> Result<Vec<OutboxEmailDBResponse>> {
        let rows = sqlx::query_as::<_, OutboxEmailDBResponse>(
            r#"
            UPDATE email_outbox
            SET claimed_until = ?, attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM email_outbox
                WHERE status = 'pending'
                  AND next_attempt_at <= ?
                  AND (claimed_until IS NULL OR claimed_until <= ?)
                ORDER BY next_attempt_at, id
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(now + lease)
        .bind(now)
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), err)]
    pub async fn mark_sent(&mut self, id: OutboxId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE email_outbox SET status = 'sent', sent_at = ?, claimed_until = NULL, last_error = NULL WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Record a failed attempt. `retry_schedule` holds the delay after the 1st, 2nd, ... failure;
    /// once an attempt has no delay left the message is given up on.
    #[instrument(skip(self, error, retry_schedule), err)]
    pub async fn record_failure(
        &mut self,
        id: OutboxId,
        error: &str,
        retry_schedule: &[std::time::Duration],
        now: DateTime<Utc>,
    ) -> Result<OutboxStatus> {
        let attempts = sqlx::query_scalar::<_, i64>("SELECT attempts FROM email_outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?
            .ok_or(DbError::NotFound)?;

        let delay = usize::try_from(attempts - 1).ok().and_then(|i| retry_schedule.get(i));
        let (status, next_attempt_at) = match delay {
            Some(delay) => {
                let delay = Duration::from_std(*delay).map_err(|e| DbError::Other(e.into()))?;
                (OutboxStatus::Pending, now + delay)
            }
            None => (OutboxStatus::Failed, now),
        };

        sqlx::query("UPDATE email_outbox SET status = ?, next_attempt_at = ?, claimed_until = NULL, last_error = ? WHERE id = ?")
            .bind(status)
            .bind(next_attempt_at)
            .bind(error)
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(status)
    }

    /// Drop delivered messages older than `cutoff`; they carry one-time secrets in their bodies.
    #[instrument(skip(self), err)]
    pub async fn delete_sent_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM email_outbox WHERE status = 'sent' AND sent_at <= ?")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_with_status(&mut self, status: OutboxStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM email_outbox WHERE status = ?")
            .bind(status)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}
