//! Outbox delivery: claim, send, record.
//!
//! ```text
//! dispatcher.tick()
//!   ├─ DB: claim_due()            // lease rows until now + claim_timeout, attempts += 1
//!   └─ for each claimed row:
//!        ├─ mailer.send()
//!        ├─ Ok  → DB: mark_sent()
//!        └─ Err → DB: record_failure()   // reschedule per retry schedule, or give up
//! ```
//!
//! A sender that dies mid-send leaves the lease in place; the row becomes claimable again once
//! the lease runs out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::OutboxConfig;
use crate::db::handlers::EmailOutbox;
use crate::db::models::email_outbox::{OutboxEmailDBResponse, OutboxStatus};
use crate::email::Mailer;
use crate::types::OutboxId;

#[derive(Clone)]
pub struct OutboxDispatcher {
    pool: SqlitePool,
    mailer: Arc<dyn Mailer>,
    poll_interval: Duration,
    retry_schedule: Vec<Duration>,
    claim_batch_size: i64,
    claim_timeout: chrono::Duration,
}

impl OutboxDispatcher {
    pub fn new(pool: SqlitePool, mailer: Arc<dyn Mailer>, config: &OutboxConfig) -> Self {
        Self {
            pool,
            mailer,
            poll_interval: config.poll_interval,
            retry_schedule: config.retry_schedule(),
            claim_batch_size: config.claim_batch_size,
            claim_timeout: chrono::Duration::from_std(config.claim_timeout).unwrap_or(chrono::Duration::minutes(2)),
        }
    }

    /// Try to send one message right away. Returns whether it was sent.
    ///
    /// Called after the transaction that enqueued the message has committed. Failures are
    /// recorded and left to the background loop.
    pub async fn deliver_now(&self, id: OutboxId) -> bool {
        let claimed = {
            let mut conn = match self.pool.acquire().await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, outbox_id = id, "Failed to acquire connection for immediate delivery");
                    return false;
                }
            };
            EmailOutbox::new(&mut conn).claim(id, Utc::now(), self.claim_timeout).await
        };

        match claimed {
            Ok(Some(row)) => self.deliver(row).await,
            Ok(None) => {
                tracing::debug!(outbox_id = id, "Message already claimed or not yet due");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, outbox_id = id, "Failed to claim message for immediate delivery");
                false
            }
        }
    }

    /// Run one dispatch cycle. Returns the number of messages sent.
    pub async fn tick(&self) -> usize {
        tracing::debug!("Outbox dispatcher tick");

        let rows = {
            let mut conn = match self.pool.acquire().await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to acquire connection for outbox claims");
                    return 0;
                }
            };
            match EmailOutbox::new(&mut conn)
                .claim_due(Utc::now(), self.claim_timeout, self.claim_batch_size)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to claim due outbox messages");
                    return 0;
                }
            }
        };

        if rows.is_empty() {
            return 0;
        }
        tracing::debug!(count = rows.len(), "Claimed outbox messages");

        let mut sent = 0;
        for row in rows {
            if self.deliver(row).await {
                sent += 1;
            }
        }
        sent
    }

    async fn deliver(&self, row: OutboxEmailDBResponse) -> bool {
        let result = self.mailer.send(&row.to_address, &row.subject, &row.html_body).await;

        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                // The lease expires and the row is retried, possibly sending twice
                tracing::warn!(error = %e, outbox_id = row.id, "Failed to acquire connection to record delivery");
                return result.is_ok();
            }
        };
        let mut repo = EmailOutbox::new(&mut conn);

        match result {
            Ok(()) => {
                if let Err(e) = repo.mark_sent(row.id, Utc::now()).await {
                    tracing::warn!(error = %e, outbox_id = row.id, "Failed to mark message sent");
                }
                tracing::info!(outbox_id = row.id, attempt = row.attempts, "Email delivered");
                true
            }
            Err(send_error) => {
                let error = send_error.to_string();
                match repo.record_failure(row.id, &error, &self.retry_schedule, Utc::now()).await {
                    Ok(OutboxStatus::Failed) => {
                        tracing::error!(outbox_id = row.id, attempts = row.attempts, error = %error, "Email delivery failed permanently");
                    }
                    Ok(_) => {
                        tracing::warn!(outbox_id = row.id, attempt = row.attempts, error = %error, "Email delivery failed, will retry");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, outbox_id = row.id, "Failed to record delivery failure");
                    }
                }
                false
            }
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(poll_interval = ?self.poll_interval, "Starting outbox dispatcher");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("Outbox dispatcher shutting down");
                    return;
                }
            }

            self.tick().await;
        }
    }
}
