//! Periodic removal of rows that can no longer be used: spent or expired OTP codes, spent or
//! expired reset tokens, and delivered outbox messages past their retention.
//!
//! Correctness never depends on this running. Expiry is always checked when a code or token is
//! presented; the sweep only keeps the tables small.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::ExpirySweepConfig;
use crate::db::handlers::{EmailOutbox, OtpCodes, PasswordResetTokens};
use crate::errors::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub otp_codes: u64,
    pub reset_tokens: u64,
    pub outbox_messages: u64,
}

/// Run one sweep in a single transaction.
#[instrument(skip(pool), err)]
pub async fn sweep_once(pool: &SqlitePool, outbox_retention: Duration) -> Result<SweepReport> {
    let now = Utc::now();
    let retention = chrono::Duration::from_std(outbox_retention).unwrap_or(chrono::Duration::days(1));

    let mut tx = pool.begin().await.map_err(crate::db::errors::DbError::from)?;
    let report = SweepReport {
        otp_codes: OtpCodes::new(&mut tx).delete_dead(now).await?,
        reset_tokens: PasswordResetTokens::new(&mut tx).delete_dead(now).await?,
        outbox_messages: EmailOutbox::new(&mut tx).delete_sent_before(now - retention).await?,
    };
    tx.commit().await.map_err(crate::db::errors::DbError::from)?;

    Ok(report)
}

pub async fn run_expiry_sweeper(pool: SqlitePool, config: ExpirySweepConfig, shutdown: CancellationToken) {
    tracing::info!(interval = ?config.interval, "Starting expiry sweeper");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Expiry sweeper shutting down");
                return;
            }
        }

        match sweep_once(&pool, config.outbox_retention).await {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(
                    otp_codes = report.otp_codes,
                    reset_tokens = report.reset_tokens,
                    outbox_messages = report.outbox_messages,
                    "Swept expired rows"
                );
            }
            Ok(_) => tracing::debug!("Nothing to sweep"),
            Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
        }
    }
}
