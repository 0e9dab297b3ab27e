//! Database models for the outbound email outbox.

use crate::types::{OutboxId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone)]
pub struct OutboxEmailCreateDBRequest {
    pub user_id: Option<UserId>,
    pub to_address: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct OutboxEmailDBResponse {
    pub id: OutboxId,
    pub user_id: Option<UserId>,
    pub to_address: String,
    pub subject: String,
    pub html_body: String,
    pub status: OutboxStatus,
    /// Number of delivery attempts started, including the current one once claimed
    pub attempts: i64,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
