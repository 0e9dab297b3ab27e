//! Database models for password reset tokens.

use crate::types::{ResetTokenId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Only the SHA-256 fingerprint of the token is stored; the raw value lives in the emailed link.
#[derive(Debug, Clone)]
pub struct PasswordResetTokenCreateDBRequest {
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetTokenDBResponse {
    pub id: ResetTokenId,
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetTokenDBResponse {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
