//! Database models for one-time codes.

use crate::types::{OtpId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;

/// What a code proves control of the mailbox for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpType {
    Register,
    ResetPassword,
}

impl fmt::Display for OtpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtpType::Register => write!(f, "register"),
            OtpType::ResetPassword => write!(f, "reset_password"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OtpCodeCreateDBRequest {
    pub user_id: UserId,
    pub code: String,
    pub otp_type: OtpType,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OtpCodeDBResponse {
    pub id: OtpId,
    pub user_id: UserId,
    pub code: String,
    pub otp_type: OtpType,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OtpCodeDBResponse {
    /// The validity window is half-open: a code is dead from `expires_at` onwards.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
