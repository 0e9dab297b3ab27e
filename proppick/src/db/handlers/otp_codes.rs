//! Database repository for one-time codes.

use crate::db::{
    errors::Result,
    models::otp_codes::{OtpCodeCreateDBRequest, OtpCodeDBResponse, OtpType},
};
use crate::types::{UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct OtpCodes<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> OtpCodes<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), otp_type = %request.otp_type), err)]
    pub async fn create(&mut self, request: &OtpCodeCreateDBRequest) -> Result<OtpCodeDBResponse> {
        let otp = sqlx::query_as::<_, OtpCodeDBResponse>(
            r#"
            INSERT INTO otp_codes (user_id, code, otp_type, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(request.user_id)
        .bind(&request.code)
        .bind(request.otp_type)
        .bind(request.expires_at)
        .bind(Utc::now())
        .fetch_one(&mut *self.db)
        .await?;
        Ok(otp)
    }

    /// Mark outstanding codes as used. With `otp_type = None` every purpose is invalidated.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn invalidate_outstanding(&mut self, user_id: UserId, otp_type: Option<OtpType>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE otp_codes SET used_at = ?
            WHERE user_id = ? AND used_at IS NULL AND (? IS NULL OR otp_type = ?)
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .bind(otp_type)
        .bind(otp_type)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark the newest unused code matching `(user_id, code, otp_type)` as used and return it.
    ///
    /// Selection and consumption happen in one statement guarded by `used_at IS NULL`, so two
    /// concurrent callers can never both get the row back. Expiry is not checked here; the caller
    /// decides what to do with an expired row (typically roll back and report it).
    #[instrument(skip(self, code), fields(user_id = %abbrev_uuid(&user_id), otp_type = %otp_type), err)]
    pub async fn consume_latest(
        &mut self,
        user_id: UserId,
        code: &str,
        otp_type: OtpType,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpCodeDBResponse>> {
        let otp = sqlx::query_as::<_, OtpCodeDBResponse>(
            r#"
            UPDATE otp_codes SET used_at = ?
            WHERE id = (
                SELECT id FROM otp_codes
                WHERE user_id = ? AND code = ? AND otp_type = ? AND used_at IS NULL
                ORDER BY id DESC
                LIMIT 1
            )
            AND used_at IS NULL
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(code)
        .bind(otp_type)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(otp)
    }

    /// Remove codes that can never be accepted again.
    #[instrument(skip(self), err)]
    pub async fn delete_dead(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM otp_codes WHERE used_at IS NOT NULL OR expires_at <= ?")
            .bind(now)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<OtpCodeDBResponse>> {
        let otps = sqlx::query_as::<_, OtpCodeDBResponse>("SELECT * FROM otp_codes WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(otps)
    }

    pub async fn count(&mut self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM otp_codes")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}
