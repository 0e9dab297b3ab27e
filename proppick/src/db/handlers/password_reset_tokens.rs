//! Database repository for password reset tokens.

use crate::db::{
    errors::Result,
    models::password_reset_tokens::{PasswordResetTokenCreateDBRequest, PasswordResetTokenDBResponse},
};
use crate::types::{UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;
use uuid::Uuid;

pub struct PasswordResetTokens<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> PasswordResetTokens<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create(&mut self, request: &PasswordResetTokenCreateDBRequest) -> Result<PasswordResetTokenDBResponse> {
        let token = sqlx::query_as::<_, PasswordResetTokenDBResponse>(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.token_hash)
        .bind(request.expires_at)
        .bind(Utc::now())
        .fetch_one(&mut *self.db)
        .await?;
        Ok(token)
    }

    /// Mark every unused token for the user as used.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn invalidate_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE password_reset_tokens SET used_at = ? WHERE user_id = ? AND used_at IS NULL")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Mark the matching unused token as used and return it, in one conditional statement.
    #[instrument(skip(self, token_hash), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn consume(
        &mut self,
        user_id: UserId,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetTokenDBResponse>> {
        let token = sqlx::query_as::<_, PasswordResetTokenDBResponse>(
            r#"
            UPDATE password_reset_tokens SET used_at = ?
            WHERE user_id = ? AND token_hash = ? AND used_at IS NULL
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(token_hash)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(token)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_dead(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM password_reset_tokens WHERE used_at IS NOT NULL OR expires_at <= ?")
            .bind(now)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<PasswordResetTokenDBResponse>> {
        let tokens =
            sqlx::query_as::<_, PasswordResetTokenDBResponse>("SELECT * FROM password_reset_tokens WHERE user_id = ? ORDER BY created_at")
                .bind(user_id)
                .fetch_all(&mut *self.db)
                .await?;
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        handlers::{Repository, Users},
        models::users::{Role, UserCreateDBRequest},
    };
    use chrono::Duration;
    use sqlx::SqlitePool;

    async fn insert_user(conn: &mut SqliteConnection) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                email: format!("{}@example.com", Uuid::new_v4()),
                password_hash: None,
                full_name: "Reset User".to_string(),
                phone: None,
                role: Role::User,
                is_verified: true,
            })
            .await
            .unwrap()
            .id
    }

    fn request(user_id: UserId, hash: &str) -> PasswordResetTokenCreateDBRequest {
        PasswordResetTokenCreateDBRequest {
            user_id,
            token_hash: hash.to_string(),
            expires_at: Utc::now() + Duration::minutes(15),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_only_one_outstanding_token_per_user(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = insert_user(&mut conn).await;
        let mut repo = PasswordResetTokens::new(&mut conn);

        repo.create(&request(user_id, "first")).await.unwrap();
        let err = repo.create(&request(user_id, "second")).await.unwrap_err();
        assert!(err.is_unique_on("password_reset_tokens", "user_id"), "unexpected error: {err:?}");

        assert_eq!(repo.invalidate_for_user(user_id).await.unwrap(), 1);
        repo.create(&request(user_id, "second")).await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_consume_once(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = insert_user(&mut conn).await;
        let mut repo = PasswordResetTokens::new(&mut conn);

        repo.create(&request(user_id, "hash")).await.unwrap();
        assert!(repo.consume(user_id, "hash", Utc::now()).await.unwrap().is_some());
        assert!(repo.consume(user_id, "hash", Utc::now()).await.unwrap().is_none());
        assert!(repo.consume(Uuid::new_v4(), "hash", Utc::now()).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_dead(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = insert_user(&mut conn).await;
        let mut repo = PasswordResetTokens::new(&mut conn);

        repo.create(&request(user_id, "old")).await.unwrap();
        repo.invalidate_for_user(user_id).await.unwrap();
        repo.create(&request(user_id, "new")).await.unwrap();

        assert_eq!(repo.delete_dead(Utc::now()).await.unwrap(), 1);
        let remaining = repo.list_for_user(user_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token_hash, "new");
    }
}
