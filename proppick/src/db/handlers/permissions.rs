//! Database repository for the per-user permission row.

use crate::db::{
    errors::Result,
    models::permissions::{PermissionDBResponse, RoutePermissionSet},
};
use crate::types::{UserId, abbrev_uuid};
use chrono::Utc;
use sqlx::{SqliteConnection, types::Json};
use tracing::instrument;
use uuid::Uuid;

pub struct Permissions<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Permissions<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Insert the permission row for a user. Each user has exactly one.
    #[instrument(skip(self, routes), fields(user_id = %abbrev_uuid(&user_id), routes = routes.0.len()), err)]
    pub async fn create(&mut self, user_id: UserId, routes: &RoutePermissionSet) -> Result<PermissionDBResponse> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, PermissionDBResponse>(
            r#"
            INSERT INTO permissions (id, user_id, routes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(Json(routes))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_for_user(&mut self, user_id: UserId) -> Result<Option<PermissionDBResponse>> {
        let row = sqlx::query_as::<_, PermissionDBResponse>("SELECT * FROM permissions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row)
    }

    /// Overwrite the whole route list. Returns `None` when the user has no row to replace.
    #[instrument(skip(self, routes), fields(user_id = %abbrev_uuid(&user_id), routes = routes.0.len()), err)]
    pub async fn replace_routes(&mut self, user_id: UserId, routes: &RoutePermissionSet) -> Result<Option<PermissionDBResponse>> {
        let row = sqlx::query_as::<_, PermissionDBResponse>(
            r#"
            UPDATE permissions SET routes = ?, updated_at = ?
            WHERE user_id = ?
            RETURNING *
            "#,
        )
        .bind(Json(routes))
        .bind(Utc::now())
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(row)
    }

    pub async fn count(&mut self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM permissions")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}
