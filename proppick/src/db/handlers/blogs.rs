//! Database repository for blog posts.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::blogs::{BlogCreateDBRequest, BlogDBResponse, BlogFilter, BlogUpdateDBRequest},
};
use crate::types::{BlogId, UserId, abbrev_uuid};
use chrono::Utc;
use sqlx::{SqliteConnection, types::Json};
use tracing::instrument;
use uuid::Uuid;

pub struct Blogs<'c> {
    db: &'c mut SqliteConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Blogs<'c> {
    type CreateRequest = BlogCreateDBRequest;
    type UpdateRequest = BlogUpdateDBRequest;
    type Response = BlogDBResponse;
    type Id = BlogId;
    type Filter = BlogFilter;

    #[instrument(skip(self, request), fields(added_by = %abbrev_uuid(&request.added_by), sections = request.description.len()), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let now = Utc::now();
        let blog = sqlx::query_as::<_, BlogDBResponse>(
            r#"
            INSERT INTO blogs (id, description, image, added_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Json(&request.description))
        .bind(&request.image)
        .bind(request.added_by)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(blog)
    }

    #[instrument(skip(self), fields(blog_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let blog = sqlx::query_as::<_, BlogDBResponse>("SELECT * FROM blogs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(blog)
    }

    /// Newest first
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let blogs = sqlx::query_as::<_, BlogDBResponse>("SELECT * FROM blogs ORDER BY created_at DESC, id LIMIT ? OFFSET ?")
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(blogs)
    }

    #[instrument(skip(self), fields(blog_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blogs WHERE id = ?").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(blog_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let blog = sqlx::query_as::<_, BlogDBResponse>(
            r#"
            UPDATE blogs SET
                description = COALESCE(?, description),
                image = COALESCE(?, image),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(request.description.as_ref().map(Json))
        .bind(&request.image)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(blog)
    }
}

impl<'c> Blogs<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Image URLs of every post by `user_id`.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn images_added_by(&mut self, user_id: UserId) -> Result<Vec<String>> {
        let images = sqlx::query_scalar::<_, String>("SELECT image FROM blogs WHERE added_by = ?")
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(images)
    }
}
