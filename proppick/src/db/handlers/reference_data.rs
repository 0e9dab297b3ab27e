//! Database repository for amenities, categories and statuses.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::reference_data::{
        ReferenceEntryCreateDBRequest, ReferenceEntryDBResponse, ReferenceEntryFilter, ReferenceEntryUpdateDBRequest, ReferenceKind,
    },
};
use crate::types::{ReferenceEntryId, abbrev_uuid};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;
use uuid::Uuid;

pub struct ReferenceData<'c> {
    db: &'c mut SqliteConnection,
    kind: ReferenceKind,
}

impl<'c> ReferenceData<'c> {
    pub fn new(db: &'c mut SqliteConnection, kind: ReferenceKind) -> Self {
        Self { db, kind }
    }
}

// Table names come from `ReferenceKind::table`, never from input.
#[async_trait::async_trait]
impl<'c> Repository for ReferenceData<'c> {
    type CreateRequest = ReferenceEntryCreateDBRequest;
    type UpdateRequest = ReferenceEntryUpdateDBRequest;
    type Response = ReferenceEntryDBResponse;
    type Id = ReferenceEntryId;
    type Filter = ReferenceEntryFilter;

    #[instrument(skip(self, request), fields(kind = self.kind.table(), added_by = %abbrev_uuid(&request.added_by)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO {} (id, name, added_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?) RETURNING *",
            self.kind.table()
        );
        let entry = sqlx::query_as::<_, ReferenceEntryDBResponse>(&query)
            .bind(Uuid::new_v4())
            .bind(&request.name)
            .bind(request.added_by)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(kind = self.kind.table(), id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let query = format!("SELECT * FROM {} WHERE id = ?", self.kind.table());
        let entry = sqlx::query_as::<_, ReferenceEntryDBResponse>(&query)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(entry)
    }

    #[instrument(skip(self, filter), fields(kind = self.kind.table(), limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let query = format!("SELECT * FROM {} ORDER BY name LIMIT ? OFFSET ?", self.kind.table());
        let entries = sqlx::query_as::<_, ReferenceEntryDBResponse>(&query)
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(entries)
    }

    #[instrument(skip(self), fields(kind = self.kind.table(), id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE id = ?", self.kind.table());
        let result = sqlx::query(&query).bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(kind = self.kind.table(), id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let query = format!(
            "UPDATE {} SET name = COALESCE(?, name), updated_at = ? WHERE id = ? RETURNING *",
            self.kind.table()
        );
        let entry = sqlx::query_as::<_, ReferenceEntryDBResponse>(&query)
            .bind(&request.name)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?
            .ok_or(DbError::NotFound)?;
        Ok(entry)
    }
}
