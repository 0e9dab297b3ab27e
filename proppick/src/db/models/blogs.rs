//! Database models for blog posts.

use crate::types::{BlogId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use utoipa::ToSchema;

/// One headed section of a post body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BlogSection {
    pub heading: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct BlogCreateDBRequest {
    pub description: Vec<BlogSection>,
    pub image: String,
    pub added_by: UserId,
}

/// `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct BlogUpdateDBRequest {
    pub description: Option<Vec<BlogSection>>,
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BlogFilter {
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct BlogDBResponse {
    pub id: BlogId,
    pub description: Json<Vec<BlogSection>>,
    pub image: String,
    pub added_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
