//! Database models for listing reference data: amenities, categories and statuses.
//!
//! The three tables share one shape (`id`, unique `name`, `added_by`), so they share one model and
//! one repository parameterized by [`ReferenceKind`].

use crate::types::{ReferenceEntryId, UserId, route};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Amenity,
    Category,
    Status,
}

impl ReferenceKind {
    pub fn table(self) -> &'static str {
        match self {
            ReferenceKind::Amenity => "amenities",
            ReferenceKind::Category => "categories",
            ReferenceKind::Status => "statuses",
        }
    }

    /// Permission route guarding this kind
    pub fn route(self) -> &'static str {
        match self {
            ReferenceKind::Amenity => route::AMENITIES,
            ReferenceKind::Category => route::CATEGORIES,
            ReferenceKind::Status => route::STATUS,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReferenceKind::Amenity => "Amenity",
            ReferenceKind::Category => "Category",
            ReferenceKind::Status => "Status",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        [ReferenceKind::Amenity, ReferenceKind::Category, ReferenceKind::Status]
            .into_iter()
            .find(|k| k.table() == table)
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceEntryCreateDBRequest {
    pub name: String,
    pub added_by: UserId,
}

#[derive(Debug, Clone)]
pub struct ReferenceEntryUpdateDBRequest {
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReferenceEntryFilter {
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReferenceEntryDBResponse {
    pub id: ReferenceEntryId,
    pub name: String,
    pub added_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
