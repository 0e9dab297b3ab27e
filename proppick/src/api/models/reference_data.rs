//! API request/response models for amenities, categories and statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::reference_data::ReferenceEntryDBResponse;
use crate::errors::Error;
use crate::types::{ReferenceEntryId, UserId};

pub const NAME_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ReferenceEntryCreate {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ReferenceEntryUpdate {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ReferenceEntryId,
    pub name: String,
    #[schema(value_type = String, format = "uuid")]
    pub added_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReferenceEntryDBResponse> for ReferenceEntryResponse {
    fn from(db: ReferenceEntryDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            added_by: db.added_by,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Trimmed, non-empty, bounded.
pub fn normalize_name(name: &str) -> Result<String, Error> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest {
            message: "Name is required".to_string(),
        });
    }
    if name.chars().count() > NAME_MAX_CHARS {
        return Err(Error::BadRequest {
            message: format!("Name must be at most {NAME_MAX_CHARS} characters"),
        });
    }
    Ok(name.to_string())
}
