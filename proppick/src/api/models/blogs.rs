//! API request/response models for blog posts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::blogs::{BlogDBResponse, BlogSection};
use crate::errors::Error;
use crate::types::{BlogId, UserId};

/// The `blog` part of the multipart create request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BlogCreate {
    pub description: Vec<BlogSection>,
}

/// The optional `blog` part of the multipart update request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BlogUpdate {
    pub description: Option<Vec<BlogSection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlogResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: BlogId,
    pub description: Vec<BlogSection>,
    pub image: String,
    #[schema(value_type = String, format = "uuid")]
    pub added_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BlogDBResponse> for BlogResponse {
    fn from(db: BlogDBResponse) -> Self {
        Self {
            id: db.id,
            description: db.description.0,
            image: db.image,
            added_by: db.added_by,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// At least one section, each with a heading. Headings are trimmed.
pub fn normalize_sections(sections: Vec<BlogSection>) -> Result<Vec<BlogSection>, Error> {
    if sections.is_empty() {
        return Err(Error::BadRequest {
            message: "A blog needs at least one section".to_string(),
        });
    }
    sections
        .into_iter()
        .map(|section| {
            let heading = section.heading.trim().to_string();
            if heading.is_empty() {
                return Err(Error::BadRequest {
                    message: "Section headings cannot be empty".to_string(),
                });
            }
            Ok(BlogSection { heading, text: section.text })
        })
        .collect()
}
