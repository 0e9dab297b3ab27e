//! Common type definitions shared by the storage, authorization and API layers.
//!
//! # ID Types
//!
//! Entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`ListingId`]: Property listing identifier
//! - [`ReferenceEntryId`]: Amenity, category or status identifier
//!
//! OTP codes and outbox rows use integer ids ([`OtpId`], [`OutboxId`]) so that "most recently
//! created" is simply the highest id.
//!
//! # Authorization vocabulary
//!
//! - [`Action`]: one of create / read / update / delete, matching a flag on a route entry
//! - [`route`]: the route names permission entries are keyed by
//!
//! A route is a logical resource group, not necessarily the URL path the handler is mounted on.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type ListingId = Uuid;
pub type BlogId = Uuid;
pub type ReferenceEntryId = Uuid;
pub type PermissionId = Uuid;
pub type ResetTokenId = Uuid;
pub type OtpId = i64;
pub type OutboxId = i64;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// The four per-route capabilities a user can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn is_mutating(self) -> bool {
        !matches!(self, Action::Read)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Read => write!(f, "read"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// Route names used as permission keys.
pub mod route {
    pub const LIST_PROPERTY: &str = "/listproperty";
    pub const AMENITIES: &str = "/amenities";
    pub const CATEGORIES: &str = "/categories";
    pub const STATUS: &str = "/status";
    pub const BLOGS: &str = "/blogs";
}

// Common types for path parameters
#[derive(Debug, Clone, Deserialize)]
pub enum MeKeyword {
    #[serde(rename = "me")]
    Me,
}

/// Lets `/users/me/...` and `/users/{user_id}/...` share a handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserIdOrMe {
    Me(MeKeyword),
    Id(UserId),
}

impl UserIdOrMe {
    pub fn resolve(&self, current: UserId) -> UserId {
        match self {
            UserIdOrMe::Me(_) => current,
            UserIdOrMe::Id(id) => *id,
        }
    }
}
