//! Database models for per-user route permissions.

use crate::types::{Action, PermissionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::collections::HashSet;
use utoipa::ToSchema;

/// One entry of a user's permission matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoutePermission {
    pub route: String,
    pub can_create: bool,
    pub can_read: bool,
    pub can_update: bool,
    pub can_delete: bool,
}

impl RoutePermission {
    pub fn read_only(route: &str) -> Self {
        Self {
            route: route.to_string(),
            can_create: false,
            can_read: true,
            can_update: false,
            can_delete: false,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Create => self.can_create,
            Action::Read => self.can_read,
            Action::Update => self.can_update,
            Action::Delete => self.can_delete,
        }
    }
}

/// The ordered route list persisted for a user. This is the only accepted shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RoutePermissionSet(pub Vec<RoutePermission>);

impl RoutePermissionSet {
    /// Exact route-name match; no globbing and no hierarchy.
    pub fn entry(&self, route: &str) -> Option<&RoutePermission> {
        self.0.iter().find(|p| p.route == route)
    }

    /// Missing entries deny.
    pub fn allows(&self, route: &str, action: Action) -> bool {
        self.entry(route).is_some_and(|p| p.allows(action))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutePermission> {
        self.0.iter()
    }

    /// Checked on every write so that stored rows always have one well-formed shape.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for entry in &self.0 {
            if entry.route.trim().is_empty() {
                return Err("Route names must not be empty".to_string());
            }
            if !entry.route.starts_with('/') {
                return Err(format!("Route '{}' must start with '/'", entry.route));
            }
            if entry.route != entry.route.trim() {
                return Err(format!("Route '{}' must not contain surrounding whitespace", entry.route));
            }
            if !seen.insert(entry.route.as_str()) {
                return Err(format!("Route '{}' appears more than once", entry.route));
            }
        }
        Ok(())
    }
}

impl From<Vec<RoutePermission>> for RoutePermissionSet {
    fn from(entries: Vec<RoutePermission>) -> Self {
        Self(entries)
    }
}

/// Database response for a permission row
#[derive(Debug, Clone, FromRow)]
pub struct PermissionDBResponse {
    pub id: PermissionId,
    pub user_id: UserId,
    pub routes: Json<RoutePermissionSet>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
