//! API request/response models for user permissions.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::permissions::{PermissionDBResponse, RoutePermissionSet};
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub routes: RoutePermissionSet,
}

impl From<PermissionDBResponse> for PermissionsResponse {
    fn from(db: PermissionDBResponse) -> Self {
        Self {
            user_id: db.user_id,
            routes: db.routes.0,
        }
    }
}

/// Full replacement of a user's route list. Routes left out lose all access.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PermissionsUpdate {
    pub routes: RoutePermissionSet,
}
