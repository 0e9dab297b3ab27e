use axum::{
    Json,
    extract::{Path, State},
};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        permissions::{PermissionsResponse, PermissionsUpdate},
        users::CurrentUser,
    },
    auth::permissions,
    db::errors::DbError,
    errors::Error,
    types::{UserId, UserIdOrMe, abbrev_uuid},
};

/// Get a user's route permissions
#[utoipa::path(
    get,
    path = "/users/{user_id}/permissions",
    tag = "permissions",
    params(("user_id" = String, Path, description = "User ID or `me`")),
    responses(
        (status = 200, description = "Route permissions", body = PermissionsResponse),
        (status = 403, description = "Neither the user nor an administrator"),
        (status = 404, description = "No permission row for this user"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrMe>,
    current_user: CurrentUser,
) -> Result<Json<PermissionsResponse>, Error> {
    let user_id = user_id.resolve(current_user.id);
    if user_id != current_user.id && !current_user.is_admin() {
        return Err(Error::Forbidden {
            message: "You can only view your own permissions".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let routes = permissions::get_permissions(&mut conn, user_id).await?;

    Ok(Json(PermissionsResponse { user_id, routes }))
}

/// Replace a user's route permissions
///
/// The list is replaced as a whole; send every route the user should keep.
#[utoipa::path(
    put,
    path = "/users/{user_id}/permissions",
    tag = "permissions",
    request_body = PermissionsUpdate,
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Stored route permissions", body = PermissionsResponse),
        (status = 400, description = "Malformed route list"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No permission row for this user"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn replace_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
    Json(update): Json<PermissionsUpdate>,
) -> Result<Json<PermissionsResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let row = permissions::replace_permissions(&mut conn, user_id, &update.routes, current_user.id).await?;

    info!(
        user_id = %abbrev_uuid(&user_id),
        admin_id = %abbrev_uuid(&current_user.id),
        routes = row.routes.0.0.len(),
        "Permissions replaced"
    );
    Ok(Json(PermissionsResponse::from(row)))
}
