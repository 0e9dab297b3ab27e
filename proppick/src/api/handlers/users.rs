use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::{debug, info, instrument};

use super::uploads::discard_images;
use crate::{
    AppState,
    api::models::{
        pagination::Pagination,
        users::{CurrentUser, RoleUpdate, UserResponse, UserUpdate},
    },
    auth::current_user::require_admin,
    db::{
        errors::DbError,
        handlers::{Blogs, Listings, Repository, Users, users::UserFilter},
        models::users::UserUpdateDBRequest,
    },
    errors::Error,
    types::{UserId, UserIdOrMe, abbrev_uuid},
};

fn user_not_found(id: UserId) -> Error {
    Error::NotFound {
        resource: "User".to_string(),
        id: id.to_string(),
    }
}

/// Self-service or admin access to one user's record.
fn require_self_or_admin(current_user: &CurrentUser, target: UserId) -> Result<(), Error> {
    if current_user.id == target || current_user.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden {
            message: "You can only access your own account".to_string(),
        })
    }
}

/// List users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    params(Pagination),
    responses(
        (status = 200, description = "Users", body = [UserResponse]),
        (status = 403, description = "Not an administrator"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<Vec<UserResponse>>, Error> {
    require_admin(&current_user, "list users")?;

    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let users = Users::new(&mut conn).list(&UserFilter::new(skip, limit)).await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Get a user
#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "users",
    params(("user_id" = String, Path, description = "User ID or `me`")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Neither the user nor an administrator"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrMe>,
    current_user: CurrentUser,
) -> Result<Json<UserResponse>, Error> {
    let user_id = user_id.resolve(current_user.id);
    require_self_or_admin(&current_user, user_id)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn).get_by_id(user_id).await?.ok_or_else(|| user_not_found(user_id))?;

    Ok(Json(UserResponse::from(user)))
}

/// Update profile fields
#[utoipa::path(
    patch,
    path = "/users/{user_id}",
    tag = "users",
    request_body = UserUpdate,
    params(("user_id" = String, Path, description = "User ID or `me`")),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Neither the user nor an administrator"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrMe>,
    current_user: CurrentUser,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserResponse>, Error> {
    let user_id = user_id.resolve(current_user.id);
    require_self_or_admin(&current_user, user_id)?;

    let full_name = update.full_name.map(|n| n.trim().to_string());
    if full_name.as_deref().is_some_and(str::is_empty) {
        return Err(Error::BadRequest {
            message: "Full name cannot be empty".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn)
        .update(
            user_id,
            &UserUpdateDBRequest {
                full_name,
                phone: update.phone.map(|p| Some(p.trim().to_string()).filter(|p| !p.is_empty())),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| match e {
            DbError::NotFound => user_not_found(user_id),
            other => other.into(),
        })?;

    Ok(Json(UserResponse::from(user)))
}

/// Change a user's role
#[utoipa::path(
    patch,
    path = "/users/{user_id}/role",
    tag = "users",
    request_body = RoleUpdate,
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn update_role(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
    Json(update): Json<RoleUpdate>,
) -> Result<Json<UserResponse>, Error> {
    require_admin(&current_user, "change roles")?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn)
        .update(
            user_id,
            &UserUpdateDBRequest {
                role: Some(update.role),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| match e {
            DbError::NotFound => user_not_found(user_id),
            other => other.into(),
        })?;

    info!(user_id = %abbrev_uuid(&user_id), role = ?update.role, "Role changed");
    Ok(Json(UserResponse::from(user)))
}

/// Delete a user
///
/// Removes the user's codes, tokens, permissions, listings, blog posts and the reference data they
/// added, along with the images stored for their listings and posts.
#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    tag = "users",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Administrators cannot delete themselves"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    require_admin(&current_user, "delete users")?;
    if user_id == current_user.id {
        return Err(Error::BadRequest {
            message: "You cannot delete your own account".to_string(),
        });
    }

    let mut tx = state.db.begin().await.map_err(DbError::from)?;
    let mut images = Listings::new(&mut tx).images_added_by(user_id).await?;
    images.extend(Blogs::new(&mut tx).images_added_by(user_id).await?);
    if !Users::new(&mut tx).delete(user_id).await? {
        return Err(user_not_found(user_id));
    }
    tx.commit().await.map_err(DbError::from)?;

    debug!(images = images.len(), "Removing images of deleted user");
    discard_images(state.storage.as_ref(), &images).await;

    info!(user_id = %abbrev_uuid(&user_id), "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::{blogs::BlogResponse, listings::ListingResponse, users::UserResponse},
        db::{
            handlers::Permissions,
            models::{permissions::RoutePermission, users::Role},
        },
        test_utils::*,
        types::route,
    };
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::json;
    use sqlx::SqlitePool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_users_is_admin_only(pool: SqlitePool) {
        let (app, _mailer) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;
        let admin = create_test_admin_user(&pool).await;

        let (name, value) = auth_header(&user);
        app.get("/users").add_header(name, value).await.assert_status(StatusCode::FORBIDDEN);

        let (name, value) = auth_header(&admin);
        let response = app.get("/users?limit=1").add_header(name, value).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Vec<UserResponse>>().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_users_read_and_edit_only_themselves(pool: SqlitePool) {
        let (app, _mailer) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;
        let other = create_test_user(&pool, Role::User).await;
        let (name, value) = auth_header(&user);

        let response = app.get("/users/me").add_header(name.clone(), value.clone()).await;
        response.assert_status_ok();
        assert_eq!(response.json::<UserResponse>().id, user.id);

        app.get(&format!("/users/{}", other.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let response = app
            .patch("/users/me")
            .add_header(name.clone(), value.clone())
            .json(&json!({"fullName": "  Grace Hopper ", "phone": "+31 20 000"}))
            .await;
        response.assert_status_ok();
        let updated: UserResponse = response.json();
        assert_eq!(updated.full_name, "Grace Hopper");
        assert_eq!(updated.phone.as_deref(), Some("+31 20 000"));

        // Role is not a self-service field
        app.patch("/users/me")
            .add_header(name, value)
            .json(&json!({"role": "ADMIN"}))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admin_changes_role(pool: SqlitePool) {
        let (app, _mailer) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;
        let admin = create_test_admin_user(&pool).await;

        let (name, value) = auth_header(&user);
        app.patch(&format!("/users/{}/role", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"role": "ADMIN"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let (admin_name, admin_value) = auth_header(&admin);
        let response = app
            .patch(&format!("/users/{}/role", user.id))
            .add_header(admin_name, admin_value)
            .json(&json!({"role": "ADMIN"}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<UserResponse>().role, Role::Admin);

        // Takes effect on the very next request with the same token
        app.get("/users").add_header(name, value).await.assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_user_cascades(pool: SqlitePool) {
        let (app, _mailer) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;
        let admin = create_test_admin_user(&pool).await;
        let (name, value) = auth_header(&admin);

        app.delete(&format!("/users/{}", admin.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        app.delete(&format!("/users/{}", user.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);
        app.delete(&format!("/users/{}", user.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let mut conn = pool.acquire().await.unwrap();
        assert!(Permissions::new(&mut conn).get_for_user(user.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_blank_phone_clears_it(pool: SqlitePool) {
        let (app, _mailer) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;
        let (name, value) = auth_header(&user);

        let updated: UserResponse = app
            .patch("/users/me")
            .add_header(name.clone(), value.clone())
            .json(&json!({"phone": "+31 20 000"}))
            .await
            .json();
        assert_eq!(updated.phone.as_deref(), Some("+31 20 000"));

        // Omitted leaves it alone
        let updated: UserResponse = app
            .patch("/users/me")
            .add_header(name.clone(), value.clone())
            .json(&json!({"fullName": "Grace Hopper"}))
            .await
            .json();
        assert_eq!(updated.phone.as_deref(), Some("+31 20 000"));

        let updated: UserResponse = app
            .patch("/users/me")
            .add_header(name, value)
            .json(&json!({"phone": "   "}))
            .await
            .json();
        assert_eq!(updated.phone, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_user_removes_their_images(pool: SqlitePool) {
        let (app, _mailer) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;
        let admin = create_test_admin_user(&pool).await;
        let (admin_name, admin_value) = auth_header(&admin);
        let (name, value) = auth_header(&user);

        let full = |route: &str| RoutePermission {
            can_create: true,
            ..RoutePermission::read_only(route)
        };
        app.put(&format!("/users/{}/permissions", user.id))
            .add_header(admin_name.clone(), admin_value.clone())
            .json(&json!({"routes": [full(route::LIST_PROPERTY), full(route::BLOGS)]}))
            .await
            .assert_status_ok();

        let image = || Part::bytes(b"\x89PNG".to_vec()).file_name("a.png").mime_type("image/png");
        let listing: ListingResponse = app
            .post("/listings")
            .add_header(name.clone(), value.clone())
            .multipart(
                MultipartForm::new()
                    .add_text(
                        "listing",
                        json!({
                            "title": "Quiet cottage",
                            "description": "By the river",
                            "price": 90000.0,
                            "address": "2 Mill Lane",
                            "country": "UK",
                            "state": "Kent",
                            "zipcode": "CT1 1AA",
                            "contactEmail": "owner@example.com"
                        })
                        .to_string(),
                    )
                    .add_part("images", image()),
            )
            .await
            .json();
        let blog: BlogResponse = app
            .post("/blogs")
            .add_header(name, value)
            .multipart(
                MultipartForm::new()
                    .add_text("blog", json!({"description": [{"heading": "Moving in", "text": "Boxes"}]}).to_string())
                    .add_part("image", image()),
            )
            .await
            .json();

        let paths: Vec<String> = listing
            .images
            .iter()
            .chain(std::iter::once(&blog.image))
            .map(|u| url::Url::parse(u).unwrap().path().to_string())
            .collect();
        for path in &paths {
            app.get(path).await.assert_status_ok();
        }

        app.delete(&format!("/users/{}", user.id))
            .add_header(admin_name, admin_value)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        for path in &paths {
            app.get(path).await.assert_status(StatusCode::NOT_FOUND);
        }
        let listings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings").fetch_one(&pool).await.unwrap();
        let blogs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blogs").fetch_one(&pool).await.unwrap();
        assert_eq!((listings, blogs), (0, 0));
    }
}
