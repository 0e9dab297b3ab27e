//! Route-level authorization.
//!
//! A decision is made from three inputs, all read fresh from the database:
//!
//! 1. The caller's role. Admins are allowed everything and the permission table is not consulted.
//! 2. The caller's permission row: an exact-match lookup of the route name, then the flag for the
//!    requested [`Action`]. A route with no entry denies.
//! 3. For update/delete on a user-owned resource, ownership. Owner and admin are independent allow
//!    paths; whether a granted flag also lets a non-owner through depends on
//!    [`ResourceMutationPolicy`].
//!
//! Handlers gate whole routes with the [`RequiresPermission`] extractor and call
//! [`check_resource_mutation`] once they have loaded the resource's owner.

use std::marker::PhantomData;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::SqliteConnection;
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    config::ResourceMutationPolicy,
    db::{
        errors::DbError,
        handlers::{Permissions, Users},
        models::{
            permissions::{PermissionDBResponse, RoutePermissionSet},
            users::Role,
        },
    },
    errors::{Error, Result},
    types::{Action, UserId, abbrev_uuid},
};

async fn fresh_role(conn: &mut SqliteConnection, user_id: UserId) -> Result<Role> {
    Users::new(conn)
        .get_role(user_id)
        .await?
        .ok_or(Error::Unauthenticated { message: None })
}

/// The stored permission set for a user.
///
/// Every user gets a row at provisioning time, so a missing row is reported as `NotFound` rather
/// than treated as an empty set.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn get_permissions(conn: &mut SqliteConnection, user_id: UserId) -> Result<RoutePermissionSet> {
    Permissions::new(conn)
        .get_for_user(user_id)
        .await?
        .map(|row| row.routes.0)
        .ok_or_else(|| Error::NotFound {
            resource: "Permissions".to_string(),
            id: user_id.to_string(),
        })
}

/// Replace a user's route list wholesale. Only admins may do this.
#[instrument(skip(conn, routes), fields(user_id = %abbrev_uuid(&user_id), admin_id = %abbrev_uuid(&requesting_admin_id)), err)]
pub async fn replace_permissions(
    conn: &mut SqliteConnection,
    user_id: UserId,
    routes: &RoutePermissionSet,
    requesting_admin_id: UserId,
) -> Result<PermissionDBResponse> {
    if !fresh_role(conn, requesting_admin_id).await?.is_admin() {
        return Err(Error::Forbidden {
            message: "Only administrators can change permissions".to_string(),
        });
    }

    routes.validate().map_err(|message| Error::BadRequest { message })?;

    Permissions::new(conn)
        .replace_routes(user_id, routes)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Permissions".to_string(),
            id: user_id.to_string(),
        })
}

/// Decide whether `user_id` may perform `action` on `route`.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id)), ret, err)]
pub async fn authorize(conn: &mut SqliteConnection, user_id: UserId, route: &str, action: Action) -> Result<bool> {
    if fresh_role(conn, user_id).await?.is_admin() {
        return Ok(true);
    }

    let permissions = get_permissions(conn, user_id).await?;
    Ok(permissions.allows(route, action))
}

/// [`authorize`], turning a deny into `InsufficientPermissions`.
pub async fn require(conn: &mut SqliteConnection, user_id: UserId, route: &str, action: Action) -> Result<()> {
    if authorize(conn, user_id, route, action).await? {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            action,
            resource: route.to_string(),
        })
    }
}

/// The resource-owner rule for update/delete on a resource owned by `owner_id`.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id), owner_id = %abbrev_uuid(&owner_id)), err)]
pub async fn check_resource_mutation(
    conn: &mut SqliteConnection,
    user_id: UserId,
    owner_id: UserId,
    route: &str,
    action: Action,
    policy: ResourceMutationPolicy,
) -> Result<()> {
    if fresh_role(conn, user_id).await?.is_admin() || user_id == owner_id {
        return Ok(());
    }

    if policy == ResourceMutationPolicy::OwnerAdminOrPermission && get_permissions(conn, user_id).await?.allows(route, action) {
        debug!("Non-owner allowed by permission flag");
        return Ok(());
    }

    Err(Error::InsufficientPermissions {
        action,
        resource: route.to_string(),
    })
}

/// Type-level route names for [`RequiresPermission`].
pub mod resource {
    use crate::types::route;

    pub trait RouteName {
        const ROUTE: &'static str;
    }

    pub struct ListProperty;
    pub struct Amenities;
    pub struct Categories;
    pub struct Status;
    pub struct Blogs;

    impl RouteName for ListProperty {
        const ROUTE: &'static str = route::LIST_PROPERTY;
    }
    impl RouteName for Amenities {
        const ROUTE: &'static str = route::AMENITIES;
    }
    impl RouteName for Categories {
        const ROUTE: &'static str = route::CATEGORIES;
    }
    impl RouteName for Status {
        const ROUTE: &'static str = route::STATUS;
    }
    impl RouteName for Blogs {
        const ROUTE: &'static str = route::BLOGS;
    }
}

/// Type-level actions for [`RequiresPermission`].
pub mod operation {
    use crate::types::Action;

    pub trait ActionKind {
        const ACTION: Action;
    }

    pub struct Create;
    pub struct Read;
    pub struct Update;
    pub struct Delete;

    impl ActionKind for Create {
        const ACTION: Action = Action::Create;
    }
    impl ActionKind for Read {
        const ACTION: Action = Action::Read;
    }
    impl ActionKind for Update {
        const ACTION: Action = Action::Update;
    }
    impl ActionKind for Delete {
        const ACTION: Action = Action::Delete;
    }
}

/// Extractor that authenticates the caller and requires `A` on route `R`.
pub struct RequiresPermission<R, A> {
    pub user: CurrentUser,
    _marker: PhantomData<(R, A)>,
}

impl<R, A> FromRequestParts<AppState> for RequiresPermission<R, A>
where
    R: resource::RouteName + Send + Sync,
    A: operation::ActionKind + Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(parts, state).await?;

        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        require(&mut conn, user.id, R::ROUTE, A::ACTION).await?;

        Ok(Self {
            user,
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::permissions::RoutePermission;
    use crate::test_utils::{create_test_admin_user, create_test_user};
    use crate::types::route;
    use sqlx::SqlitePool;

    const ALL_ACTIONS: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    fn entry(route: &str, flags: [bool; 4]) -> RoutePermission {
        RoutePermission {
            route: route.to_string(),
            can_create: flags[0],
            can_read: flags[1],
            can_update: flags[2],
            can_delete: flags[3],
        }
    }

    async fn set_routes(pool: &SqlitePool, user_id: UserId, routes: Vec<RoutePermission>) {
        let mut conn = pool.acquire().await.unwrap();
        Permissions::new(&mut conn)
            .replace_routes(user_id, &RoutePermissionSet(routes))
            .await
            .unwrap()
            .unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_non_admin_gets_exact_stored_flag(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        set_routes(
            &pool,
            user.id,
            vec![entry(route::AMENITIES, [true, false, true, false]), entry(route::STATUS, [false, true, false, true])],
        )
        .await;

        let mut conn = pool.acquire().await.unwrap();
        for (i, action) in ALL_ACTIONS.into_iter().enumerate() {
            let expected_amenities = [true, false, true, false][i];
            let expected_status = [false, true, false, true][i];
            assert_eq!(authorize(&mut conn, user.id, route::AMENITIES, action).await.unwrap(), expected_amenities);
            assert_eq!(authorize(&mut conn, user.id, route::STATUS, action).await.unwrap(), expected_status);
            // No entry: deny
            assert!(!authorize(&mut conn, user.id, route::CATEGORIES, action).await.unwrap());
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_route_match_is_exact(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        set_routes(&pool, user.id, vec![entry("/amenities", [true, true, true, true])]).await;

        let mut conn = pool.acquire().await.unwrap();
        assert!(!authorize(&mut conn, user.id, "/amenities/", Action::Read).await.unwrap());
        assert!(!authorize(&mut conn, user.id, "/Amenities", Action::Read).await.unwrap());
        assert!(!authorize(&mut conn, user.id, "/amenities/list", Action::Read).await.unwrap());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admin_bypasses_permission_table(pool: SqlitePool) {
        let admin = create_test_admin_user(&pool).await;
        set_routes(&pool, admin.id, vec![entry(route::AMENITIES, [false, false, false, false])]).await;

        let mut conn = pool.acquire().await.unwrap();
        for action in ALL_ACTIONS {
            assert!(authorize(&mut conn, admin.id, route::AMENITIES, action).await.unwrap());
            assert!(authorize(&mut conn, admin.id, "/not-a-route", action).await.unwrap());
        }

        // Even with no permission row at all
        sqlx::query("DELETE FROM permissions WHERE user_id = ?")
            .bind(admin.id)
            .execute(&mut *conn)
            .await
            .unwrap();
        assert!(authorize(&mut conn, admin.id, route::LIST_PROPERTY, Action::Delete).await.unwrap());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_permission_row_is_not_found(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("DELETE FROM permissions WHERE user_id = ?")
            .bind(user.id)
            .execute(&mut *conn)
            .await
            .unwrap();

        assert!(matches!(get_permissions(&mut conn, user.id).await, Err(Error::NotFound { .. })));
        assert!(matches!(
            authorize(&mut conn, user.id, route::AMENITIES, Action::Read).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_caller_is_unauthenticated(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let result = authorize(&mut conn, uuid::Uuid::new_v4(), route::AMENITIES, Action::Read).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_replace_permissions_requires_admin(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let other = create_test_user(&pool, Role::User).await;
        let admin = create_test_admin_user(&pool).await;
        let routes = RoutePermissionSet(vec![entry(route::LIST_PROPERTY, [true, true, false, false])]);

        let mut conn = pool.acquire().await.unwrap();
        let result = replace_permissions(&mut conn, other.id, &routes, user.id).await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));
        // Unchanged
        assert!(!get_permissions(&mut conn, other.id).await.unwrap().allows(route::LIST_PROPERTY, Action::Create));

        replace_permissions(&mut conn, other.id, &routes, admin.id).await.unwrap();
        let stored = get_permissions(&mut conn, other.id).await.unwrap();
        assert_eq!(stored, routes);
        // Wholesale: the default read-only entries are gone
        assert!(stored.entry(route::AMENITIES).is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_replace_permissions_validates_and_requires_row(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let admin = create_test_admin_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let duplicated = RoutePermissionSet(vec![entry("/status", [false; 4]), entry("/status", [true; 4])]);
        assert!(matches!(
            replace_permissions(&mut conn, user.id, &duplicated, admin.id).await,
            Err(Error::BadRequest { .. })
        ));

        sqlx::query("DELETE FROM permissions WHERE user_id = ?")
            .bind(user.id)
            .execute(&mut *conn)
            .await
            .unwrap();
        let routes = RoutePermissionSet(vec![entry("/status", [false, true, false, false])]);
        assert!(matches!(
            replace_permissions(&mut conn, user.id, &routes, admin.id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_owner_rule_default_policy(pool: SqlitePool) {
        let owner = create_test_user(&pool, Role::User).await;
        let other = create_test_user(&pool, Role::User).await;
        let admin = create_test_admin_user(&pool).await;
        // A delete flag does not reach other users' listings under the default policy
        set_routes(&pool, other.id, vec![entry(route::LIST_PROPERTY, [true, true, true, true])]).await;

        let mut conn = pool.acquire().await.unwrap();
        let policy = ResourceMutationPolicy::OwnerOrAdmin;

        check_resource_mutation(&mut conn, owner.id, owner.id, route::LIST_PROPERTY, Action::Delete, policy)
            .await
            .unwrap();
        check_resource_mutation(&mut conn, admin.id, owner.id, route::LIST_PROPERTY, Action::Delete, policy)
            .await
            .unwrap();

        let denied = check_resource_mutation(&mut conn, other.id, owner.id, route::LIST_PROPERTY, Action::Delete, policy).await;
        assert!(matches!(
            denied,
            Err(Error::InsufficientPermissions {
                action: Action::Delete,
                ..
            })
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_owner_rule_permission_policy(pool: SqlitePool) {
        let owner = create_test_user(&pool, Role::User).await;
        let granted = create_test_user(&pool, Role::User).await;
        let plain = create_test_user(&pool, Role::User).await;
        set_routes(&pool, granted.id, vec![entry(route::LIST_PROPERTY, [false, true, false, true])]).await;

        let mut conn = pool.acquire().await.unwrap();
        let policy = ResourceMutationPolicy::OwnerAdminOrPermission;

        check_resource_mutation(&mut conn, granted.id, owner.id, route::LIST_PROPERTY, Action::Delete, policy)
            .await
            .unwrap();
        assert!(
            check_resource_mutation(&mut conn, granted.id, owner.id, route::LIST_PROPERTY, Action::Update, policy)
                .await
                .is_err()
        );
        assert!(
            check_resource_mutation(&mut conn, plain.id, owner.id, route::LIST_PROPERTY, Action::Delete, policy)
                .await
                .is_err()
        );
    }
}
