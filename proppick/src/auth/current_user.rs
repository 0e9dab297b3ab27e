//! Extractor resolving the `Authorization: Bearer <jwt>` header into a [`CurrentUser`].
//!
//! The token proves identity only. The user row is re-read on every request so that role changes
//! and deletions take effect immediately.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    db::handlers::{Repository, Users},
    errors::{Error, Result},
    types::abbrev_uuid,
};
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts},
};
use tracing::{debug, instrument, trace};

/// Extract the bearer token if present.
/// Returns:
/// - None: no Authorization header or a non-bearer scheme
/// - Some(Ok(token)): bearer token found
/// - Some(Err(error)): header present but not valid UTF-8
fn bearer_token(parts: &Parts) -> Option<Result<&str>> {
    let auth_header = parts.headers.get(header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    auth_str.strip_prefix("Bearer ").map(|token| Ok(token.trim()))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if !state.config.auth.native.enabled {
            trace!("Native authentication disabled");
            return Err(Error::Unauthenticated { message: None });
        }

        let token = match bearer_token(parts) {
            Some(token) => token?,
            None => {
                trace!("No bearer token in request");
                return Err(Error::Unauthenticated { message: None });
            }
        };

        let claims = session::verify_session_token(token, &state.config)?;

        let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
        let user = Users::new(&mut conn).get_by_id(claims.sub).await?.ok_or_else(|| {
            debug!(user_id = %abbrev_uuid(&claims.sub), "Session token for a user that no longer exists");
            Error::Unauthenticated { message: None }
        })?;

        debug!(user_id = %abbrev_uuid(&user.id), "Authenticated request");
        Ok(CurrentUser::from(user))
    }
}

impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>> {
        if bearer_token(parts).is_none() {
            return Ok(None);
        }
        <CurrentUser as FromRequestParts<AppState>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

/// Reject non-admin callers.
pub fn require_admin(user: &CurrentUser, what: &str) -> Result<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden {
            message: format!("Only administrators can {what}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::users::Role;
    use crate::test_utils::{create_test_app_state, create_test_user};
    use axum::http::Request;
    use sqlx::SqlitePool;

    fn parts_with_auth(value: &str) -> Parts {
        let request = Request::builder()
            .uri("http://localhost/auth/me")
            .header(header::AUTHORIZATION, value)
            .body(())
            .unwrap();
        request.into_parts().0
    }

    fn token_for(user: &CurrentUser, state: &AppState) -> String {
        session::create_session_token(user, &state.config).unwrap()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_valid_token_reads_fresh_role(pool: SqlitePool) {
        let state = create_test_app_state(pool.clone());
        let user = create_test_user(&pool, Role::User).await;
        let token = token_for(&CurrentUser::from(user.clone()), &state);

        let mut parts = parts_with_auth(&format!("Bearer {token}"));
        let current = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(current.id, user.id);
        assert!(!current.is_admin());

        // Promote without reissuing the token
        sqlx::query("UPDATE users SET role_id = 2 WHERE id = ?")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();

        let mut parts = parts_with_auth(&format!("Bearer {token}"));
        let current = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(current.is_admin());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_or_garbage_token_is_unauthenticated(pool: SqlitePool) {
        let state = create_test_app_state(pool);

        let request = Request::builder().uri("http://localhost/auth/me").body(()).unwrap();
        let mut parts = request.into_parts().0;
        let result = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));

        let mut parts = parts_with_auth("Bearer not-a-jwt");
        let result = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));

        let mut parts = parts_with_auth("Basic dXNlcjpwdw==");
        let result = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_deleted_user_token_is_rejected(pool: SqlitePool) {
        let state = create_test_app_state(pool.clone());
        let user = create_test_user(&pool, Role::User).await;
        let token = token_for(&CurrentUser::from(user.clone()), &state);

        sqlx::query("DELETE FROM users WHERE id = ?").bind(user.id).execute(&pool).await.unwrap();

        let mut parts = parts_with_auth(&format!("Bearer {token}"));
        let result = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_require_admin() {
        let mut user = CurrentUser {
            id: uuid::Uuid::new_v4(),
            email: "u@example.com".to_string(),
            full_name: "U".to_string(),
            role: Role::User,
            is_verified: true,
        };
        assert!(matches!(require_admin(&user, "list users"), Err(Error::Forbidden { .. })));
        user.role = Role::Admin;
        assert!(require_admin(&user, "list users").is_ok());
    }
}
