//! Transactional user provisioning.
//!
//! Sign-up writes the user, its registration code, its default permission row and the outbox
//! message carrying the code in one transaction. Either all four rows exist afterwards or none do.
//! Delivering the email happens after commit and cannot undo the account.

use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::{
    auth::{otp, password},
    config::Config,
    db::{
        errors::DbError,
        handlers::{Permissions, Repository, Users},
        models::{
            otp_codes::OtpType,
            users::{Role, UserCreateDBRequest, UserDBResponse, is_valid_email, normalize_email},
        },
    },
    email,
    errors::{Error, Result},
    outbox,
    types::{OutboxId, abbrev_uuid},
};

/// What a new user supplies at sign-up.
#[derive(Debug, Clone)]
pub struct SignUpProfile {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug)]
pub struct Provisioned {
    pub user: UserDBResponse,
    /// Registration email waiting for delivery
    pub outbox_id: OutboxId,
}

fn user_already_exists() -> Error {
    Error::Conflict {
        message: "User already exists".to_string(),
    }
}

/// Map the users.email unique violation to the conflict callers expect.
fn map_email_conflict(e: DbError) -> Error {
    if e.is_unique_on("users", "email") {
        user_already_exists()
    } else {
        e.into()
    }
}

/// Field checks that need no database access.
fn validate_profile(profile: &SignUpProfile, config: &Config) -> Result<String> {
    if profile.full_name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Full name is required".to_string(),
        });
    }

    let email = normalize_email(&profile.email);
    if !is_valid_email(&email) {
        return Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        });
    }

    password::validate_password(
        &profile.password,
        profile.confirm_password.as_deref(),
        &config.auth.native.password,
    )?;

    Ok(email)
}

/// Create an unverified USER account with its registration code and default permissions.
#[instrument(skip_all, err)]
pub async fn sign_up(pool: &SqlitePool, config: &Config, profile: SignUpProfile) -> Result<Provisioned> {
    let email = validate_profile(&profile, config)?;

    // Cheap early exit; the unique index still decides races
    {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        if Users::new(&mut conn).get_user_by_email(&email).await?.is_some() {
            return Err(user_already_exists());
        }
    }

    let password_hash = password::hash_password(profile.password, config.auth.native.password.argon2_params()).await?;
    let otp_ttl = config.auth.native.otp.ttl;

    let mut tx = pool.begin().await.map_err(DbError::from)?;

    let user = Users::new(&mut tx)
        .create(&UserCreateDBRequest {
            email,
            password_hash: Some(password_hash),
            full_name: profile.full_name.trim().to_string(),
            phone: profile.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            role: Role::User,
            is_verified: false,
        })
        .await
        .map_err(map_email_conflict)?;

    let otp = otp::issue(&mut tx, user.id, OtpType::Register, otp_ttl).await?;

    Permissions::new(&mut tx)
        .create(user.id, &config.auth.default_permission_set())
        .await?;

    let message = email::registration_otp_email(&user.full_name, &otp.code, otp_ttl)?;
    let outbox_id = outbox::enqueue(&mut tx, Some(user.id), &user.email, message).await?;

    tx.commit().await.map_err(DbError::from)?;

    info!(user_id = %abbrev_uuid(&user.id), "Provisioned new user");
    Ok(Provisioned { user, outbox_id })
}

/// Confirm the registration code and mark the account verified, atomically.
#[instrument(skip(pool, code), err)]
pub async fn verify_registration(pool: &SqlitePool, email: &str, code: &str) -> Result<UserDBResponse> {
    let email = normalize_email(email);
    let user = {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        Users::new(&mut conn)
            .get_user_by_email(&email)
            .await?
            .ok_or_else(|| Error::InvalidOrExpired {
                message: "Invalid or expired OTP".to_string(),
            })?
    };

    // The guarded consume is the first statement, so concurrent attempts serialize on it
    let mut tx = pool.begin().await.map_err(DbError::from)?;
    otp::verify(&mut tx, user.id, code, OtpType::Register).await?;
    Users::new(&mut tx).mark_verified(user.id).await?;
    let user = Users::new(&mut tx).get_by_id(user.id).await?.ok_or(DbError::NotFound)?;

    tx.commit().await.map_err(DbError::from)?;
    info!(user_id = %abbrev_uuid(&user.id), "User verified email");
    Ok(user)
}

/// Replace every outstanding code with a new registration code and queue it for delivery.
#[instrument(skip(pool, config), err)]
pub async fn resend_registration(pool: &SqlitePool, config: &Config, email: &str) -> Result<OutboxId> {
    let email = normalize_email(email);
    let otp_ttl = config.auth.native.otp.ttl;

    let user = {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        Users::new(&mut conn)
            .get_user_by_email(&email)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "User".to_string(),
                id: email.clone(),
            })?
    };
    if user.is_verified {
        return Err(Error::BadRequest {
            message: "Email is already verified".to_string(),
        });
    }

    let mut tx = pool.begin().await.map_err(DbError::from)?;
    let otp = otp::re_request(&mut tx, user.id, otp_ttl).await?;
    let message = email::registration_otp_email(&user.full_name, &otp.code, otp_ttl)?;
    let outbox_id = outbox::enqueue(&mut tx, Some(user.id), &user.email, message).await?;

    tx.commit().await.map_err(DbError::from)?;
    Ok(outbox_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{EmailOutbox, OtpCodes};
    use crate::db::models::email_outbox::OutboxStatus;
    use crate::test_utils::create_test_config;

    fn profile(email: &str, password: &str) -> SignUpProfile {
        SignUpProfile {
            full_name: "Ada Lovelace".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: Some(password.to_string()),
            phone: Some("+44 20 7946 0000".to_string()),
        }
    }

    #[derive(Debug, PartialEq)]
    struct Counts {
        users: i64,
        otps: i64,
        permissions: i64,
        outbox: i64,
    }

    async fn counts(pool: &SqlitePool) -> Counts {
        let mut conn = pool.acquire().await.unwrap();
        Counts {
            users: Users::new(&mut conn).count().await.unwrap(),
            otps: OtpCodes::new(&mut conn).count().await.unwrap(),
            permissions: Permissions::new(&mut conn).count().await.unwrap(),
            outbox: EmailOutbox::new(&mut conn).count_with_status(OutboxStatus::Pending).await.unwrap(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_sign_up_creates_all_rows(pool: SqlitePool) {
        let config = create_test_config();
        let provisioned = sign_up(&pool, &config, profile("  Ada@Example.com ", "secret1")).await.unwrap();

        let user = &provisioned.user;
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, Role::User);
        assert!(!user.is_verified);
        assert!(user.password_hash.as_deref().is_some_and(|h| h.starts_with("$argon2id$")));

        let mut conn = pool.acquire().await.unwrap();
        let otps = OtpCodes::new(&mut conn).list_for_user(user.id).await.unwrap();
        assert_eq!(otps.len(), 1);
        assert_eq!(otps[0].otp_type, OtpType::Register);

        let permissions = Permissions::new(&mut conn).get_for_user(user.id).await.unwrap().unwrap();
        assert_eq!(permissions.routes.0, config.auth.default_permission_set());
        assert!(permissions.routes.0.iter().all(|p| p.can_read && !p.can_create && !p.can_update && !p.can_delete));

        let message = EmailOutbox::new(&mut conn).get_by_id(provisioned.outbox_id).await.unwrap().unwrap();
        assert_eq!(message.to_address, "ada@example.com");
        assert!(message.html_body.contains(&otps[0].code));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_email_conflicts_without_new_rows(pool: SqlitePool) {
        let config = create_test_config();
        sign_up(&pool, &config, profile("ada@example.com", "secret1")).await.unwrap();
        let before = counts(&pool).await;

        let result = sign_up(&pool, &config, profile("ADA@example.com ", "secret2")).await;
        assert!(matches!(result, Err(Error::Conflict { ref message }) if message == "User already exists"));
        assert_eq!(counts(&pool).await, before);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_short_password_rejected_before_any_write(pool: SqlitePool) {
        let config = create_test_config();
        let result = sign_up(&pool, &config, profile("short@example.com", "12345")).await;
        assert!(matches!(result, Err(Error::BadRequest { .. })));
        assert_eq!(
            counts(&pool).await,
            Counts {
                users: 0,
                otps: 0,
                permissions: 0,
                outbox: 0
            }
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_mismatched_confirmation_and_bad_fields(pool: SqlitePool) {
        let config = create_test_config();

        let mut p = profile("m@example.com", "secret1");
        p.confirm_password = Some("secret2".to_string());
        assert!(matches!(sign_up(&pool, &config, p).await, Err(Error::BadRequest { .. })));

        let mut p = profile("not-an-email", "secret1");
        p.email = "not-an-email".to_string();
        assert!(matches!(sign_up(&pool, &config, p).await, Err(Error::BadRequest { .. })));

        let mut p = profile("n@example.com", "secret1");
        p.full_name = "   ".to_string();
        assert!(matches!(sign_up(&pool, &config, p).await, Err(Error::BadRequest { .. })));

        assert_eq!(counts(&pool).await.users, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_failure_in_late_step_rolls_back_everything(pool: SqlitePool) {
        let config = create_test_config();
        sqlx::query(
            r#"
            CREATE TRIGGER fail_permissions BEFORE INSERT ON permissions
            BEGIN
                SELECT RAISE(ABORT, 'permission store unavailable');
            END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sign_up(&pool, &config, profile("rollback@example.com", "secret1")).await;
        assert!(result.is_err());
        assert_eq!(
            counts(&pool).await,
            Counts {
                users: 0,
                otps: 0,
                permissions: 0,
                outbox: 0
            }
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verify_registration_marks_verified_once(pool: SqlitePool) {
        let config = create_test_config();
        let provisioned = sign_up(&pool, &config, profile("v@example.com", "secret1")).await.unwrap();
        let code = {
            let mut conn = pool.acquire().await.unwrap();
            OtpCodes::new(&mut conn).list_for_user(provisioned.user.id).await.unwrap()[0].code.clone()
        };

        let user = verify_registration(&pool, "V@example.com", &code).await.unwrap();
        assert!(user.is_verified);

        let again = verify_registration(&pool, "v@example.com", &code).await;
        assert!(matches!(again, Err(Error::InvalidOrExpired { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_failed_verification_leaves_user_unverified(pool: SqlitePool) {
        let config = create_test_config();
        let provisioned = sign_up(&pool, &config, profile("w@example.com", "secret1")).await.unwrap();

        sqlx::query("UPDATE otp_codes SET expires_at = ? WHERE user_id = ?")
            .bind(chrono::Utc::now() - chrono::Duration::seconds(5))
            .bind(provisioned.user.id)
            .execute(&pool)
            .await
            .unwrap();
        let code = {
            let mut conn = pool.acquire().await.unwrap();
            OtpCodes::new(&mut conn).list_for_user(provisioned.user.id).await.unwrap()[0].code.clone()
        };

        assert!(matches!(
            verify_registration(&pool, "w@example.com", &code).await,
            Err(Error::Expired { .. })
        ));
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).get_by_id(provisioned.user.id).await.unwrap().unwrap();
        assert!(!user.is_verified);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_resend_supersedes_and_rejects_verified(pool: SqlitePool) {
        let config = create_test_config();
        let provisioned = sign_up(&pool, &config, profile("r@example.com", "secret1")).await.unwrap();

        resend_registration(&pool, &config, "r@example.com").await.unwrap();
        let outstanding: Vec<_> = {
            let mut conn = pool.acquire().await.unwrap();
            OtpCodes::new(&mut conn)
                .list_for_user(provisioned.user.id)
                .await
                .unwrap()
                .into_iter()
                .filter(|o| o.used_at.is_none())
                .collect()
        };
        assert_eq!(outstanding.len(), 1);

        verify_registration(&pool, "r@example.com", &outstanding[0].code).await.unwrap();
        assert!(matches!(
            resend_registration(&pool, &config, "r@example.com").await,
            Err(Error::BadRequest { .. })
        ));
        assert!(matches!(
            resend_registration(&pool, &config, "nobody@example.com").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_sign_ups_single_winner(pool: SqlitePool) {
        let config = create_test_config();
        let attempts = (0..4).map(|_| {
            let pool = pool.clone();
            let config = config.clone();
            tokio::spawn(async move { sign_up(&pool, &config, profile("race@example.com", "secret1")).await })
        });

        let mut created = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, Error::Conflict { .. }), "unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(counts(&pool).await.users, 1);
    }
}
