//! One-time code issue and verification.
//!
//! Per `(user, type)` a code goes `issued -> consumed` or `issued -> expired`. At most one code per
//! `(user, type)` is outstanding: issuing marks earlier unused codes of that type as used, and a
//! partial unique index on `otp_codes` backs that up.
//!
//! All functions take a connection that should be a transaction. [`verify`] consumes the code with
//! a single guarded `UPDATE`; when it then reports `Expired`, the caller's transaction is dropped
//! and the consumption never commits.

use chrono::Utc;
use rand::prelude::RngExt;
use rand::rng;
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::instrument;

use crate::{
    db::{
        handlers::OtpCodes,
        models::otp_codes::{OtpCodeCreateDBRequest, OtpCodeDBResponse, OtpType},
    },
    errors::{Error, Result},
    types::{UserId, abbrev_uuid},
};

pub const OTP_MIN: u32 = 100_000;
pub const OTP_MAX: u32 = 999_999;

/// Six digits, uniform over 100000..=999999.
pub fn generate_code() -> String {
    rng().random_range(OTP_MIN..=OTP_MAX).to_string()
}

fn ttl_delta(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl).map_err(|e| Error::Internal {
        operation: format!("convert OTP ttl: {e}"),
    })
}

/// Issue a fresh code, superseding any outstanding code of the same type.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id), otp_type = %otp_type), err)]
pub async fn issue(conn: &mut SqliteConnection, user_id: UserId, otp_type: OtpType, ttl: Duration) -> Result<OtpCodeDBResponse> {
    let expires_at = Utc::now() + ttl_delta(ttl)?;

    let mut repo = OtpCodes::new(conn);
    repo.invalidate_outstanding(user_id, Some(otp_type)).await?;
    let otp = repo
        .create(&OtpCodeCreateDBRequest {
            user_id,
            code: generate_code(),
            otp_type,
            expires_at,
        })
        .await?;
    Ok(otp)
}

/// Invalidate every outstanding code for the user, of any type, and issue a new registration code.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn re_request(conn: &mut SqliteConnection, user_id: UserId, ttl: Duration) -> Result<OtpCodeDBResponse> {
    OtpCodes::new(&mut *conn).invalidate_outstanding(user_id, None).await?;
    issue(conn, user_id, OtpType::Register, ttl).await
}

/// Consume the newest unused code matching `(user_id, code, otp_type)`.
///
/// Fails with `InvalidOrExpired` when nothing matches and `Expired` when the match is past its
/// expiry. Only commit the surrounding transaction on `Ok`.
#[instrument(skip(conn, code), fields(user_id = %abbrev_uuid(&user_id), otp_type = %otp_type), err)]
pub async fn verify(conn: &mut SqliteConnection, user_id: UserId, code: &str, otp_type: OtpType) -> Result<OtpCodeDBResponse> {
    let now = Utc::now();
    let otp = OtpCodes::new(conn)
        .consume_latest(user_id, code.trim(), otp_type, now)
        .await?
        .ok_or_else(|| Error::InvalidOrExpired {
            message: "Invalid or expired OTP".to_string(),
        })?;

    if otp.is_expired_at(now) {
        return Err(Error::Expired {
            message: "OTP has expired".to_string(),
        });
    }

    Ok(otp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::users::Role;
    use crate::test_utils::create_test_user;
    use sqlx::SqlitePool;

    const TTL: Duration = Duration::from_secs(600);

    async fn issue_committed(pool: &SqlitePool, user_id: UserId, otp_type: OtpType) -> OtpCodeDBResponse {
        let mut tx = pool.begin().await.unwrap();
        let otp = issue(&mut tx, user_id, otp_type, TTL).await.unwrap();
        tx.commit().await.unwrap();
        otp
    }

    async fn verify_committed(pool: &SqlitePool, user_id: UserId, code: &str, otp_type: OtpType) -> Result<OtpCodeDBResponse> {
        let mut tx = pool.begin().await.unwrap();
        let otp = verify(&mut tx, user_id, code, otp_type).await?;
        tx.commit().await.unwrap();
        Ok(otp)
    }

    #[test]
    fn test_generated_codes_are_six_digits_in_range() {
        for _ in 0..1000 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((OTP_MIN..=OTP_MAX).contains(&value));
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_issue_sets_expiry_window(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let otp = issue_committed(&pool, user.id, OtpType::Register).await;

        let window = otp.expires_at - otp.created_at;
        assert!(window <= chrono::Duration::minutes(10));
        assert!(window > chrono::Duration::minutes(9));
        assert!(otp.used_at.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_code_cannot_be_used_twice(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let otp = issue_committed(&pool, user.id, OtpType::Register).await;

        verify_committed(&pool, user.id, &otp.code, OtpType::Register).await.unwrap();
        let second = verify_committed(&pool, user.id, &otp.code, OtpType::Register).await;
        assert!(matches!(second, Err(Error::InvalidOrExpired { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_newer_code_supersedes_older(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let first = issue_committed(&pool, user.id, OtpType::ResetPassword).await;
        let mut second = issue_committed(&pool, user.id, OtpType::ResetPassword).await;
        while second.code == first.code {
            second = issue_committed(&pool, user.id, OtpType::ResetPassword).await;
        }

        let old = verify_committed(&pool, user.id, &first.code, OtpType::ResetPassword).await;
        assert!(matches!(old, Err(Error::InvalidOrExpired { .. })));
        verify_committed(&pool, user.id, &second.code, OtpType::ResetPassword).await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_types_do_not_cross(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let register = issue_committed(&pool, user.id, OtpType::Register).await;
        let reset = issue_committed(&pool, user.id, OtpType::ResetPassword).await;

        // Issuing a reset code leaves the registration code alone
        let wrong_type = verify_committed(&pool, user.id, &register.code, OtpType::ResetPassword).await;
        if register.code != reset.code {
            assert!(matches!(wrong_type, Err(Error::InvalidOrExpired { .. })));
        }
        verify_committed(&pool, user.id, &register.code, OtpType::Register).await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_code_reports_expired_and_stays_unconsumed(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let otp = issue_committed(&pool, user.id, OtpType::Register).await;

        sqlx::query("UPDATE otp_codes SET expires_at = ? WHERE id = ?")
            .bind(Utc::now() - chrono::Duration::seconds(1))
            .bind(otp.id)
            .execute(&pool)
            .await
            .unwrap();

        for _ in 0..2 {
            let result = verify_committed(&pool, user.id, &otp.code, OtpType::Register).await;
            assert!(matches!(result, Err(Error::Expired { .. })));
        }

        let mut conn = pool.acquire().await.unwrap();
        let stored = OtpCodes::new(&mut conn).list_for_user(user.id).await.unwrap();
        assert!(stored[0].used_at.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_re_request_invalidates_all_types(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        issue_committed(&pool, user.id, OtpType::Register).await;
        issue_committed(&pool, user.id, OtpType::ResetPassword).await;

        let mut tx = pool.begin().await.unwrap();
        let fresh = re_request(&mut tx, user.id, TTL).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(fresh.otp_type, OtpType::Register);

        let mut conn = pool.acquire().await.unwrap();
        let outstanding: Vec<_> = OtpCodes::new(&mut conn)
            .list_for_user(user.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|o| o.used_at.is_none())
            .collect();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].id, fresh.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_verification_single_winner(pool: SqlitePool) {
        let user = create_test_user(&pool, Role::User).await;
        let otp = issue_committed(&pool, user.id, OtpType::Register).await;

        let attempts = (0..8).map(|_| {
            let pool = pool.clone();
            let code = otp.code.clone();
            tokio::spawn(async move { verify_committed(&pool, user.id, &code, OtpType::Register).await.is_ok() })
        });

        let mut successes = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
