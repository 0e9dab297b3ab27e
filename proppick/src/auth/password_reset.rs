//! Password reset, by emailed link token or by emailed code.
//!
//! Link tokens are 32 random bytes; only their SHA-256 fingerprint is stored. Issuing a token marks
//! every earlier unused token for the user as used in the same transaction, so at most one is ever
//! valid. Consumption is a single guarded `UPDATE`, like OTP verification.
//!
//! Requests for unknown addresses succeed without doing anything, so the endpoint does not reveal
//! which emails are registered.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use url::Url;

use crate::{
    auth::{otp, password},
    config::Config,
    db::{
        errors::DbError,
        handlers::{OtpCodes, PasswordResetTokens, Users},
        models::{
            otp_codes::OtpType,
            password_reset_tokens::PasswordResetTokenCreateDBRequest,
            users::{UserDBResponse, normalize_email},
        },
    },
    email,
    errors::{Error, Result},
    outbox,
    types::{OutboxId, abbrev_uuid},
};

/// A new password with its confirmation.
#[derive(Debug, Clone)]
pub struct NewPassword {
    pub password: String,
    pub confirm_password: String,
}

async fn find_user(pool: &SqlitePool, email: &str) -> Result<Option<UserDBResponse>> {
    let mut conn = pool.acquire().await.map_err(DbError::from)?;
    Ok(Users::new(&mut conn).get_user_by_email(&normalize_email(email)).await?)
}

fn invalid_token() -> Error {
    Error::InvalidOrExpired {
        message: "Invalid or already used token".to_string(),
    }
}

fn invalid_otp() -> Error {
    Error::InvalidOrExpired {
        message: "Invalid or expired OTP".to_string(),
    }
}

/// Validate and hash before any transaction is opened.
async fn prepare_hash(new_password: NewPassword, config: &Config) -> Result<String> {
    password::validate_password(
        &new_password.password,
        Some(&new_password.confirm_password),
        &config.auth.native.password,
    )?;
    password::hash_password(new_password.password, config.auth.native.password.argon2_params()).await
}

fn reset_link(config: &Config, email: &str, token: &str) -> Result<Url> {
    let mut link = config.frontend_url.join("reset-password").map_err(|e| Error::Internal {
        operation: format!("build reset link: {e}"),
    })?;
    link.query_pairs_mut().append_pair("email", email).append_pair("token", token);
    Ok(link)
}

/// Issue a reset link token and queue the email. Returns `None` for unknown addresses.
#[instrument(skip(pool, config), err)]
pub async fn request_reset_link(pool: &SqlitePool, config: &Config, email: &str) -> Result<Option<OutboxId>> {
    let Some(user) = find_user(pool, email).await? else {
        info!("Password reset requested for unknown email");
        return Ok(None);
    };

    let ttl = config.auth.native.reset_token_ttl;
    let expires_at = Utc::now()
        + chrono::Duration::from_std(ttl).map_err(|e| Error::Internal {
            operation: format!("convert reset token ttl: {e}"),
        })?;
    let token = password::generate_reset_token();

    let mut tx = pool.begin().await.map_err(DbError::from)?;

    let mut tokens = PasswordResetTokens::new(&mut tx);
    tokens.invalidate_for_user(user.id).await?;
    tokens
        .create(&PasswordResetTokenCreateDBRequest {
            user_id: user.id,
            token_hash: password::fingerprint_token(&token),
            expires_at,
        })
        .await?;

    let link = reset_link(config, &user.email, &token)?;
    let message = email::reset_password_link_email(&user.full_name, link.as_str(), ttl)?;
    let outbox_id = outbox::enqueue(&mut tx, Some(user.id), &user.email, message).await?;

    tx.commit().await.map_err(DbError::from)?;

    info!(user_id = %abbrev_uuid(&user.id), "Issued password reset token");
    Ok(Some(outbox_id))
}

/// Consume a link token and set the new password.
#[instrument(skip(pool, config, token, new_password), err)]
pub async fn reset_with_token(pool: &SqlitePool, config: &Config, email: &str, token: &str, new_password: NewPassword) -> Result<()> {
    let password_hash = prepare_hash(new_password, config).await?;
    let user = find_user(pool, email).await?.ok_or_else(invalid_token)?;

    let now = Utc::now();
    let mut tx = pool.begin().await.map_err(DbError::from)?;

    let consumed = PasswordResetTokens::new(&mut tx)
        .consume(user.id, &password::fingerprint_token(token.trim()), now)
        .await?
        .ok_or_else(invalid_token)?;
    if consumed.is_expired_at(now) {
        return Err(Error::Expired {
            message: "Token has expired".to_string(),
        });
    }

    Users::new(&mut tx).set_password_hash(user.id, &password_hash).await?;
    // A code requested alongside the link is no longer needed
    OtpCodes::new(&mut tx)
        .invalidate_outstanding(user.id, Some(OtpType::ResetPassword))
        .await?;

    tx.commit().await.map_err(DbError::from)?;

    info!(user_id = %abbrev_uuid(&user.id), "Password reset via link");
    Ok(())
}

/// Issue a reset code and queue the email. Returns `None` for unknown addresses.
#[instrument(skip(pool, config), err)]
pub async fn request_reset_code(pool: &SqlitePool, config: &Config, email: &str) -> Result<Option<OutboxId>> {
    let Some(user) = find_user(pool, email).await? else {
        info!("Password reset code requested for unknown email");
        return Ok(None);
    };

    let ttl = config.auth.native.otp.ttl;
    let mut tx = pool.begin().await.map_err(DbError::from)?;

    let otp = otp::issue(&mut tx, user.id, OtpType::ResetPassword, ttl).await?;
    let message = email::reset_password_otp_email(&user.full_name, &otp.code, ttl)?;
    let outbox_id = outbox::enqueue(&mut tx, Some(user.id), &user.email, message).await?;

    tx.commit().await.map_err(DbError::from)?;
    Ok(Some(outbox_id))
}

/// Consume a reset code and set the new password.
#[instrument(skip(pool, config, code, new_password), err)]
pub async fn reset_with_code(pool: &SqlitePool, config: &Config, email: &str, code: &str, new_password: NewPassword) -> Result<()> {
    let password_hash = prepare_hash(new_password, config).await?;
    let user = find_user(pool, email).await?.ok_or_else(invalid_otp)?;

    let mut tx = pool.begin().await.map_err(DbError::from)?;

    otp::verify(&mut tx, user.id, code, OtpType::ResetPassword).await?;
    Users::new(&mut tx).set_password_hash(user.id, &password_hash).await?;
    PasswordResetTokens::new(&mut tx).invalidate_for_user(user.id).await?;

    tx.commit().await.map_err(DbError::from)?;

    info!(user_id = %abbrev_uuid(&user.id), "Password reset via code");
    Ok(())
}
