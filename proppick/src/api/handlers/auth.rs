use axum::{Json, extract::State, http::StatusCode};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, EmailRequest, MessageResponse, ResetPasswordOtpRequest, ResetPasswordRequest, SignInRequest, SignUpRequest,
            VerifyOtpRequest,
        },
        users::{CurrentUser, UserResponse},
    },
    auth::{
        password,
        password_reset::{self, NewPassword},
        provisioning, session,
    },
    db::{
        errors::DbError,
        handlers::Users,
        models::users::normalize_email,
    },
    errors::Error,
    types::OutboxId,
};

const RESET_REQUESTED: &str = "If an account exists for this email, password reset instructions have been sent";

fn ensure_native_enabled(state: &AppState) -> Result<(), Error> {
    if state.config.auth.native.enabled {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: "Native authentication is disabled".to_string(),
        })
    }
}

/// Send right away; on failure the outbox dispatcher retries later.
async fn deliver(state: &AppState, outbox_id: Option<OutboxId>) {
    if let Some(id) = outbox_id {
        state.outbox.deliver_now(id).await;
    }
}

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

/// Register a new account
///
/// The account starts unverified; a six-digit code is emailed to the address.
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    request_body = SignUpRequest,
    tag = "auth",
    responses(
        (status = 201, description = "Account created, verification code sent", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "User already exists"),
    )
)]
#[instrument(skip_all)]
pub async fn sign_up(State(state): State<AppState>, Json(request): Json<SignUpRequest>) -> Result<(StatusCode, Json<UserResponse>), Error> {
    ensure_native_enabled(&state)?;
    if !state.config.auth.native.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let provisioned = provisioning::sign_up(&state.db, &state.config, request.into()).await?;
    deliver(&state, Some(provisioned.outbox_id)).await;

    Ok((StatusCode::CREATED, Json(UserResponse::from(provisioned.user))))
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    request_body = SignInRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid email or password"),
        (status = 403, description = "Email not verified"),
    )
)]
#[instrument(skip_all)]
pub async fn sign_in(State(state): State<AppState>, Json(request): Json<SignInRequest>) -> Result<Json<AuthResponse>, Error> {
    ensure_native_enabled(&state)?;

    let user = {
        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        Users::new(&mut conn).get_user_by_email(&normalize_email(&request.email)).await?
    }
    .ok_or_else(invalid_credentials)?;

    let Some(password_hash) = user.password_hash.clone() else {
        return Err(invalid_credentials());
    };
    if !password::verify_password(request.password, password_hash).await? {
        return Err(invalid_credentials());
    }

    if state.config.auth.native.require_verified_login && !user.is_verified {
        return Err(Error::Forbidden {
            message: "Please verify your email before signing in".to_string(),
        });
    }

    let token = session::create_session_token(&CurrentUser::from(user.clone()), &state.config)?;
    info!(user_id = %crate::types::abbrev_uuid(&user.id), "User signed in");

    Ok(Json(AuthResponse {
        token,
        user: UserResponse::from(user),
    }))
}

/// Verify the registration code
#[utoipa::path(
    post,
    path = "/auth/verify-otp",
    request_body = VerifyOtpRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Email verified", body = UserResponse),
        (status = 400, description = "Invalid, used or expired code"),
    )
)]
#[instrument(skip_all)]
pub async fn verify_otp(State(state): State<AppState>, Json(request): Json<VerifyOtpRequest>) -> Result<Json<UserResponse>, Error> {
    let user = provisioning::verify_registration(&state.db, &request.email, &request.code).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Send a new registration code
///
/// Every earlier code for the account stops working.
#[utoipa::path(
    post,
    path = "/auth/resend-otp",
    request_body = EmailRequest,
    tag = "auth",
    responses(
        (status = 200, description = "New code sent", body = MessageResponse),
        (status = 400, description = "Email already verified"),
        (status = 404, description = "No account for this email"),
    )
)]
#[instrument(skip_all)]
pub async fn resend_otp(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<MessageResponse>, Error> {
    let outbox_id = provisioning::resend_registration(&state.db, &state.config, &request.email).await?;
    deliver(&state, Some(outbox_id)).await;
    Ok(Json(MessageResponse::new("A new verification code has been sent")))
}

/// Request a password reset link
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = EmailRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Reset link sent if the account exists", body = MessageResponse),
    )
)]
#[instrument(skip_all)]
pub async fn forgot_password(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<MessageResponse>, Error> {
    ensure_native_enabled(&state)?;
    let outbox_id = password_reset::request_reset_link(&state.db, &state.config, &request.email).await?;
    deliver(&state, outbox_id).await;
    Ok(Json(MessageResponse::new(RESET_REQUESTED)))
}

/// Reset the password with a link token
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid, used or expired token, or invalid password"),
    )
)]
#[instrument(skip_all)]
pub async fn reset_password(State(state): State<AppState>, Json(request): Json<ResetPasswordRequest>) -> Result<Json<MessageResponse>, Error> {
    ensure_native_enabled(&state)?;
    password_reset::reset_with_token(
        &state.db,
        &state.config,
        &request.email,
        &request.token,
        NewPassword {
            password: request.password,
            confirm_password: request.confirm_password,
        },
    )
    .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// Request a password reset code
#[utoipa::path(
    post,
    path = "/auth/forgot-password/otp",
    request_body = EmailRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Reset code sent if the account exists", body = MessageResponse),
    )
)]
#[instrument(skip_all)]
pub async fn forgot_password_otp(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<MessageResponse>, Error> {
    ensure_native_enabled(&state)?;
    let outbox_id = password_reset::request_reset_code(&state.db, &state.config, &request.email).await?;
    deliver(&state, outbox_id).await;
    Ok(Json(MessageResponse::new(RESET_REQUESTED)))
}

/// Reset the password with an emailed code
#[utoipa::path(
    post,
    path = "/auth/reset-password/otp",
    request_body = ResetPasswordOtpRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid, used or expired code, or invalid password"),
    )
)]
#[instrument(skip_all)]
pub async fn reset_password_otp(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordOtpRequest>,
) -> Result<Json<MessageResponse>, Error> {
    ensure_native_enabled(&state)?;
    password_reset::reset_with_code(
        &state.db,
        &state.config,
        &request.email,
        &request.code,
        NewPassword {
            password: request.password,
            confirm_password: request.confirm_password,
        },
    )
    .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// The authenticated caller
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = CurrentUser),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer" = []))
)]
pub async fn me(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}
