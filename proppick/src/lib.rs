//! # proppick: property listing backend
//!
//! `proppick` serves a property marketplace: users register with an emailed one-time code, sign in
//! with a session token, and publish listings and blog posts with images. Access is decided per route by a
//! permission matrix stored for every user, with administrators bypassing it and owners always
//! allowed to change their own listings.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); persistence is SQLite through
//! SQLx. Handlers in [`api`] authenticate the caller ([`auth::current_user`]), authorize with
//! [`auth::permissions`], and talk to the database through the repositories in [`db::handlers`].
//!
//! ### Core components
//!
//! - **Permission store and evaluator** ([`auth::permissions`]): one ordered route list per user,
//!   exact-match lookup, admin override, and the resource-owner rule for update and delete.
//! - **One-time codes** ([`auth::otp`]): issue, supersede and consume codes for registration and
//!   password reset.
//! - **Provisioning** ([`auth::provisioning`]): the user row, its default permissions, its first
//!   code and the verification email intent are written in one transaction.
//! - **Outbox** ([`outbox`]): emails are committed with the state that caused them and delivered
//!   afterwards, with retries.
//!
//! **Background services** run alongside the HTTP server: the outbox dispatcher and the expiry
//! sweeper, both stopped through a shared cancellation token.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use proppick::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = proppick::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     proppick::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod openapi;
pub mod outbox;
pub mod storage;
pub mod sweeper;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::{str::FromStr, sync::Arc};

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, patch, post},
};
use bon::Builder;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{
        auth as auth_handlers, blogs, listings, permissions,
        reference_data::{amenities, categories, statuses},
        users,
    },
    auth::password,
    config::CorsOrigin,
    db::{
        errors::DbError,
        handlers::{Permissions, Repository, Users},
        models::users::{Role, UserCreateDBRequest, UserUpdateDBRequest, normalize_email},
    },
    email::{EmailService, Mailer},
    openapi::ApiDoc,
    outbox::OutboxDispatcher,
    storage::{FileStorage, LocalFileStorage},
};

pub use config::Config;
pub use types::{ListingId, UserId};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .storage(Arc::new(storage))
///     .outbox(dispatcher)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    /// Where listing images go
    pub storage: Arc<dyn FileStorage>,
    /// Sends committed email intents
    pub outbox: OutboxDispatcher,
}

/// Get the proppick database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the bootstrap admin user, or bring an existing account up to date.
///
/// Idempotent: an existing user with this email is re-passworded, promoted to admin, marked
/// verified, and given the default permissions if it has none.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, password: &str, db: &SqlitePool, config: &Config) -> errors::Result<UserId> {
    let email = normalize_email(email);
    let password_hash = password::hash_password(password.to_string(), config.auth.native.password.argon2_params()).await?;

    let mut tx = db.begin().await.map_err(DbError::from)?;

    let existing = Users::new(&mut tx).get_user_by_email(&email).await?;
    let user_id = match existing {
        Some(user) => {
            Users::new(&mut tx)
                .update(
                    user.id,
                    &UserUpdateDBRequest {
                        role: Some(Role::Admin),
                        password_hash: Some(password_hash),
                        is_verified: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            user.id
        }
        None => {
            Users::new(&mut tx)
                .create(&UserCreateDBRequest {
                    email: email.clone(),
                    password_hash: Some(password_hash),
                    full_name: "Administrator".to_string(),
                    phone: None,
                    role: Role::Admin,
                    is_verified: true,
                })
                .await?
                .id
        }
    };

    let mut permissions = Permissions::new(&mut tx);
    if permissions.get_for_user(user_id).await?.is_none() {
        permissions.create(user_id, &config.auth.default_permission_set()).await?;
    }

    tx.commit().await.map_err(DbError::from)?;
    info!(email = %email, "Admin user ready");
    Ok(user_id)
}

/// Open the SQLite pool described by `config.database` and apply migrations.
async fn setup_database(config: &Config) -> anyhow::Result<SqlitePool> {
    let database = &config.database;
    let options = SqliteConnectOptions::from_str(&database.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(database.pool.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(database.pool.max_connections)
        .min_connections(database.pool.min_connections)
        .acquire_timeout(database.pool.acquire_timeout)
        .connect_with(options)
        .await?;

    migrator().run(&pool).await?;
    info!(url = %database.url, "Database ready");
    Ok(pool)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.security.cors.allow_credentials);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: API routes, uploaded images, API docs, CORS and tracing.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let uploads = &state.config.uploads;
    // Every image at its maximum size plus room for the listing part and multipart framing
    let listing_body_limit = uploads.max_images.saturating_mul(uploads.max_image_bytes).saturating_add(1024 * 1024);
    let blog_body_limit = uploads.max_image_bytes.saturating_add(1024 * 1024);

    let auth_routes = Router::new()
        .route("/auth/sign-up", post(auth_handlers::sign_up))
        .route("/auth/sign-in", post(auth_handlers::sign_in))
        .route("/auth/verify-otp", post(auth_handlers::verify_otp))
        .route("/auth/resend-otp", post(auth_handlers::resend_otp))
        .route("/auth/forgot-password", post(auth_handlers::forgot_password))
        .route("/auth/reset-password", post(auth_handlers::reset_password))
        .route("/auth/forgot-password/otp", post(auth_handlers::forgot_password_otp))
        .route("/auth/reset-password/otp", post(auth_handlers::reset_password_otp))
        .route("/auth/me", get(auth_handlers::me));

    let user_routes = Router::new()
        .route("/users", get(users::list_users))
        .route(
            "/users/{user_id}",
            get(users::get_user).patch(users::update_user).delete(users::delete_user),
        )
        .route("/users/{user_id}/role", patch(users::update_role))
        .route(
            "/users/{user_id}/permissions",
            get(permissions::get_user_permissions).put(permissions::replace_user_permissions),
        );

    let listing_routes = Router::new()
        .route(
            "/listings",
            post(listings::create_listing)
                .layer(DefaultBodyLimit::max(listing_body_limit))
                .get(listings::list_listings),
        )
        .route(
            "/listings/{listing_id}",
            get(listings::get_listing)
                .patch(listings::update_listing)
                .delete(listings::delete_listing),
        )
        .route("/listings/{listing_id}/approval", patch(listings::set_listing_approval));

    let reference_routes = Router::new()
        .route("/amenities", get(amenities::list).post(amenities::create))
        .route(
            "/amenities/{id}",
            get(amenities::get).patch(amenities::update).delete(amenities::delete),
        )
        .route("/categories", get(categories::list).post(categories::create))
        .route(
            "/categories/{id}",
            get(categories::get).patch(categories::update).delete(categories::delete),
        )
        .route("/statuses", get(statuses::list).post(statuses::create))
        .route(
            "/statuses/{id}",
            get(statuses::get).patch(statuses::update).delete(statuses::delete),
        );

    let blog_routes = Router::new()
        .route(
            "/blogs",
            post(blogs::create_blog)
                .layer(DefaultBodyLimit::max(blog_body_limit))
                .get(blogs::list_blogs),
        )
        .route(
            "/blogs/{blog_id}",
            get(blogs::get_blog)
                .patch(blogs::update_blog)
                .layer(DefaultBodyLimit::max(blog_body_limit))
                .delete(blogs::delete_blog),
        );

    let cors_layer = create_cors_layer(&state.config)?;
    let uploads_service = ServeDir::new(&uploads.dir);

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(auth_routes)
        .merge(user_routes)
        .merge(listing_routes)
        .merge(reference_routes)
        .merge(blog_routes)
        .with_state(state)
        .nest_service("/uploads", uploads_service)
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(pool: SqlitePool, config: &Config, outbox: OutboxDispatcher) -> BackgroundServices {
    let shutdown_token = CancellationToken::new();
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();
    let services = &config.background_services;

    if services.outbox.enabled {
        let token = shutdown_token.clone();
        background_tasks.push(tokio::spawn(outbox.run(token)));
    } else {
        info!("Outbox dispatcher disabled; emails are only sent right after commit");
    }

    if services.expiry_sweep.enabled {
        let token = shutdown_token.clone();
        background_tasks.push(tokio::spawn(sweeper::run_expiry_sweeper(
            pool,
            services.expiry_sweep.clone(),
            token,
        )));
    } else {
        info!("Expiry sweeper disabled");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

pub struct Application {
    router: Router,
    config: Config,
    pool: SqlitePool,
    bg_services: BackgroundServices,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None, None).await
    }

    /// Build the application, optionally on an existing pool and with a substitute mailer.
    pub async fn new_with_pool(config: Config, pool: Option<SqlitePool>, mailer: Option<Arc<dyn Mailer>>) -> anyhow::Result<Self> {
        debug!("Starting proppick with configuration: {:#?}", config);

        let pool = match pool {
            Some(pool) => pool,
            None => setup_database(&config).await?,
        };

        if let Some(admin_password) = config.admin_password.as_deref() {
            create_initial_admin_user(&config.admin_email, admin_password, &pool, &config).await?;
        }

        let mailer = match mailer {
            Some(mailer) => mailer,
            None => Arc::new(EmailService::new(&config)?),
        };
        let outbox = OutboxDispatcher::new(pool.clone(), mailer, &config.background_services.outbox);
        let storage = LocalFileStorage::new(&config.uploads)?;

        let bg_services = setup_background_services(pool.clone(), &config, outbox.clone());

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .storage(Arc::new(storage))
            .outbox(outbox)
            .build();
        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("proppick listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::create_initial_admin_user;
    use crate::{
        auth::password,
        db::{
            handlers::{Permissions, Users},
            models::users::Role,
        },
        test_utils::*,
    };
    use axum::http::StatusCode;
    use sqlx::SqlitePool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_initial_admin_is_idempotent(pool: SqlitePool) {
        let config = create_test_config();

        let first = create_initial_admin_user("Boot@Example.com", "first password", &pool, &config).await.unwrap();
        let second = create_initial_admin_user("boot@example.com", "second password", &pool, &config).await.unwrap();
        assert_eq!(first, second);

        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).get_user_by_email("boot@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(user.is_verified);
        let hash = user.password_hash.unwrap();
        assert!(password::verify_password("second password".to_string(), hash.clone()).await.unwrap());
        assert!(!password::verify_password("first password".to_string(), hash).await.unwrap());
        assert!(Permissions::new(&mut conn).get_for_user(user.id).await.unwrap().is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_initial_admin_promotes_existing_user(pool: SqlitePool) {
        let config = create_test_config();
        let user = create_test_user(&pool, Role::User).await;

        let id = create_initial_admin_user(&user.email, "new password", &pool, &config).await.unwrap();
        assert_eq!(id, user.id);

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Users::new(&mut conn).get_role(user.id).await.unwrap(), Some(Role::Admin));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_service_endpoints(pool: SqlitePool) {
        let (app, _mailer) = create_test_app(pool).await;

        app.get("/healthz").await.assert_status_ok();

        let doc = app.get("/api-docs/openapi.json").await;
        doc.assert_status_ok();
        let doc: serde_json::Value = doc.json();
        assert!(doc["paths"]["/listings"].is_object());

        app.get("/docs").await.assert_status_ok();
        app.get("/uploads/does-not-exist.png").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cors_preflight_allows_configured_origin(pool: SqlitePool) {
        let mut config = create_test_config();
        config.auth.security.cors.allowed_origins = vec![crate::config::CorsOrigin::Url(
            url::Url::parse("https://app.example.com").unwrap(),
        )];
        let (app, _mailer) = create_test_app_with_config(pool, config).await;

        let response = app
            .method(axum::http::Method::OPTIONS, "/listings")
            .add_header("origin", "https://app.example.com")
            .add_header("access-control-request-method", "GET")
            .await;
        assert_eq!(
            response.header("access-control-allow-origin").to_str().unwrap(),
            "https://app.example.com"
        );
    }
}
