//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `PROPPICK_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Later sources override earlier ones:
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `PROPPICK_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested values use double underscores, e.g. `PROPPICK_AUTH__NATIVE__OTP__TTL=5m`.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use proppick::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//! println!("Server will bind to {}", config.bind_address());
//! # Ok(())
//! # }
//! ```
//!
//! ## Sections
//!
//! - **Server**: `host`, `port`
//! - **Database**: `database.url`, `database.pool`
//! - **Admin User**: `admin_email`, `admin_password` - bootstrap admin created on startup
//! - **Authentication**: `auth.native` (registration, passwords, OTP and reset-token lifetimes),
//!   `auth.security` (JWT, CORS), `auth.default_permissions`, `auth.resource_mutation`
//! - **Email**: `email` - transport and sender identity
//! - **Uploads**: `uploads` - where listing images go and how big they may be
//! - **Background Services**: `background_services.outbox`, `background_services.expiry_sweep`

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::db::models::permissions::{RoutePermission, RoutePermissionSet};
use crate::errors::Error;
use crate::types::route;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PROPPICK_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty file plus `secret_key` is a valid configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL of the web frontend, used for links in emails
    pub frontend_url: Url,
    /// Set from the `DATABASE_URL` environment variable; folded into `database.url` on load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    /// Email address for the bootstrap admin user
    pub admin_email: String,
    /// Password for the bootstrap admin user. No admin is created when unset.
    pub admin_password: Option<String>,
    /// Secret key for JWT signing (required)
    pub secret_key: Option<String>,
    pub auth: AuthConfig,
    pub email: EmailConfig,
    pub uploads: UploadsConfig,
    pub background_services: BackgroundServicesConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    pub pool: PoolSettings,
}

/// Connection pool parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Maximum time to wait for a connection
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// How long SQLite waits on a locked database before giving up
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Authentication and authorization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub native: NativeAuthConfig,
    pub security: SecurityConfig,
    /// Route permissions every new user starts with
    pub default_permissions: Vec<RoutePermission>,
    /// Who may update or delete a resource owned by someone else
    pub resource_mutation: ResourceMutationPolicy,
}

/// Policy for update/delete on user-owned resources such as listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMutationPolicy {
    /// Only the owner or an admin. A granted permission flag does not extend to other users' resources.
    #[default]
    OwnerOrAdmin,
    /// Owner, admin, or any user whose permission entry grants the action
    OwnerAdminOrPermission,
}

/// Email/password accounts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NativeAuthConfig {
    /// Enable email/password sign-in. The admin bootstrap still runs when disabled.
    pub enabled: bool,
    /// Allow new users to self-register
    pub allow_registration: bool,
    /// Refuse sign-in until the registration code has been verified
    pub require_verified_login: bool,
    pub password: PasswordConfig,
    pub otp: OtpConfig,
    /// How long password reset links are valid
    #[serde(with = "humantime_serde")]
    pub reset_token_ttl: Duration,
}

/// Password validation rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub max_length: usize,
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtpConfig {
    /// How long an issued code stays valid
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

/// Security configuration for JWT and CORS.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    #[serde(with = "humantime_serde")]
    pub jwt_expiry: Duration,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// Either `*` or a specific origin URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Email configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// Note: Cannot use deny_unknown_fields here due to #[serde(flatten)] on transport
pub struct EmailConfig {
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    pub from_email: String,
    pub from_name: String,
    pub reply_to: Option<String>,
}

/// Either SMTP or file-based for development.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
        use_tls: bool,
    },
    /// Write emails to files
    File { path: String },
}

/// Listing image uploads.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Directory images are written to and served from
    pub dir: PathBuf,
    /// Public URL prefix under which `dir` is reachable
    pub public_base_url: Url,
    pub max_image_bytes: usize,
    pub max_images: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundServicesConfig {
    pub outbox: OutboxConfig,
    pub expiry_sweep: ExpirySweepConfig,
}

/// Email outbox dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutboxConfig {
    /// Run the background retry loop. Messages are still sent right after commit when disabled.
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Maximum messages claimed per tick
    pub claim_batch_size: i64,
    /// How long a claim is held before another sender may retry it
    #[serde(with = "humantime_serde")]
    pub claim_timeout: Duration,
    /// Delay after the 1st, 2nd, ... failed attempt. The message is marked failed once exhausted.
    pub retry_schedule_secs: Vec<u64>,
}

impl OutboxConfig {
    pub fn retry_schedule(&self) -> Vec<Duration> {
        self.retry_schedule_secs.iter().copied().map(Duration::from_secs).collect()
    }
}

/// Periodic removal of dead OTPs, reset tokens and delivered emails.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpirySweepConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long sent emails are kept
    #[serde(with = "humantime_serde")]
    pub outbox_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            frontend_url: Url::parse("http://localhost:5173").expect("static URL"),
            database_url: None,
            database: DatabaseConfig::default(),
            admin_email: "admin@proppick.local".to_string(),
            admin_password: None,
            secret_key: None,
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            uploads: UploadsConfig::default(),
            background_services: BackgroundServicesConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://proppick.db?mode=rwc".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            native: NativeAuthConfig::default(),
            security: SecurityConfig::default(),
            default_permissions: [route::AMENITIES, route::CATEGORIES, route::STATUS, route::LIST_PROPERTY, route::BLOGS]
                .into_iter()
                .map(RoutePermission::read_only)
                .collect(),
            resource_mutation: ResourceMutationPolicy::default(),
        }
    }
}

impl AuthConfig {
    pub fn default_permission_set(&self) -> RoutePermissionSet {
        RoutePermissionSet(self.default_permissions.clone())
    }
}

impl Default for NativeAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_registration: true,
            require_verified_login: true,
            password: PasswordConfig::default(),
            otp: OtpConfig::default(),
            reset_token_ttl: Duration::from_secs(15 * 60),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            max_length: 128,
            argon2_memory_kib: 19456,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

impl PasswordConfig {
    pub fn argon2_params(&self) -> crate::auth::password::Argon2Params {
        crate::auth::password::Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_expiry: Duration::from_secs(24 * 60 * 60),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Url(Url::parse("http://localhost:5173").expect("static URL"))],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            from_email: "noreply@proppick.local".to_string(),
            from_name: "Property Picker".to_string(),
            reply_to: None,
        }
    }
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self::File {
            path: "./emails".to_string(),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./uploads"),
            public_base_url: Url::parse("http://localhost:3000/uploads/").expect("static URL"),
            max_image_bytes: 5 * 1024 * 1024,
            max_images: 10,
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(5),
            claim_batch_size: 25,
            claim_timeout: Duration::from_secs(120),
            retry_schedule_secs: vec![30, 120, 600, 3600],
        }
    }
}

impl Default for ExpirySweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15 * 60),
            outbox_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Internal {
        operation: format!("Config validation: {}", message.into()),
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.as_deref().is_none_or(str::is_empty) {
            return Err(invalid(
                "secret_key is not configured. Set PROPPICK_SECRET_KEY or add secret_key to the config file.",
            ));
        }

        let password = &self.auth.native.password;
        if password.min_length < 1 {
            return Err(invalid("password min_length must be at least 1"));
        }
        if password.min_length > password.max_length {
            return Err(invalid(format!(
                "password min_length ({}) cannot be greater than max_length ({})",
                password.min_length, password.max_length
            )));
        }

        if self.auth.native.otp.ttl.is_zero() {
            return Err(invalid("auth.native.otp.ttl must be positive"));
        }
        if self.auth.native.reset_token_ttl.is_zero() {
            return Err(invalid("auth.native.reset_token_ttl must be positive"));
        }

        if self.auth.security.jwt_expiry.as_secs() < 300 {
            return Err(invalid("JWT expiry duration is too short (minimum 5 minutes)"));
        }
        if self.auth.security.jwt_expiry.as_secs() > 86400 * 30 {
            return Err(invalid("JWT expiry duration is too long (maximum 30 days)"));
        }

        self.auth
            .default_permission_set()
            .validate()
            .map_err(|e| invalid(format!("auth.default_permissions: {e}")))?;

        if self.auth.security.cors.allowed_origins.is_empty() {
            return Err(invalid("CORS allowed_origins cannot be empty"));
        }
        let has_wildcard = self
            .auth
            .security
            .cors
            .allowed_origins
            .iter()
            .any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.auth.security.cors.allow_credentials {
            return Err(invalid(
                "CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins.",
            ));
        }

        let outbox = &self.background_services.outbox;
        if outbox.retry_schedule_secs.is_empty() {
            return Err(invalid("background_services.outbox.retry_schedule_secs cannot be empty"));
        }
        if outbox.claim_batch_size < 1 {
            return Err(invalid("background_services.outbox.claim_batch_size must be at least 1"));
        }

        if self.uploads.max_images == 0 || self.uploads.max_image_bytes == 0 {
            return Err(invalid("uploads.max_images and uploads.max_image_bytes must be positive"));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("PROPPICK_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
