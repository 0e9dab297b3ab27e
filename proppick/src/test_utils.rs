//! Test utilities shared by the unit and HTTP tests.

use std::sync::{Arc, Mutex};

use axum_test::TestServer;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppState, Application,
    api::models::users::CurrentUser,
    auth::{password, session},
    config::{
        BackgroundServicesConfig, Config, EmailConfig, EmailTransportConfig, ExpirySweepConfig, OutboxConfig, PasswordConfig,
        UploadsConfig,
    },
    db::{
        handlers::{Permissions, Repository, Users},
        models::users::{Role, UserCreateDBRequest, UserDBResponse},
    },
    email::Mailer,
    errors::Error,
    outbox::OutboxDispatcher,
    storage::LocalFileStorage,
};

pub const TEST_PASSWORD: &str = "correct horse battery";

pub fn create_test_config() -> Config {
    let temp_dir = std::env::temp_dir().join(format!("proppick-test-{}", std::process::id()));

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        admin_password: None,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: crate::config::AuthConfig {
            native: crate::config::NativeAuthConfig {
                password: PasswordConfig {
                    // Cheap hashing keeps the suite fast
                    argon2_memory_kib: 128,
                    argon2_iterations: 1,
                    argon2_parallelism: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        },
        email: EmailConfig {
            transport: EmailTransportConfig::File {
                path: temp_dir.join("emails").to_string_lossy().to_string(),
            },
            ..Default::default()
        },
        uploads: UploadsConfig {
            dir: temp_dir.join("uploads"),
            ..Default::default()
        },
        background_services: BackgroundServicesConfig {
            outbox: OutboxConfig {
                enabled: false,
                ..Default::default()
            },
            expiry_sweep: ExpirySweepConfig {
                enabled: false,
                ..Default::default()
            },
        },
        ..Default::default()
    }
}

/// State for exercising extractors directly, with a recording mailer.
pub fn create_test_app_state(pool: SqlitePool) -> AppState {
    let config = create_test_config();
    let storage = LocalFileStorage::new(&config.uploads).expect("Failed to create upload storage");
    let outbox = OutboxDispatcher::new(
        pool.clone(),
        Arc::new(RecordingMailer::default()),
        &config.background_services.outbox,
    );

    AppState::builder()
        .db(pool)
        .config(config)
        .storage(Arc::new(storage))
        .outbox(outbox)
        .build()
}

/// Full application behind an in-process server. The mailer records what the outbox sends.
pub async fn create_test_app(pool: SqlitePool) -> (TestServer, Arc<RecordingMailer>) {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: SqlitePool, config: Config) -> (TestServer, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::default());
    let app = Application::new_with_pool(config, Some(pool), Some(mailer.clone()))
        .await
        .expect("Failed to create application");
    let (server, _bg_services) = app.into_test_server();
    (server, mailer)
}

/// A verified user with [`TEST_PASSWORD`] and the default permission set.
pub async fn create_test_user(pool: &SqlitePool, role: Role) -> UserDBResponse {
    let config = create_test_config();
    let password_hash =
        password::hash_password_blocking(TEST_PASSWORD, config.auth.native.password.argon2_params()).expect("Failed to hash password");

    let mut tx = pool.begin().await.expect("Failed to begin transaction");
    let user = Users::new(&mut tx)
        .create(&UserCreateDBRequest {
            email: format!("testuser_{}@example.com", Uuid::new_v4().simple()),
            password_hash: Some(password_hash),
            full_name: "Test User".to_string(),
            phone: None,
            role,
            is_verified: true,
        })
        .await
        .expect("Failed to create test user");
    Permissions::new(&mut tx)
        .create(user.id, &config.auth.default_permission_set())
        .await
        .expect("Failed to create test permissions");
    tx.commit().await.expect("Failed to commit test user");

    user
}

pub async fn create_test_admin_user(pool: &SqlitePool) -> UserDBResponse {
    create_test_user(pool, Role::Admin).await
}

/// `(header name, header value)` authenticating as `user` against [`create_test_config`].
pub fn auth_header(user: &UserDBResponse) -> (String, String) {
    let token = session::create_session_token(&CurrentUser::from(user.clone()), &create_test_config()).expect("Failed to create token");
    ("authorization".to_string(), format!("Bearer {token}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }

    /// The six-digit code in the most recent message to `to`.
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        let sent = self.sent();
        let message = sent.iter().rev().find(|m| m.to == to)?;
        let start = message.html_body.find("class=\"code\">")? + "class=\"code\">".len();
        Some(message.html_body[start..].chars().take_while(char::is_ascii_digit).collect())
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), Error> {
        self.sent.lock().expect("mailer lock poisoned").push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}

/// Always fails, as an unreachable SMTP server would.
pub struct FailingMailer;

#[async_trait::async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), Error> {
        Err(Error::Internal {
            operation: "send email: connection refused".to_string(),
        })
    }
}
