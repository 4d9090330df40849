//! Common test utilities for end-to-end tests.

use arportal::{AppState, config};
use base64::Engine;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// A running instance of the application bound to a random port, backed
/// by a throwaway SQLite database and a throwaway local storage folder.
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub client: reqwest::Client,
    _temp_dir: TempDir,
}

fn test_encryption_key() -> String {
    base64::engine::general_purpose::STANDARD.encode([7u8; 32])
}

impl TestServer {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let storage_path = temp_dir.path().join("storage");

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                public_base_url: "http://127.0.0.1:0".to_string(),
            },
            database: config::DatabaseConfig { path: db_path.clone(), pool_size: 5 },
            storage: config::StorageConfig {
                local_base_path: storage_path,
                s3: config::S3DefaultsConfig::default(),
                oauth: config::OAuthProvidersConfig::default(),
            },
            pipeline: config::PipelineConfig {
                compiler_path: "/bin/true".into(),
                compiler_max_features: 2000,
                compiler_timeout_seconds: 5,
                markers_workers: 1,
                notifications_workers: 1,
                default_queue_workers: 1,
                max_retries: 3,
                backoff_base_seconds: 1,
                shutdown_grace_seconds: 1,
            },
            scheduler: config::SchedulerConfig {
                expiry_warning_hour_utc: 9,
                deactivation_interval_seconds: 3600,
                rotation_interval_seconds: 3600,
            },
            credentials: config::CredentialsConfig {
                encryption_key_base64: test_encryption_key(),
                refresh_lookahead_seconds: 300,
                refresh_tick_seconds: 3600,
            },
            auth: config::AuthConfig {
                admin_username: "testadmin".to_string(),
                admin_password: "test-password".to_string(),
                session_secret: "test-session-secret-at-least-32-bytes".to_string(),
                session_max_age: 604800,
            },
            logging: config::LoggingConfig { level: "error".to_string(), format: "pretty".to_string() },
        };

        let state = AppState::new(config).await.expect("app state should initialize");

        let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(10)).build().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{addr}");

        let app = build_test_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        Self { addr: addr_str, state, client, _temp_dir: temp_dir }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Mint a valid admin session cookie value, bypassing the real login
    /// request.
    pub fn admin_session_cookie(&self) -> String {
        use arportal::auth::create_session_token;
        use arportal::auth::Session;
        use chrono::{Duration, Utc};

        let session = Session {
            username: self.state.config.auth.admin_username.clone(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(7),
        };
        create_session_token(&session, &self.state.config.auth.session_secret).unwrap()
    }

    /// Seed a client-company local storage connection, a company, and an
    /// active project; returns their ids. The default connection and
    /// default company are already seeded by `AppState::new`.
    pub async fn seed_company_and_project(&self) -> (i64, i64) {
        use arportal::data::{Company, Project, ProjectStatus, StorageConnection, StorageProviderKind};
        use chrono::Utc;

        let now = Utc::now();
        let mut client_connection = StorageConnection {
            id: 0,
            name: "client-local".to_string(),
            provider: StorageProviderKind::Local.as_str().to_string(),
            credentials_encrypted: self.state.credentials.encrypt_static_credentials(&Default::default()).unwrap(),
            base_path: "acme-ar".to_string(),
            is_default: false,
            is_active: true,
            last_tested_at: None,
            test_status: None,
            test_error: None,
            created_at: now,
            updated_at: now,
        };
        client_connection.id = self.state.db.insert_storage_connection(&client_connection).await.unwrap();

        let mut company = Company {
            id: 0,
            name: "Acme AR".to_string(),
            slug: "acme-ar".to_string(),
            contact_email: "ops@acme.example".to_string(),
            storage_connection_id: client_connection.id,
            storage_path: "acme-ar".to_string(),
            storage_quota_bytes: 1024 * 1024 * 1024,
            storage_used_bytes: 0,
            subscription_tier: "free".to_string(),
            subscription_expires_at: None,
            is_active: true,
            storage_status: "ok".to_string(),
            created_at: now,
            updated_at: now,
        };
        company.id = self.state.db.insert_company(&company).await.unwrap();

        let mut project = Project {
            id: 0,
            company_id: company.id,
            name: "Spring Campaign".to_string(),
            starts_at: now,
            expires_at: None,
            status: ProjectStatus::Active.as_str().to_string(),
            notify_before_expiry_days: 7,
            last_notification_sent_at: None,
            created_at: now,
            updated_at: now,
        };
        project.id = self.state.db.insert_project(&project).await.unwrap();

        (company.id, project.id)
    }
}

fn build_test_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(|| async { "OK" }))
        .merge(arportal::auth::auth_router())
        .nest("/", arportal::api::public_router())
        .nest("/admin", arportal::api::admin_router())
        .nest("/oauth", arportal::api::oauth_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(arportal::api::metrics_router())
}
