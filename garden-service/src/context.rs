use crate::auth::AllowList;
use crate::pages::{EditorSessions, PageBackend, PgPageStore};
use anyhow::{Context, Result};
use garden_store::{DEFAULT_DEBOUNCE, MemoryPageStore};
use oauth2::CsrfToken;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_EDITOR_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Identity provider client registration, read from the `IDP_CONFIG` JSON file.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct IdpConfig {
    pub client_id: String,
    pub client_secret: String,
    pub issuer_url: String,
    pub redirect_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "email".to_string(), "profile".to_string()]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Application profile name (e.g., "dev", "prod")
    pub profile: String,
    pub bind_addr: String,
    /// Canonical public URL; every auth redirect is absolute against it.
    pub app_url: Url,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    /// Static allow-list used by the memory backend.
    pub allowed_emails: Vec<String>,
    pub session_secret: String,
    pub session_max_age_seconds: i64,
    pub cookie_secure: bool,
    pub autosave_debounce: Duration,
    /// Mounted editors untouched for this long are torn down.
    pub editor_idle_timeout: Duration,
    pub idp: Option<IdpConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let profile = var("PROFILE").unwrap_or_else(|| "dev".to_string());
        let dev = profile == "dev";

        let app_url = var("APP_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        let app_url = Url::parse(&app_url).context("APP_URL is not a valid URL")?;

        let database_url = var("DATABASE_URL");
        let store_backend = match var("STORE_BACKEND").as_deref() {
            Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => anyhow::bail!("unknown STORE_BACKEND: {}", other),
            None if database_url.is_some() => StoreBackend::Postgres,
            None => StoreBackend::Memory,
        };
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set for the postgres backend");
        }

        let session_secret = match var("SESSION_SECRET") {
            Some(secret) => secret,
            None if dev => {
                tracing::warn!("SESSION_SECRET not set, using a random secret for this process");
                CsrfToken::new_random().secret().clone()
            }
            None => anyhow::bail!("SESSION_SECRET must be set outside the dev profile"),
        };

        let session_max_age_seconds = var("SESSION_MAX_AGE_SECONDS")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("SESSION_MAX_AGE_SECONDS must be a number")?
            .unwrap_or(86_400);

        let cookie_secure = var("COOKIE_SECURE")
            .map(|v| v.parse::<bool>())
            .transpose()
            .context("COOKIE_SECURE must be true or false")?
            .unwrap_or(!dev);

        let autosave_debounce = var("AUTOSAVE_DEBOUNCE_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("AUTOSAVE_DEBOUNCE_MS must be a number")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE);

        let editor_idle_timeout = var("EDITOR_IDLE_TIMEOUT_SECONDS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("EDITOR_IDLE_TIMEOUT_SECONDS must be a number")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EDITOR_IDLE_TIMEOUT);
        if editor_idle_timeout <= autosave_debounce {
            anyhow::bail!("EDITOR_IDLE_TIMEOUT_SECONDS must be longer than the auto-save debounce");
        }

        let allowed_emails = var("ALLOWED_EMAILS")
            .map(|list| {
                list.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let idp = match var("IDP_CONFIG") {
            Some(path) => Some(get_idp_config(&path)?),
            None => {
                tracing::warn!("IDP_CONFIG not set, sign-in is disabled");
                None
            }
        };

        Ok(Self {
            profile,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            app_url,
            store_backend,
            database_url,
            allowed_emails,
            session_secret,
            session_max_age_seconds,
            cookie_secure,
            autosave_debounce,
            editor_idle_timeout,
            idp,
        })
    }
}

pub fn get_idp_config(path: &str) -> Result<IdpConfig> {
    let config_path = std::env::current_dir()?.join(path);
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse identity provider config")
}

/// Application context that holds shared resources
#[derive(Clone)]
pub struct Ctx {
    pub config: Arc<AppConfig>,
    pub pages: Arc<PageBackend>,
    pub allow_list: AllowList,
    pub editors: EditorSessions,
    /// HTTP client for identity provider calls
    pub http: reqwest::Client,
}

impl Ctx {
    /// Create a new application context
    pub async fn new() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let config = AppConfig::from_env()?;
        tracing::info!("Starting application with profile: {}", config.profile);

        match config.store_backend {
            StoreBackend::Postgres => {
                let database_url = config.database_url.clone().unwrap_or_default();
                let db = pg_pool(&database_url).await?;
                crate::schema::migrate(&db).await?;
                Self::with_backend(
                    config,
                    PageBackend::Postgres(PgPageStore::new(db.clone())),
                    AllowList::Postgres(db),
                )
            }
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory page store; pages are lost on restart");
                let allow_list = AllowList::from_emails(config.allowed_emails.iter());
                Self::with_backend(
                    config,
                    PageBackend::Memory(MemoryPageStore::new()),
                    allow_list,
                )
            }
        }
    }

    /// Context over the memory backend, without touching the environment.
    pub fn in_memory(config: AppConfig) -> Result<Self> {
        let allow_list = AllowList::from_emails(config.allowed_emails.iter());
        Self::with_backend(
            config,
            PageBackend::Memory(MemoryPageStore::new()),
            allow_list,
        )
    }

    fn with_backend(
        config: AppConfig,
        pages: PageBackend,
        allow_list: AllowList,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            editors: EditorSessions::new(config.autosave_debounce, config.editor_idle_timeout),
            config: Arc::new(config),
            pages: Arc::new(pages),
            allow_list,
            http,
        })
    }
}

async fn pg_pool(database_url: &str) -> Result<PgPool> {
    tracing::info!("Connecting to database");

    let db = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    // Test database connection
    sqlx::query("SELECT 1").execute(&db).await?;
    tracing::info!("Database connection established successfully");

    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_dev_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.profile, "dev");
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.app_url.as_str(), "http://localhost:3000/");
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.session_max_age_seconds, 86_400);
        assert_eq!(config.autosave_debounce, Duration::from_millis(1000));
        assert_eq!(config.editor_idle_timeout, Duration::from_secs(1800));
        assert!(!config.cookie_secure);
        assert!(!config.session_secret.is_empty());
        assert!(config.idp.is_none());
    }

    #[test]
    fn test_database_url_selects_postgres() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/garden")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Postgres);

        let forced = config_from(&[
            ("DATABASE_URL", "postgres://localhost/garden"),
            ("STORE_BACKEND", "memory"),
        ])
        .unwrap();
        assert_eq!(forced.store_backend, StoreBackend::Memory);

        assert!(config_from(&[("STORE_BACKEND", "postgres")]).is_err());
    }

    #[test]
    fn test_prod_requires_secret() {
        assert!(config_from(&[("PROFILE", "prod")]).is_err());

        let config = config_from(&[("PROFILE", "prod"), ("SESSION_SECRET", "s3cret")]).unwrap();
        assert!(config.cookie_secure);
        assert_eq!(config.session_secret, "s3cret");
    }

    #[test]
    fn test_allowed_emails_are_normalized() {
        let config = config_from(&[
            ("ALLOWED_EMAILS", " Ada@Example.com, ,grace@example.com "),
            ("AUTOSAVE_DEBOUNCE_MS", "250"),
        ])
        .unwrap();

        assert_eq!(
            config.allowed_emails,
            vec!["ada@example.com".to_string(), "grace@example.com".to_string()]
        );
        assert_eq!(config.autosave_debounce, Duration::from_millis(250));
    }

    #[test]
    fn test_editor_idle_timeout_must_outlast_debounce() {
        let config = config_from(&[("EDITOR_IDLE_TIMEOUT_SECONDS", "90")]).unwrap();
        assert_eq!(config.editor_idle_timeout, Duration::from_secs(90));

        assert!(
            config_from(&[
                ("EDITOR_IDLE_TIMEOUT_SECONDS", "1"),
                ("AUTOSAVE_DEBOUNCE_MS", "5000"),
            ])
            .is_err()
        );
        assert!(config_from(&[("EDITOR_IDLE_TIMEOUT_SECONDS", "soon")]).is_err());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(config_from(&[("SESSION_MAX_AGE_SECONDS", "a day")]).is_err());
        assert!(config_from(&[("APP_URL", "not a url")]).is_err());
    }
}
