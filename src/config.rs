//! Configuration loaded from environment variables

use crate::store::SchemaLayout;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_UPDATE_BASE_URL: &str =
    "https://prod.publicdata.landregistry.gov.uk.s3-website-eu-west-1.amazonaws.com/pp-monthly-update";
pub const DEFAULT_COMPLETE_URL: &str =
    "https://prod.publicdata.landregistry.gov.uk.s3-website-eu-west-1.amazonaws.com/pp-complete.csv";

pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Silent fallback to the local file is a development convenience only
    pub fn allows_fallback(&self) -> bool {
        *self == Environment::Development
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Local,
    Remote,
}

/// Download retry budget
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(5000),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database_backend: DatabaseBackend,
    pub local_database_url: String,
    pub remote_database_url: Option<String>,
    pub remote_auth_token: Option<String>,
    pub schema_layout: SchemaLayout,
    pub update_base_url: String,
    pub complete_url: String,
    pub temp_dir: PathBuf,
    pub batch_size: usize,
    pub fetch: FetchOptions,
    pub publication_lag_months: u32,
    pub cron_secret: Option<String>,
    pub bind_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            database_backend: DatabaseBackend::Local,
            local_database_url: "sqlite:land_registry.db".to_string(),
            remote_database_url: None,
            remote_auth_token: None,
            schema_layout: SchemaLayout::Natural,
            update_base_url: DEFAULT_UPDATE_BASE_URL.to_string(),
            complete_url: DEFAULT_COMPLETE_URL.to_string(),
            temp_dir: env::temp_dir().join("land_registry_ingestion"),
            batch_size: 100,
            fetch: FetchOptions::default(),
            publication_lag_months: 1,
            cron_secret: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").as_deref().map(str::to_ascii_lowercase) {
            None => defaults.environment,
            Some(v) if v == "development" || v == "dev" => Environment::Development,
            Some(v) if v == "production" || v == "prod" => Environment::Production,
            Some(v) => bail!("APP_ENV must be development or production, got {}", v),
        };

        let database_backend = match get("DATABASE_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => defaults.database_backend,
            Some(v) if v == "local" => DatabaseBackend::Local,
            Some(v) if v == "remote" => DatabaseBackend::Remote,
            Some(v) => bail!("DATABASE_BACKEND must be local or remote, got {}", v),
        };

        let schema_layout = match get("SCHEMA_LAYOUT") {
            Some(v) => v.parse::<SchemaLayout>().map_err(|e| anyhow!(e))?,
            None => defaults.schema_layout,
        };

        let config = Config {
            environment,
            database_backend,
            local_database_url: get("LOCAL_DATABASE_URL").unwrap_or(defaults.local_database_url),
            remote_database_url: get("REMOTE_DATABASE_URL"),
            remote_auth_token: get("REMOTE_AUTH_TOKEN"),
            schema_layout,
            update_base_url: get("PPD_UPDATE_BASE_URL").unwrap_or(defaults.update_base_url),
            complete_url: get("PPD_COMPLETE_URL").unwrap_or(defaults.complete_url),
            temp_dir: get("TEMP_DIR").map(PathBuf::from).unwrap_or(defaults.temp_dir),
            batch_size: parse_or(get("BATCH_SIZE"), "BATCH_SIZE", defaults.batch_size)?,
            fetch: FetchOptions {
                max_retries: parse_or(
                    get("DOWNLOAD_MAX_RETRIES"),
                    "DOWNLOAD_MAX_RETRIES",
                    defaults.fetch.max_retries,
                )?,
                initial_backoff: Duration::from_millis(parse_or(
                    get("DOWNLOAD_BACKOFF_MS"),
                    "DOWNLOAD_BACKOFF_MS",
                    defaults.fetch.initial_backoff.as_millis() as u64,
                )?),
                attempt_timeout: Duration::from_secs(parse_or(
                    get("DOWNLOAD_TIMEOUT_SECS"),
                    "DOWNLOAD_TIMEOUT_SECS",
                    defaults.fetch.attempt_timeout.as_secs(),
                )?),
            },
            publication_lag_months: parse_or(
                get("PUBLICATION_LAG_MONTHS"),
                "PUBLICATION_LAG_MONTHS",
                defaults.publication_lag_months,
            )?,
            cron_secret: get("CRON_SECRET"),
            bind_addr: parse_or(get("BIND_ADDR"), "BIND_ADDR", defaults.bind_addr)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            bail!("BATCH_SIZE must be between 1 and {}", MAX_BATCH_SIZE);
        }
        if self.fetch.max_retries == 0 {
            bail!("DOWNLOAD_MAX_RETRIES must be at least 1");
        }
        if self.database_backend == DatabaseBackend::Remote && self.remote_database_url.is_none() {
            bail!("REMOTE_DATABASE_URL must be set when DATABASE_BACKEND=remote");
        }
        Ok(())
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("{} must be a valid value, got {:?}", key, v)),
        None => Ok(default),
    }
}
