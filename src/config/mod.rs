//! Configuration loading for the data sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `DATASYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vault::KeyPolicy;

/// Prefix stripped from every recognised environment key.
pub const ENV_PREFIX: &str = "DATASYNC_";

/// Application configuration derived from `DATASYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Upstream store the extractor reads from; falls back to `database_url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_database_url: Option<String>,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub bigquery: BigQueryApiConfig,
}

/// Timeouts and concurrency for sync runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Upper bound for a connection test, in seconds
    ///
    /// Environment variable: `DATASYNC_SYNC_CONNECT_TIMEOUT_SECS`
    #[serde(default = "default_sync_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound for one provider load, in seconds
    ///
    /// Environment variable: `DATASYNC_SYNC_LOAD_TIMEOUT_SECS`
    #[serde(default = "default_sync_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// Tenants synced in parallel by `sync_all` (1 = sequential)
    ///
    /// Environment variable: `DATASYNC_SYNC_TENANT_CONCURRENCY`
    #[serde(default = "default_sync_tenant_concurrency")]
    pub tenant_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_sync_connect_timeout_secs(),
            load_timeout_secs: default_sync_load_timeout_secs(),
            tenant_concurrency: default_sync_tenant_concurrency(),
        }
    }
}

impl SyncConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    /// Validate sync bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "SYNC_CONNECT_TIMEOUT_SECS",
            });
        }
        if self.load_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "SYNC_LOAD_TIMEOUT_SECS",
            });
        }
        if !(1..=32).contains(&self.tenant_concurrency) {
            return Err(ConfigError::InvalidTenantConcurrency {
                value: self.tenant_concurrency,
            });
        }
        Ok(())
    }
}

/// Endpoint settings for the BigQuery REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BigQueryApiConfig {
    /// Environment variable: `DATASYNC_BIGQUERY_API_BASE`
    #[serde(default = "default_bigquery_api_base")]
    pub api_base: String,

    /// Environment variable: `DATASYNC_BIGQUERY_JOB_POLL_INTERVAL_MS`
    #[serde(default = "default_bigquery_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
}

impl Default for BigQueryApiConfig {
    fn default() -> Self {
        Self {
            api_base: default_bigquery_api_base(),
            job_poll_interval_ms: default_bigquery_job_poll_interval_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            source_database_url: None,
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            sync: SyncConfig::default(),
            bigquery: BigQueryApiConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Database URL used for extraction.
    pub fn source_database_url(&self) -> &str {
        self.source_database_url
            .as_deref()
            .unwrap_or(&self.database_url)
    }

    /// Key policy implied by the active profile.
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy::for_profile(&self.profile)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        config.database_url = redact_url_credentials(&config.database_url);
        config.source_database_url = config
            .source_database_url
            .as_deref()
            .map(redact_url_credentials);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration.
    ///
    /// A missing crypto key is not checked here; whether it is fatal depends
    /// on the [`KeyPolicy`] applied when the vault is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.crypto_key
            && key.len() != crate::crypto::KEY_LEN
        {
            return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.sync.validate()?;

        if let Err(err) = url::Url::parse(&self.bigquery.api_base) {
            return Err(ConfigError::InvalidUrl {
                field: "BIGQUERY_API_BASE",
                error: err.to_string(),
            });
        }

        Ok(())
    }
}

fn redact_url_credentials(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("REDACTED"));
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://datasync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_sync_connect_timeout_secs() -> u64 {
    30
}

fn default_sync_load_timeout_secs() -> u64 {
    600 // 10 minutes
}

fn default_sync_tenant_concurrency() -> usize {
    1
}

fn default_bigquery_api_base() -> String {
    "https://bigquery.googleapis.com".to_string()
}

fn default_bigquery_job_poll_interval_ms() -> u64 {
    1000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("crypto key is missing; set DATASYNC_CRYPTO_KEY (required outside local/test profiles)")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("{field} must be greater than zero")]
    InvalidTimeout { field: &'static str },
    #[error("sync tenant concurrency must be between 1 and 32, got {value}")]
    InvalidTenantConcurrency { value: usize },
    #[error("{field} is not a valid URL: {error}")]
    InvalidUrl { field: &'static str, error: String },
}

/// Loads configuration using layered `.env` files and `DATASYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, parses and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let source_database_url = layered
            .remove("SOURCE_DATABASE_URL")
            .filter(|v| !v.is_empty());
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let crypto_key = match layered.remove("CRYPTO_KEY").filter(|v| !v.trim().is_empty()) {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                let decoded = general_purpose::STANDARD
                    .decode(key_str.trim())
                    .map_err(|e| ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    })?;
                Some(decoded)
            }
            None => None,
        };

        let sync = SyncConfig {
            connect_timeout_secs: layered
                .remove("SYNC_CONNECT_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_connect_timeout_secs),
            load_timeout_secs: layered
                .remove("SYNC_LOAD_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_load_timeout_secs),
            tenant_concurrency: layered
                .remove("SYNC_TENANT_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_tenant_concurrency),
        };

        let bigquery = BigQueryApiConfig {
            api_base: layered
                .remove("BIGQUERY_API_BASE")
                .filter(|v| !v.is_empty())
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(default_bigquery_api_base),
            job_poll_interval_ms: layered
                .remove("BIGQUERY_JOB_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_bigquery_job_poll_interval_ms),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            source_database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            crypto_key,
            sync,
            bigquery,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
