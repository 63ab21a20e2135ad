//! Configuration loading for the connector sync runner.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CONNECTOR_SYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "CONNECTOR_SYNC_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `CONNECTOR_SYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Connector record this process drives. Can also be supplied on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    /// Service type adopted by a connector record that has none yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_service_type: Option<String>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub index_backend: IndexBackend,
    /// Maximum number of documents per bulk write.
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
}

/// Control loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RunnerConfig {
    /// Pause between two cycles (default: 3000)
    ///
    /// Environment variable: `CONNECTOR_SYNC_RUNNER_POLLING_INTERVAL_MS`
    #[serde(default = "default_runner_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Minimum time between two health checks (default: 180000)
    ///
    /// Environment variable: `CONNECTOR_SYNC_RUNNER_HEARTBEAT_INTERVAL_MS`
    #[serde(default = "default_runner_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long shutdown waits for the loop to finish its cycle (default: 60000)
    ///
    /// Environment variable: `CONNECTOR_SYNC_RUNNER_TERMINATION_TIMEOUT_MS`
    #[serde(default = "default_runner_termination_timeout_ms")]
    pub termination_timeout_ms: u64,
}

/// Which search index implementation the runner writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Elasticsearch,
    /// Process-local index, useful for trying a connector without a cluster.
    Memory,
}

/// Elasticsearch connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ElasticsearchConfig {
    #[serde(default = "default_elasticsearch_url")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Encoded API key, sent as `Authorization: ApiKey ...`. Takes precedence over basic auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Hits per page when listing document ids.
    #[serde(default = "default_elasticsearch_page_size")]
    pub page_size: usize,
    #[serde(default = "default_elasticsearch_pit_keep_alive")]
    pub pit_keep_alive: String,
    #[serde(default = "default_elasticsearch_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            connector_id: None,
            connector_service_type: None,
            runner: RunnerConfig::default(),
            index_backend: IndexBackend::default(),
            index_batch_size: default_index_batch_size(),
            elasticsearch: ElasticsearchConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_runner_polling_interval_ms(),
            heartbeat_interval_ms: default_runner_heartbeat_interval_ms(),
            termination_timeout_ms: default_runner_termination_timeout_ms(),
        }
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: default_elasticsearch_url(),
            username: None,
            password: None,
            api_key: None,
            page_size: default_elasticsearch_page_size(),
            pit_keep_alive: default_elasticsearch_pit_keep_alive(),
            request_timeout_ms: default_elasticsearch_request_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.elasticsearch.password.is_some() {
            config.elasticsearch.password = Some(REDACTED.to_string());
        }
        if config.elasticsearch.api_key.is_some() {
            config.elasticsearch.api_key = Some(REDACTED.to_string());
        }
        if config.database_url.contains('@') {
            config.database_url = redact_url_credentials(&config.database_url);
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if a setting is out of bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections {
                value: self.db_max_connections,
            });
        }

        if self.index_batch_size == 0 || self.index_batch_size > 10_000 {
            return Err(ConfigError::InvalidIndexBatchSize {
                value: self.index_batch_size,
            });
        }

        self.runner.validate()?;

        if self.index_backend == IndexBackend::Elasticsearch {
            self.elasticsearch.validate()?;
        }

        Ok(())
    }
}

/// One week.
const MAX_HEARTBEAT_INTERVAL_MS: u64 = 604_800_000;

impl RunnerConfig {
    /// Validate runner timing bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_interval_ms < 100 || self.polling_interval_ms > 3_600_000 {
            return Err(ConfigError::InvalidPollingInterval {
                value: self.polling_interval_ms,
            });
        }

        if !(1_000..=MAX_HEARTBEAT_INTERVAL_MS).contains(&self.heartbeat_interval_ms) {
            return Err(ConfigError::InvalidHeartbeatInterval {
                value: self.heartbeat_interval_ms,
            });
        }

        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.heartbeat_interval_ms).unwrap_or(i64::MAX))
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }
}

impl ElasticsearchConfig {
    /// Validate Elasticsearch connection settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::InvalidElasticsearchUrl {
                    value: self.url.clone(),
                });
            }
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::ElasticsearchPasswordWithoutUsername);
        }

        // search requests cannot page past index.max_result_window
        if self.page_size == 0 || self.page_size > 10_000 {
            return Err(ConfigError::InvalidElasticsearchPageSize {
                value: self.page_size,
            });
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidElasticsearchRequestTimeout {
                value: self.request_timeout_ms,
            });
        }

        Ok(())
    }
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBackend::Elasticsearch => f.write_str("elasticsearch"),
            IndexBackend::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for IndexBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "elasticsearch" => Ok(IndexBackend::Elasticsearch),
            "memory" => Ok(IndexBackend::Memory),
            _ => Err(ConfigError::InvalidIndexBackend {
                value: value.to_string(),
            }),
        }
    }
}

fn redact_url_credentials(value: &str) -> String {
    match url::Url::parse(value) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some(REDACTED));
            parsed.to_string()
        }
        Ok(_) => value.to_string(),
        Err(_) => REDACTED.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://connector-sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_index_batch_size() -> usize {
    500
}

fn default_runner_polling_interval_ms() -> u64 {
    3_000
}

fn default_runner_heartbeat_interval_ms() -> u64 {
    180_000
}

fn default_runner_termination_timeout_ms() -> u64 {
    60_000
}

fn default_elasticsearch_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_elasticsearch_page_size() -> usize {
    1000
}

fn default_elasticsearch_pit_keep_alive() -> String {
    "1m".to_string()
}

fn default_elasticsearch_request_timeout_ms() -> u64 {
    30_000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be at least 1, got {value}")]
    InvalidDbMaxConnections { value: u32 },
    #[error("index backend must be 'elasticsearch' or 'memory', got '{value}'")]
    InvalidIndexBackend { value: String },
    #[error("index batch size must be between 1 and 10000, got {value}")]
    InvalidIndexBatchSize { value: usize },
    #[error("runner polling interval must be between 100 and 3600000 ms, got {value}")]
    InvalidPollingInterval { value: u64 },
    #[error("runner heartbeat interval must be between 1000 and 604800000 ms, got {value}")]
    InvalidHeartbeatInterval { value: u64 },
    #[error("elasticsearch url must be an http(s) url, got '{value}'")]
    InvalidElasticsearchUrl { value: String },
    #[error(
        "elasticsearch password is set without a username; set CONNECTOR_SYNC_ELASTICSEARCH_USERNAME"
    )]
    ElasticsearchPasswordWithoutUsername,
    #[error("elasticsearch page size must be between 1 and 10000, got {value}")]
    InvalidElasticsearchPageSize { value: usize },
    #[error("elasticsearch request timeout must be positive, got {value}")]
    InvalidElasticsearchRequestTimeout { value: u64 },
}

/// Loads configuration using layered `.env` files and `CONNECTOR_SYNC_*` env vars.
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

    /// Loads and validates configuration. Later layers override earlier ones and the
    /// process environment wins over every file.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut take = |key: &str| layered.remove(key).filter(|v| !v.is_empty());

        let profile = take("PROFILE").unwrap_or(profile_hint);
        let log_level = take("LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take("LOG_FORMAT")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let database_url = take("DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let connector_id = take("CONNECTOR_ID").map(|v| v.trim().to_string());
        let connector_service_type = take("CONNECTOR_SERVICE_TYPE").map(|v| v.trim().to_string());

        let runner = RunnerConfig {
            polling_interval_ms: take("RUNNER_POLLING_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_runner_polling_interval_ms),
            heartbeat_interval_ms: take("RUNNER_HEARTBEAT_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_runner_heartbeat_interval_ms),
            termination_timeout_ms: take("RUNNER_TERMINATION_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_runner_termination_timeout_ms),
        };

        let index_backend = match take("INDEX_BACKEND") {
            Some(value) => value.parse()?,
            None => IndexBackend::default(),
        };
        let index_batch_size = take("INDEX_BATCH_SIZE")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_index_batch_size);

        let elasticsearch = ElasticsearchConfig {
            url: take("ELASTICSEARCH_URL").unwrap_or_else(default_elasticsearch_url),
            username: take("ELASTICSEARCH_USERNAME"),
            password: take("ELASTICSEARCH_PASSWORD"),
            api_key: take("ELASTICSEARCH_API_KEY"),
            page_size: take("ELASTICSEARCH_PAGE_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_elasticsearch_page_size),
            pit_keep_alive: take("ELASTICSEARCH_PIT_KEEP_ALIVE")
                .unwrap_or_else(default_elasticsearch_pit_keep_alive),
            request_timeout_ms: take("ELASTICSEARCH_REQUEST_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_elasticsearch_request_timeout_ms),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            connector_id,
            connector_service_type,
            runner,
            index_backend,
            index_batch_size,
            elasticsearch,
        };

        config.validate()?;
        Ok(config)
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
