use std::time::Duration;

use serde::Deserialize;

use crate::domain::ResetFrequency;

/// Limiter configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LimiterConfig {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub defaults: DefaultsSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// `memory` or `postgres`
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub tables: TableNames,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound for a single storage call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Overrides for persistence location names
#[derive(Debug, Clone, Deserialize)]
pub struct TableNames {
    #[serde(default = "default_limits_table")]
    pub limits: String,
    #[serde(default = "default_usage_states_table")]
    pub usage_states: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Total attempts of a read-modify-write cycle, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsSettings {
    /// Applied when a creation request does not name a frequency
    #[serde(default = "default_reset_frequency")]
    pub reset_frequency: ResetFrequency,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_limits_table() -> String {
    "limits".to_string()
}

fn default_usage_states_table() -> String {
    "limit_usages".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_reset_frequency() -> ResetFrequency {
    ResetFrequency::Never
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            tables: TableNames::default(),
            postgres_url: None,
            max_connections: default_max_connections(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StorageSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            limits: default_limits_table(),
            usage_states: default_usage_states_table(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for DefaultsSettings {
    fn default() -> Self {
        Self {
            reset_frequency: default_reset_frequency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LimiterConfig {
    /// Loads `config/default`, `config/local`, then `LIMITER__*` variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("LIMITER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LimiterConfig::default();

        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.tables.limits, "limits");
        assert_eq!(config.storage.tables.usage_states, "limit_usages");
        assert_eq!(config.storage.timeout(), Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.cache.enabled);
        assert_eq!(config.defaults.reset_frequency, ResetFrequency::Never);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: LimiterConfig = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [storage.tables]
                limits = "quota_limits"

                [defaults]
                reset_frequency = "every month"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.tables.limits, "quota_limits");
        assert_eq!(config.storage.tables.usage_states, "limit_usages");
        assert_eq!(config.defaults.reset_frequency, ResetFrequency::EveryMonth);
        assert_eq!(config.retry.backoff_ms, 10);
    }

    #[test]
    fn test_unknown_reset_frequency_is_rejected() {
        let result: Result<LimiterConfig, _> = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [defaults]
                reset_frequency = "hourly"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize();

        assert!(result.is_err());
    }
}
