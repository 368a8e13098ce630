mod app_config;

pub use app_config::{
    CacheSettings, DefaultsSettings, LimiterConfig, LogFormat, LoggingConfig, RetrySettings,
    StorageSettings, TableNames,
};
