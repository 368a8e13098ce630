//! Storage factory for runtime backend selection

use std::sync::Arc;

use crate::config::StorageSettings;
use crate::domain::storage::LimitStorage;
use crate::domain::DomainError;

use super::in_memory::InMemoryLimitStorage;
use super::postgres::{PostgresConfig, PostgresLimitStorage};

/// Supported storage backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageType {
    /// In-memory storage (for testing/development)
    InMemory,
    /// PostgreSQL storage
    Postgres,
}

impl StorageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Some(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Factory for creating storage instances
#[derive(Debug)]
pub struct StorageFactory;

impl StorageFactory {
    /// Creates the backend named by `settings.backend`
    pub async fn create(settings: &StorageSettings) -> Result<Arc<dyn LimitStorage>, DomainError> {
        let storage_type = StorageType::from_str(&settings.backend).ok_or_else(|| {
            DomainError::configuration(format!("Unknown storage backend: {}", settings.backend))
        })?;

        match storage_type {
            StorageType::InMemory => Ok(Self::create_in_memory(settings)),
            StorageType::Postgres => {
                let url = settings.postgres_url.as_deref().ok_or_else(|| {
                    DomainError::configuration("storage.postgres_url is required for postgres")
                })?;

                let config =
                    PostgresConfig::new(url).with_max_connections(settings.max_connections);
                let storage = Self::create_postgres(&config, settings).await?;
                Ok(storage)
            }
        }
    }

    /// Creates an in-memory storage
    pub fn create_in_memory(settings: &StorageSettings) -> Arc<InMemoryLimitStorage> {
        Arc::new(InMemoryLimitStorage::with_table_names(settings.tables.clone()))
    }

    /// Creates a PostgreSQL storage with its schema in place
    pub async fn create_postgres(
        config: &PostgresConfig,
        settings: &StorageSettings,
    ) -> Result<Arc<PostgresLimitStorage>, DomainError> {
        let storage = PostgresLimitStorage::connect(config, settings.tables.clone()).await?;
        storage.ensure_schema().await?;
        Ok(Arc::new(storage))
    }
}
