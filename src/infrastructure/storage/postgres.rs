//! PostgreSQL limit storage with connection pooling

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::config::TableNames;
use crate::domain::limit::{LimitId, LimitRecord};
use crate::domain::storage::{usage_state_key, LimitStorage};
use crate::domain::usage::{SubjectId, UsageState};
use crate::domain::DomainError;

/// PostgreSQL storage configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/usage_limiter".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }
}

/// PostgreSQL storage.
///
/// Each row keeps the entity as JSONB next to the columns the queries filter
/// on (`name`, `plan`, `deleted_at`, `version`). A partial unique index on
/// `(name, COALESCE(plan, ''))` over live rows enforces limit identity.
pub struct PostgresLimitStorage {
    pool: PgPool,
    tables: TableNames,
}

impl Debug for PostgresLimitStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLimitStorage")
            .field("tables", &self.tables)
            .finish()
    }
}

impl PostgresLimitStorage {
    pub fn new(pool: PgPool, tables: TableNames) -> Self {
        Self { pool, tables }
    }

    /// Creates a new PostgreSQL storage with connection pooling
    pub async fn connect(config: &PostgresConfig, tables: TableNames) -> Result<Self, DomainError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))?;

        Ok(Self::new(pool, tables))
    }

    /// Creates both tables and the identity index if missing
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        for statement in schema_statements(&self.tables) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DomainError::storage(format!("Failed to create schema: {}", e)))?;
        }

        Ok(())
    }

    async fn live_limit_version(&self, id: &LimitId) -> Result<Option<i64>, DomainError> {
        let query = format!(
            "SELECT version FROM {} WHERE id = $1 AND deleted_at IS NULL",
            self.tables.limits
        );

        let row = sqlx::query(&query)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to load limit version: {}", e)))?;

        row.map(|r| {
            r.try_get::<i64, _>("version")
                .map_err(|e| DomainError::storage(format!("Failed to read version: {}", e)))
        })
        .transpose()
    }

    async fn fetch_limits(
        &self,
        query: &str,
        binds: LimitFilter<'_>,
    ) -> Result<Vec<LimitRecord>, DomainError> {
        let q = sqlx::query(query);
        let q = match binds {
            LimitFilter::All => q,
            LimitFilter::Id(id) => q.bind(*id.as_uuid()),
            LimitFilter::NameAndPlan(name, plan) => q.bind(name.to_string()).bind(plan.map(str::to_string)),
        };

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to load limits: {}", e)))?;

        rows.iter().map(decode_row).collect()
    }

    async fn fetch_states(
        &self,
        query: &str,
        bind: String,
        id: Option<&LimitId>,
    ) -> Result<Vec<UsageState>, DomainError> {
        let mut q = sqlx::query(query).bind(bind);

        if let Some(id) = id {
            q = q.bind(*id.as_uuid());
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to load usage states: {}", e)))?;

        rows.iter().map(decode_row).collect()
    }
}

enum LimitFilter<'a> {
    All,
    Id(&'a LimitId),
    NameAndPlan(&'a str, Option<&'a str>),
}

fn schema_statements(tables: &TableNames) -> Vec<String> {
    vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {limits} (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                plan VARCHAR(255),
                version BIGINT NOT NULL,
                deleted_at TIMESTAMPTZ,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            limits = tables.limits
        ),
        format!(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS {limits}_name_plan_live
            ON {limits} (name, COALESCE(plan, ''))
            WHERE deleted_at IS NULL
            "#,
            limits = tables.limits
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {usage} (
                subject_id VARCHAR(255) NOT NULL,
                limit_id UUID NOT NULL REFERENCES {limits} (id),
                version BIGINT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (subject_id, limit_id)
            )
            "#,
            usage = tables.usage_states,
            limits = tables.limits
        ),
    ]
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(value)
        .map_err(|e| DomainError::storage(format!("Failed to serialize entity: {}", e)))
}

fn decode_row<T: DeserializeOwned>(row: &PgRow) -> Result<T, DomainError> {
    let data: serde_json::Value = row
        .try_get("data")
        .map_err(|e| DomainError::storage(format!("Failed to read row: {}", e)))?;

    serde_json::from_value(data)
        .map_err(|e| DomainError::storage(format!("Failed to deserialize entity: {}", e)))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl LimitStorage for PostgresLimitStorage {
    async fn insert_limit(&self, mut record: LimitRecord) -> Result<LimitRecord, DomainError> {
        record.version = 1;
        let data = encode(&record)?;

        let query = format!(
            r#"
            INSERT INTO {} (id, name, plan, version, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            self.tables.limits
        );

        sqlx::query(&query)
            .bind(*record.id().as_uuid())
            .bind(&record.name)
            .bind(&record.plan)
            .bind(record.version as i64)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::already_exists(&record.name, record.plan())
                } else {
                    DomainError::storage(format!("Failed to create limit: {}", e))
                }
            })?;

        Ok(record)
    }

    async fn save_limit(
        &self,
        mut record: LimitRecord,
        expected_version: u64,
    ) -> Result<LimitRecord, DomainError> {
        record.version = expected_version + 1;
        let data = encode(&record)?;

        let query = format!(
            r#"
            UPDATE {}
            SET name = $3, plan = $4, version = $5, data = $6, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND deleted_at IS NULL
            "#,
            self.tables.limits
        );

        let result = sqlx::query(&query)
            .bind(*record.id().as_uuid())
            .bind(expected_version as i64)
            .bind(&record.name)
            .bind(&record.plan)
            .bind(record.version as i64)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::already_exists(&record.name, record.plan())
                } else {
                    DomainError::storage(format!("Failed to update limit: {}", e))
                }
            })?;

        if result.rows_affected() == 0 {
            return match self.live_limit_version(record.id()).await? {
                Some(_) => Err(DomainError::storage_conflict(format!(
                    "{}:{}",
                    self.tables.limits,
                    record.id()
                ))),
                None => Err(DomainError::not_found_by_id(record.id())),
            };
        }

        Ok(record)
    }

    async fn load_limit_by_name_and_plan(
        &self,
        name: &str,
        plan: Option<&str>,
    ) -> Result<Option<LimitRecord>, DomainError> {
        let query = format!(
            r#"
            SELECT data FROM {}
            WHERE name = $1 AND plan IS NOT DISTINCT FROM $2 AND deleted_at IS NULL
            "#,
            self.tables.limits
        );

        Ok(self
            .fetch_limits(&query, LimitFilter::NameAndPlan(name, plan))
            .await?
            .into_iter()
            .next())
    }

    async fn load_limit_by_id(&self, id: &LimitId) -> Result<Option<LimitRecord>, DomainError> {
        let query = format!(
            "SELECT data FROM {} WHERE id = $1 AND deleted_at IS NULL",
            self.tables.limits
        );

        Ok(self
            .fetch_limits(&query, LimitFilter::Id(id))
            .await?
            .into_iter()
            .next())
    }

    async fn list_limits(&self) -> Result<Vec<LimitRecord>, DomainError> {
        let query = format!(
            "SELECT data FROM {} WHERE deleted_at IS NULL ORDER BY name, plan NULLS FIRST",
            self.tables.limits
        );

        self.fetch_limits(&query, LimitFilter::All).await
    }

    async fn soft_delete_limit(
        &self,
        id: &LimitId,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let Some(mut record) = self.load_limit_by_id(id).await? else {
            return Ok(false);
        };

        let expected_version = record.version as i64;
        record.deleted_at = Some(at);
        record.updated_at = at;
        record.version += 1;
        let data = encode(&record)?;

        let query = format!(
            r#"
            UPDATE {}
            SET deleted_at = $3, version = $4, data = $5, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND deleted_at IS NULL
            "#,
            self.tables.limits
        );

        let result = sqlx::query(&query)
            .bind(*id.as_uuid())
            .bind(expected_version)
            .bind(at)
            .bind(record.version as i64)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to delete limit: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::storage_conflict(format!(
                "{}:{}",
                self.tables.limits, id
            )));
        }

        Ok(true)
    }

    async fn load_usage_state(
        &self,
        subject_id: &SubjectId,
        limit_id: &LimitId,
    ) -> Result<Option<UsageState>, DomainError> {
        let query = format!(
            "SELECT data FROM {} WHERE subject_id = $1 AND limit_id = $2",
            self.tables.usage_states
        );

        Ok(self
            .fetch_states(&query, subject_id.as_str().to_string(), Some(limit_id))
            .await?
            .into_iter()
            .next())
    }

    async fn save_usage_state(
        &self,
        mut state: UsageState,
        expected_version: Option<u64>,
    ) -> Result<UsageState, DomainError> {
        state.version = expected_version.unwrap_or(0) + 1;
        let data = encode(&state)?;

        let result = match expected_version {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO {} (subject_id, limit_id, version, data)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (subject_id, limit_id) DO NOTHING
                    "#,
                    self.tables.usage_states
                );

                sqlx::query(&query)
                    .bind(state.subject_id.as_str())
                    .bind(*state.limit_id.as_uuid())
                    .bind(state.version as i64)
                    .bind(&data)
                    .execute(&self.pool)
                    .await
            }
            Some(expected) => {
                let query = format!(
                    r#"
                    UPDATE {}
                    SET version = $4, data = $5, updated_at = NOW()
                    WHERE subject_id = $1 AND limit_id = $2 AND version = $3
                    "#,
                    self.tables.usage_states
                );

                sqlx::query(&query)
                    .bind(state.subject_id.as_str())
                    .bind(*state.limit_id.as_uuid())
                    .bind(expected as i64)
                    .bind(state.version as i64)
                    .bind(&data)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(|e| DomainError::storage(format!("Failed to save usage state: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::storage_conflict(format!(
                "{}:{}",
                self.tables.usage_states,
                usage_state_key(&state.subject_id, &state.limit_id)
            )));
        }

        Ok(state)
    }

    async fn list_usage_states_for_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<UsageState>, DomainError> {
        let query = format!(
            "SELECT data FROM {} WHERE subject_id = $1",
            self.tables.usage_states
        );

        self.fetch_states(&query, subject_id.as_str().to_string(), None)
            .await
    }

    async fn list_usage_states_for_limit(
        &self,
        limit_id: &LimitId,
    ) -> Result<Vec<UsageState>, DomainError> {
        let query = format!(
            "SELECT data FROM {} WHERE limit_id = $1 ORDER BY subject_id",
            self.tables.usage_states
        );

        let rows = sqlx::query(&query)
            .bind(*limit_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to load usage states: {}", e)))?;

        rows.iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 600);
    }

    #[test]
    fn test_postgres_config_builder() {
        let config = PostgresConfig::new("postgres://localhost/test")
            .with_max_connections(20)
            .with_connect_timeout(60);

        assert_eq!(config.url, "postgres://localhost/test");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.connect_timeout_secs, 60);
    }

    #[test]
    fn test_schema_uses_configured_table_names() {
        let tables = TableNames {
            limits: "quota_limits".to_string(),
            usage_states: "quota_usages".to_string(),
        };

        let statements = schema_statements(&tables);

        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS quota_limits"));
        assert!(statements[1].contains("quota_limits_name_plan_live"));
        assert!(statements[1].contains("WHERE deleted_at IS NULL"));
        assert!(statements[2].contains("CREATE TABLE IF NOT EXISTS quota_usages"));
        assert!(statements[2].contains("REFERENCES quota_limits (id)"));
    }
}
