use thiserror::Error;

/// Core domain errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Limit '{name}' with plan {} does not exist", display_plan(.plan))]
    NotFound { name: String, plan: Option<String> },

    #[error("Limit with id '{id}' does not exist")]
    NotFoundById { id: String },

    #[error("Limit '{name}' with plan {} already exists", display_plan(.plan))]
    AlreadyExists { name: String, plan: Option<String> },

    #[error(
        "Limit '{name}' with plan {} is exhausted: requested {requested}, remaining {remaining}",
        display_plan(.plan)
    )]
    Exhausted {
        name: String,
        plan: Option<String>,
        requested: f64,
        remaining: f64,
    },

    #[error("Storage timeout during {operation}")]
    StorageTimeout { operation: String },

    #[error("Storage conflict on '{key}'")]
    StorageConflict { key: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn display_plan(plan: &Option<String>) -> String {
    match plan {
        Some(plan) => format!("'{}'", plan),
        None => "<none>".to_string(),
    }
}

impl DomainError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(name: impl Into<String>, plan: Option<&str>) -> Self {
        Self::NotFound {
            name: name.into(),
            plan: plan.map(str::to_string),
        }
    }

    pub fn not_found_by_id(id: impl ToString) -> Self {
        Self::NotFoundById { id: id.to_string() }
    }

    pub fn already_exists(name: impl Into<String>, plan: Option<&str>) -> Self {
        Self::AlreadyExists {
            name: name.into(),
            plan: plan.map(str::to_string),
        }
    }

    pub fn exhausted(
        name: impl Into<String>,
        plan: Option<&str>,
        requested: f64,
        remaining: f64,
    ) -> Self {
        Self::Exhausted {
            name: name.into(),
            plan: plan.map(str::to_string),
            requested,
            remaining,
        }
    }

    pub fn storage_timeout(operation: impl Into<String>) -> Self {
        Self::StorageTimeout {
            operation: operation.into(),
        }
    }

    pub fn storage_conflict(key: impl Into<String>) -> Self {
        Self::StorageConflict { key: key.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Transient failures where re-running the whole read-modify-write is safe
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageTimeout { .. } | Self::StorageConflict { .. }
        )
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let error = DomainError::not_found("locations", Some("standard"));
        assert_eq!(
            error.to_string(),
            "Limit 'locations' with plan 'standard' does not exist"
        );
    }

    #[test]
    fn test_not_found_without_plan() {
        let error = DomainError::not_found("locations", None);
        assert_eq!(
            error.to_string(),
            "Limit 'locations' with plan <none> does not exist"
        );
    }

    #[test]
    fn test_already_exists_error() {
        let error = DomainError::already_exists("seats", Some("pro"));
        assert_eq!(error.to_string(), "Limit 'seats' with plan 'pro' already exists");
    }

    #[test]
    fn test_exhausted_error_carries_amounts() {
        let error = DomainError::exhausted("locations", Some("standard"), 3.0, 2.0);
        assert_eq!(
            error.to_string(),
            "Limit 'locations' with plan 'standard' is exhausted: requested 3, remaining 2"
        );
        assert!(error.is_exhausted());
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(DomainError::storage_timeout("load_usage_state").is_retryable());
        assert!(DomainError::storage_conflict("usage:u1:l1").is_retryable());
        assert!(!DomainError::invalid_argument("bad").is_retryable());
        assert!(!DomainError::storage("disk").is_retryable());
    }
}
