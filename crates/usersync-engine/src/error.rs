//! Engine and store error types.

use thiserror::Error;
use usersync_adapter::AdapterError;

use crate::ids::SyncId;

/// Errors raised by checkpoint and detail log stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: String, id: String },

    /// Stored state was written by a newer schema.
    #[error("Unsupported schema version {found} for run {syncid} (supported up to {supported})")]
    UnsupportedSchemaVersion {
        syncid: SyncId,
        found: u32,
        supported: u32,
    },

    /// Backend failure that is not a database error.
    #[error("Store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Check if this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that end a sync or resolve invocation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Checkpoint or detail log failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Adapter failure outside per-user processing (listing, counting, lookup of adapters).
    #[error("Adapter error for system '{system}': {source}")]
    Adapter {
        system: String,
        #[source]
        source: AdapterError,
    },

    /// Run state is inconsistent with the requested operation.
    #[error("Invalid state for run {syncid}: {message}")]
    InvalidState { syncid: SyncId, message: String },

    /// Another invocation took over the run's lease.
    #[error("Lease lost for run {syncid}")]
    LeaseLost { syncid: SyncId },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SyncError {
    /// Create an adapter error for `system`.
    pub fn adapter(system: impl Into<String>, source: AdapterError) -> Self {
        Self::Adapter {
            system: system.into(),
            source,
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(syncid: SyncId, message: impl Into<String>) -> Self {
        Self::InvalidState {
            syncid,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if a later invocation may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(StoreError::Database(_)) => true,
            SyncError::Adapter { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::not_found("sync run", "abc");
        assert_eq!(err.to_string(), "sync run not found: abc");
        assert!(err.is_not_found());

        let err = SyncError::adapter("forumA", AdapterError::connection("refused"));
        assert!(err.to_string().contains("forumA"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(SyncError::adapter("forumA", AdapterError::connection("refused")).is_retryable());
        assert!(!SyncError::adapter("forumA", AdapterError::operation("denied")).is_retryable());
        assert!(!SyncError::configuration("bad").is_retryable());
        assert!(!SyncError::LeaseLost {
            syncid: SyncId::new()
        }
        .is_retryable());
        assert!(!SyncError::from(StoreError::backend("poisoned")).is_retryable());
    }
}
