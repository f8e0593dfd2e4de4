//! Error taxonomy for ingestion jobs

use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`crate::store::Store`] implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// A natural-key uniqueness constraint rejected the write
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// The row a write depends on does not exist
    #[error("Missing {entity} row {id}")]
    MissingRow { entity: &'static str, id: i64 },

    /// A state transition the store refuses (e.g. finishing a finished job)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn duplicate(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::Duplicate {
            entity,
            key: key.into(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

/// Errors surfaced by loaders, the engine and job functions
#[derive(Error, Debug)]
pub enum IngestError {
    /// File missing, unreadable or empty; raised before parsing starts
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Ambiguous {kind} reference '{key}': {candidates} candidates match")]
    AmbiguousReference {
        kind: &'static str,
        key: String,
        candidates: usize,
    },

    #[error("{format} parse error at line {line}: {message}")]
    Parse {
        format: &'static str,
        line: usize,
        message: String,
    },

    /// Uniqueness violation that is not the create-or-fetch race
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Job parameters that cannot be snapshotted into the ledger
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A worker task panicked or was cancelled
    #[error("Worker error: {0}")]
    Worker(String),
}

impl IngestError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        IngestError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn parse(format: &'static str, line: usize, message: impl Into<String>) -> Self {
        IngestError::Parse {
            format,
            line,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, IngestError::NotFound { .. })
    }

    /// An unresolved feature name, the only miss a job may collect
    pub fn is_missing_feature(&self) -> bool {
        matches!(self, IngestError::NotFound { kind: "feature", .. })
    }

    /// The unresolved key of a `NotFound`, as listed in job reports
    pub fn not_found_key(&self) -> Option<&str> {
        match self {
            IngestError::NotFound { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Worker(err.to_string())
    }
}

impl From<machado_common::CommonError> for IngestError {
    fn from(err: machado_common::CommonError) -> Self {
        match err {
            machado_common::CommonError::Io(e) => IngestError::Io(e),
        }
    }
}
