use std::path::PathBuf;

use thiserror::Error;

use skusync_storage::{FetchFailure, StorageError};

/// Errors from a [`RelationalStore`](crate::relational::RelationalStore).
#[derive(Error, Debug)]
pub enum RelationalError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("invalid table name '{0}'")]
    InvalidIdentifier(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Everything that can go wrong in one ingestion cycle.
///
/// Fatal variants (see [`IngestError::is_fatal`]) abort the cycle; the rest are
/// per object or per file and are recorded in the cycle report instead.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("query failed: {0}")]
    Query(#[source] RelationalError),

    #[error("fetch of '{key}' failed: {reason}")]
    Fetch { key: String, reason: String },

    #[error("cannot parse '{}': {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("schema mismatch in '{}': {reason}", .path.display())]
    SchemaMismatch { path: PathBuf, reason: String },

    #[error("merge into '{table}' failed: {source}")]
    Merge {
        table: String,
        #[source]
        source: RelationalError,
    },

    #[error("archive of '{}' failed: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Cycle-start failures that end the run (and the process) with an error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Connectivity(_)
                | IngestError::Query(_)
                | IngestError::Storage(_)
                | IngestError::Config(_)
        )
    }

    /// Short stage label used in cycle reports.
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::Connectivity(_) => "connect",
            IngestError::Query(_) => "query",
            IngestError::Fetch { .. } => "fetch",
            IngestError::Parse { .. } | IngestError::SchemaMismatch { .. } => "parse",
            IngestError::Merge { .. } => "merge",
            IngestError::Archive { .. } => "archive",
            IngestError::Storage(_) => "storage",
            IngestError::Config(_) => "config",
        }
    }
}

impl From<FetchFailure> for IngestError {
    fn from(failure: FetchFailure) -> Self {
        IngestError::Fetch {
            key: failure.key.to_string(),
            reason: failure.reason,
        }
    }
}
