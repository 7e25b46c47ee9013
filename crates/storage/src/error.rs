use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("fetch of '{key}' timed out after {secs}s")]
    Timeout { key: String, secs: u64 },

    #[error("{0}")]
    Other(String),
}
