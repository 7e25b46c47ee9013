use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkusyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("{0}")]
    Other(String),
}
