//! Error types for autosign

use thiserror::Error;

/// Main error type for autosign operations
#[derive(Error, Debug)]
pub enum HsmError {
    // Policy document errors
    #[error("Invalid policy: {0}")]
    Validation(String),

    // Decision errors
    #[error("{0}")]
    Refused(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // Lifecycle errors
    #[error("a policy is already active")]
    AlreadyActive,

    #[error("no policy is active")]
    NotActive,

    #[error("no policy has been loaded")]
    NothingStaged,

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HsmError {
    /// Shorthand for a validation fault, used heavily by the document reader
    pub fn validation(msg: impl Into<String>) -> Self {
        HsmError::Validation(msg.into())
    }

    pub fn refused(msg: impl Into<String>) -> Self {
        HsmError::Refused(msg.into())
    }

    /// Expected refusals are logged as-is; everything else is a fault
    pub fn is_refusal(&self) -> bool {
        matches!(self, HsmError::Refused(_))
    }
}

impl From<std::io::Error> for HsmError {
    fn from(err: std::io::Error) -> Self {
        HsmError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for HsmError {
    fn from(err: serde_json::Error) -> Self {
        HsmError::Validation(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, HsmError>;
