//! Error types for the HelmChart controller

use thiserror::Error;

/// Result type alias using the controller's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Queue key that cannot be split back into namespace and name
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    /// Watch notification whose payload could not be turned into a key
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    /// Conditional write rejected because the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Local read cache lookup failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Local read cache never reported itself synchronized
    #[error("Cache sync error: {0}")]
    CacheSync(String),

    /// Sync handler failure
    #[error("Sync error: {0}")]
    Sync(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a sync handler error
    pub fn sync(msg: impl Into<String>) -> Self {
        Error::Sync(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Whether this error reports an optimistic-concurrency conflict.
    ///
    /// Covers both the local `Conflict` variant and HTTP 409 responses from
    /// the API server.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 409,
            _ => false,
        }
    }

    /// Whether this error reports a missing object (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(response)) if response.code == 404)
    }
}
