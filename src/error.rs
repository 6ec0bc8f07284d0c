//! Error types for the cloud orchestrator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("image {image} is in error state: {message}")]
    ImageInError { image: String, message: String },

    #[error("image {0} is not initialized yet")]
    ImageNotInitialized(String),

    #[error("no {kind} named '{name}' found in the backend")]
    ResourceNotFound { kind: &'static str, name: String },

    #[error("invalid state: instance is {current}, expected {expected}")]
    InvalidState { current: String, expected: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error record kept on an image or on the whole client and polled by
/// callers, as opposed to an `Err` propagated up a call chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudErrorInfo {
    pub message: String,
}

impl CloudErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for CloudErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<&Error> for CloudErrorInfo {
    fn from(err: &Error) -> Self {
        Self::new(err.to_string())
    }
}
