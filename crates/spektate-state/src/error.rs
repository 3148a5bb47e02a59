//! Error types for spektate-state

use thiserror::Error;

/// Errors that can occur while reading deployment records
#[derive(Error, Debug)]
pub enum StorageError {
    /// Store is not configured well enough to issue a request
    #[error("storage is not configured: {0}")]
    Config(String),

    /// Account key could not be decoded or used for signing
    #[error("storage authentication failed: {0}")]
    Auth(String),

    /// The request never produced a response
    #[error("storage request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// The service answered with a non-success status
    #[error("storage request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The response body was not the expected entity listing
    #[error("failed to decode storage response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Decode(err.to_string())
    }
}
