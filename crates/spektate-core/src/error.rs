//! Error taxonomy for deployment reconciliation.
//!
//! Advisory lookups (authors, sync tags) never produce these; they return
//! `Option`/empty collections and log instead.

use thiserror::Error;

/// A transport call rejected.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("response from {url} is not JSON: {message}")]
    Decode { url: String, message: String },
}

/// A required lookup (pull request) could not be satisfied.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    #[error("{what} {id} has an unexpected shape: {message}")]
    Malformed {
        what: &'static str,
        id: String,
        message: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fetching a pipeline run failed. Never swallowed by the stage client.
#[derive(Debug, Error)]
pub enum PipelineFetchError {
    #[error("fetching pipeline run {run_id} failed: {source}")]
    Transport {
        run_id: String,
        #[source]
        source: TransportError,
    },

    #[error("pipeline run {run_id} has an unexpected shape: {message}")]
    Malformed { run_id: String, message: String },
}

impl PipelineFetchError {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineFetchError::Transport { run_id, .. } => run_id,
            PipelineFetchError::Malformed { run_id, .. } => run_id,
        }
    }
}

/// Configuration is unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
