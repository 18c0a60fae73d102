//! Error taxonomy for the bootstrap stages.
//!
//! Only `ConnectionError`, `ProvisionError` and `PublishError` stop a run.
//! Index and verification errors are folded into the run status.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to open or confirm a connection. Always fatal.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Could not connect to MongoDB at {uri} - check that MongoDB is running ({message})")]
    Timeout { uri: String, message: String },

    #[error("MongoDB configuration error: {message}")]
    Configuration { message: String },

    #[error("Unexpected error connecting to MongoDB: {message}")]
    Unexpected { message: String },
}

/// A single network call exceeded its time limit.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct OperationTimedOut(pub Duration);

/// Failure to obtain a collection handle. Sub-stage failures are not reported here.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
}

/// A single index request that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("malformed index spec: {reason}")]
    Malformed { reason: String },

    #[error("index rejected by server: {reason}")]
    Rejected { reason: String },

    #[error("index creation timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("probe document write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("probe document read-back failed: {reason}")]
    ReadFailed { reason: String },

    #[error("probe document '{id}' not found on read-back")]
    NotFound { id: String },

    #[error("probe document '{id}' read back with unexpected field '{field}'")]
    Mismatch { id: String, field: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize configuration")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Render an anyhow error with its full cause chain on one line.
pub fn format_error(e: &anyhow::Error) -> String {
    format!("{e:#}")
}
