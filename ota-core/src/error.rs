//! Error types for firmware update operations

use thiserror::Error;

use crate::reporter::UpdateStatus;
use crate::state::OtaState;

/// Failure to turn a check-update response body into a manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    Json(String),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is malformed: {reason}")]
    Malformed {
        field: &'static str,
        reason: &'static str,
    },
}

/// Errors raised by an [`HttpTransport`](crate::transport::HttpTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("timed out waiting for data")]
    Timeout,
}

/// Errors raised by the platform's flash update API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("no inactive update partition available")]
    NoUpdatePartition,

    #[error("image of {required} bytes does not fit partition of {available} bytes")]
    InsufficientSpace { required: usize, available: usize },

    #[error("failed to begin write session: {0}")]
    Begin(String),

    #[error("flash write failed: {0}")]
    Write(String),

    #[error("failed to finalize image: {0}")]
    Finalize(String),
}

/// Why an update check did not yield a usable answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ParseError),
}

impl CheckError {
    /// Connectivity problems send the cycle back to IDLE without a report.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CheckError::Transport(_))
    }
}

/// Fatal error after a manifest was accepted. Each variant maps to the
/// status reported to the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("install failed: {0}")]
    Install(String),
}

impl UpdateError {
    pub fn status(&self) -> UpdateStatus {
        match self {
            UpdateError::Download(_) => UpdateStatus::DownloadFailed,
            UpdateError::Install(_) => UpdateStatus::InstallFailed,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UpdateError::Download(msg) | UpdateError::Install(msg) => msg,
        }
    }
}

/// Returned when a second check or session is attempted while one is active.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("update already in progress (state: {state})")]
pub struct SessionActive {
    pub state: OtaState,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },

    #[error("checksum `{0}` is not a SHA-256 digest and verification is required")]
    Unsupported(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API endpoint cannot be empty")]
    EmptyEndpoint,

    #[error("API endpoint must start with http:// or https://")]
    InvalidEndpoint,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("buffer size must be at most {max} bytes")]
    BufferTooLarge { max: usize },
}
