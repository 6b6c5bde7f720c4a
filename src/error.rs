//! Error types for attachment-backup
//!
//! Errors are split by how far they are allowed to travel:
//! - [`TransferError`] describes one failed fetch attempt and never leaves the retry layer
//!   except as the message of a failed [`DownloadOutcome`](crate::types::DownloadOutcome)
//! - [`DescriptorError`] describes a malformed descriptor; it is recorded on that
//!   descriptor's outcome and never aborts a batch
//! - [`Error`] is what the orchestrator returns to callers, for conditions that make a
//!   unit's output meaningless (unwritable destination, broken configuration, ...)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for attachment-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for attachment-backup
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "output.target_root")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backup destination cannot be created or written
    #[error("destination {path} is not writable: {source}")]
    DestinationUnwritable {
        /// Directory that could not be prepared
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Writing a manifest table failed
    #[error("failed to write manifest {path}: {source}")]
    Manifest {
        /// Manifest file being written
        path: PathBuf,
        /// Underlying CSV error
        source: csv::Error,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client could not be constructed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The external descriptor source failed to enumerate a unit
    #[error("attachment source failed for unit {unit}: {message}")]
    Source {
        /// Unit being enumerated
        unit: String,
        /// Error reported by the source
        message: String,
    },

    /// The external result-attachment step failed for a unit
    #[error("result attachment failed for unit {unit}: {message}")]
    Attach {
        /// Unit whose results were being attached
        unit: String,
        /// Error reported by the attacher
        message: String,
    },

    /// A unit finished with attachments that could not be downloaded
    #[error("unit {unit} is incomplete: {failed} attachment(s) failed, see {failure_manifest}")]
    BatchIncomplete {
        /// Unit name
        unit: String,
        /// Number of attachments still failed after reconciliation
        failed: usize,
        /// Location of the failure manifest
        failure_manifest: PathBuf,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Failure of a single fetch attempt
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request could not be completed (connection refused, DNS, TLS, ...)
    #[error("request to {url} failed: {source}")]
    Request {
        /// Location being fetched
        url: String,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// The remote answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Location being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body stream broke off mid-transfer
    #[error("reading body from {url} failed: {source}")]
    Body {
        /// Location being fetched
        url: String,
        /// Underlying HTTP client error
        source: reqwest::Error,
    },

    /// The attempt exceeded its time budget
    #[error("fetching {url} timed out after {}s", timeout.as_secs_f64())]
    Timeout {
        /// Location being fetched
        url: String,
        /// Budget that was exceeded
        timeout: Duration,
    },

    /// The local file or its parent directories could not be written
    #[error("writing {path} failed: {source}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Any other transport failure (used by custom fetchers)
    #[error("{0}")]
    Other(String),
}

/// A descriptor that cannot be materialized no matter how often it is retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// A required field is empty
    #[error("descriptor field `{0}` is empty")]
    MissingField(&'static str),

    /// An identity segment would escape its directory
    #[error("descriptor field `{field}` has unusable path segment {value:?}")]
    InvalidSegment {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },

    /// The source location is not a fetchable HTTP(S) URL
    #[error("source location {location:?} is not usable: {reason}")]
    InvalidLocation {
        /// Offending location
        location: String,
        /// Why it was rejected
        reason: String,
    },
}
