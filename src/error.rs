//! Error types for http-dl
//!
//! All user-visible failures flow through [`Error`]; the terminal
//! [`Failed`](crate::Event::Failed) event carries its `Display` output.
//! Transport errors inside a segment worker are retried locally before they
//! escalate to [`Error::Segment`]; every other variant aborts the run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for http-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for http-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid request or configuration, rejected before any I/O
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the invalid setting
        message: String,
    },

    /// The URL could not be parsed or carries no usable file name
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The HEAD probe did not yield a positive content length
    #[error("probe failed for {url}: {reason}")]
    ProbeFailed {
        /// The probed URL
        url: String,
        /// Why the resource is not downloadable
        reason: String,
    },

    /// Network error from the HTTP transport
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request did not produce response headers within the deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A segment exhausted its retries or the server refused partial content
    #[error("segment {index} (bytes {start_byte}-{end_byte}) failed: {reason}")]
    Segment {
        /// 0-based segment index
        index: usize,
        /// First byte of the failed range (inclusive)
        start_byte: u64,
        /// Last byte of the failed range (inclusive)
        end_byte: u64,
        /// Terminal failure reason from the worker
        reason: String,
    },

    /// Segment store operation failed
    #[error("segment store error: {0}")]
    Store(#[from] sqlx::Error),

    /// The server answered a sequential-mode request with an unusable status
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus {
        /// The HTTP status code received
        status: u16,
    },

    /// A scratch file disappeared before it could be assembled
    #[error("assembly failed: scratch file {missing} is missing")]
    Assembly {
        /// Path of the missing scratch file
        missing: PathBuf,
    },

    /// The final file length does not match the probed total
    #[error("size mismatch: expected {expected} bytes, found {actual}")]
    IntegrityMismatch {
        /// Probed total size in bytes
        expected: u64,
        /// Actual length of the final file
        actual: u64,
    },
}

impl Error {
    /// Create a configuration error from a message
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}
