//! Error types for the recheck pipeline
//!
//! Provides error handling for:
//! - Artifact store operations (scan, read, write, backup)
//! - Generation service calls (transient vs. terminal)
//! - Configuration loading and validation
//! - Run-level pipeline failures
//!
//! Per-artifact verification failures are not errors: they are recorded
//! as [`crate::types::BuildOutcome`] values and never abort a run.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by the artifact store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Artifact directory missing or unreadable
    #[error("cannot scan artifact directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid filename glob
    #[error("invalid artifact pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// IO error during read
    #[error("io error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error during write
    #[error("io error writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Create read error for path
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create write error for path
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by a generation service call
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// Service answered with a non-success HTTP status
    #[error("HTTP error {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Leading part of the response body
        body: String,
        /// Server-requested delay before retrying
        retry_after: Option<Duration>,
    },

    /// Request never produced a response (connect, timeout, reset)
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Check if the call is worth retrying
    ///
    /// 5xx, 429 and transport failures are transient; every other status
    /// and malformed bodies are terminal for that call.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Transport(_) => true,
            Self::Malformed(_) => false,
        }
    }

    /// Server-requested delay, if any
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::config::PipelineConfig`]
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Run-level pipeline errors
///
/// Only conditions that make the whole run meaningless end up here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Artifact store failure during scan
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Summary could not be written
    #[error("cannot write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Summary could not be serialized
    #[error("cannot serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A worker task panicked or was aborted
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
