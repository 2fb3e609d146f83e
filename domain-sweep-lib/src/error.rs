//! Error handling for sweep operations.
//!
//! Errors here are the engine's own failures: bad configuration, unreadable
//! input, unusable output, no session on startup. Per-probe failures never
//! surface as `SweepError` past the probe executor; they become verdicts.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the sweep library.
#[derive(Debug, Clone, Error)]
pub enum SweepError {
    /// Configuration errors (invalid settings, unparseable files, etc.)
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File I/O errors when reading identifier lists or opening sinks
    #[error("File error at '{path}': {message}")]
    FileError { path: String, message: String },

    /// Session/auth context could not be obtained
    #[error("Session error: {message}")]
    SessionError { message: String },

    /// Network-related errors outside of a probe (session fetch, alerts)
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        detail: Option<String>,
    },

    /// Timeout errors when operations take too long
    #[error("Timeout after {duration:?} during: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// JSON or TOML parsing errors
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// A sink rejected a write
    #[error("Sink error for '{category}': {message}")]
    SinkError { category: String, message: String },

    /// Generic internal errors that don't fit other categories
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SweepError {
    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new session error.
    pub fn session<M: Into<String>>(message: M) -> Self {
        Self::SessionError {
            message: message.into(),
        }
    }

    /// Create a new network error.
    pub fn network<M: Into<String>>(message: M) -> Self {
        Self::NetworkError {
            message: message.into(),
            detail: None,
        }
    }

    /// Create a new network error with the underlying cause attached.
    pub fn network_with_detail<M: Into<String>, D: Into<String>>(message: M, detail: D) -> Self {
        Self::NetworkError {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<O: Into<String>>(operation: O, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Map a reqwest failure, reporting a timeout with the client's real deadline.
    pub fn from_http<O: Into<String>>(err: reqwest::Error, operation: O, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(operation, timeout)
        } else {
            err.into()
        }
    }

    /// Create a new sink error.
    pub fn sink<C: Into<String>, M: Into<String>>(category: C, message: M) -> Self {
        Self::SinkError {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error must abort a run.
    ///
    /// Bad configuration, unreadable input and a missing startup session
    /// leave nothing to retry. Everything else is recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigError { .. }
                | Self::FileError { .. }
                | Self::SessionError { .. }
                | Self::ParseError { .. }
        )
    }

    /// Check if this error suggests the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for SweepError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network_with_detail("HTTP request timed out", err.to_string())
        } else if err.is_connect() {
            Self::network_with_detail("Connection failed", err.to_string())
        } else {
            Self::network_with_detail("HTTP request failed", err.to_string())
        }
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            message: format!("JSON parsing failed: {}", err),
        }
    }
}

impl From<toml::de::Error> for SweepError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}

impl From<std::io::Error> for SweepError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {}", err),
        }
    }
}

/// Failure of a single probe call, before classification.
///
/// The executor turns every variant into a verdict; these never escape it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The call did not finish in time
    #[error("probe timed out")]
    Timeout,

    /// Connection or transport failure
    #[error("network failure: {0}")]
    Network(String),

    /// The service rejected the session/auth context
    #[error("session rejected by service")]
    SessionRejected,

    /// The service refused this identifier for good
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}
