//! Error types for http-courier
//!
//! Configuration and submission errors are returned directly to the caller.
//! Everything that goes wrong while a task executes is delivered through that
//! task's event sink instead, so the dispatcher itself never fails because of
//! a single request.

use thiserror::Error;

/// Result type alias for http-courier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for http-courier
#[derive(Debug, Error)]
pub enum Error {
    /// Bad constructor or configuration argument
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// Human-readable description of the problem
        message: String,
        /// The configuration key that caused the error (e.g., "connections")
        key: Option<String>,
    },

    /// Submission after the dispatcher was stopped or cancelled
    #[error("submission rejected: dispatcher has already been closed")]
    RejectedSubmission,

    /// Connect, send or receive failed for a reason other than cancellation
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The configured parser could not turn the received body into a payload
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The task was cancelled before or during execution
    #[error("request cancelled")]
    Cancelled,

    /// A response URL could not be resolved to a cookie origin
    #[error("cookie origin could not be resolved: {0}")]
    CookieConversion(String),

    /// I/O error (request body sources)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A callback, parser or collaborator panicked while the task executed
    #[error("task execution panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidConfiguration`] tied to a config key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Whether this error represents cancellation rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Failures of the underlying HTTP exchange
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established
    #[error("connection to {url} failed: {reason}")]
    Connect {
        /// Target URL
        url: String,
        /// Underlying cause
        reason: String,
    },

    /// The request was sent but the exchange failed
    #[error("request failed: {0}")]
    Request(String),

    /// No data arrived within the configured timeout
    #[error("{phase} timed out after {millis} ms")]
    TimedOut {
        /// Which phase of the exchange timed out ("connect", "read")
        phase: &'static str,
        /// The timeout that elapsed
        millis: u128,
    },

    /// A fixed-length upload produced a different number of bytes than declared
    #[error("declared content length {declared} but body produced {actual} bytes")]
    BodyLength {
        /// Length declared with fixed-length streaming
        declared: u64,
        /// Bytes the body source actually produced
        actual: u64,
    },

    /// The transport stopped accepting request body data
    #[error("request body channel closed by transport")]
    Closed,

    /// I/O error while reading from or writing to a stream
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::TimedOut {
                phase: if err.is_connect() { "connect" } else { "read" },
                millis: 0,
            }
        } else if err.is_connect() {
            TransportError::Connect {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: err.to_string(),
            }
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// A response body could not be parsed
#[derive(Debug, Error)]
pub enum ParseError {
    /// Body was not valid UTF-8
    #[error("response body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Body was not valid JSON for the requested type
    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Custom parser failure
    #[error("{0}")]
    Other(String),
}
