//! Error types for ReasonKit Replay
//!
//! This module provides the error hierarchy using `thiserror`. Only
//! connection-level failures are fatal; everything else is expected to be
//! absorbed by the component that encounters it (see [`Error::is_fatal`]).

use thiserror::Error;

/// The main error type for ReasonKit Replay operations
#[derive(Error, Debug)]
pub enum Error {
    /// Remote-debugging connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Element lookup errors during replay
    #[error("Locator error: {0}")]
    Locator(#[from] LocatorError),

    /// Session log errors
    #[error("Session log error: {0}")]
    SessionLog(#[from] SessionLogError),

    /// Caption input errors
    #[error("Caption error: {0}")]
    Caption(#[from] CaptionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ChromiumOxide errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// A protocol call did not answer in time
    #[error("Protocol call timed out after {0}ms")]
    Timeout(u64),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Errors reaching or holding the remote-debugging endpoint
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Endpoint is not a usable URL
    #[error("Invalid debugging endpoint: {0}")]
    InvalidEndpoint(String),

    /// Could not connect to the endpoint
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed {
        /// Endpoint that was dialled
        endpoint: String,
        /// Underlying failure
        reason: String,
    },

    /// Connected, but no page could be selected or created
    #[error("No usable page: {0}")]
    NoPage(String),

    /// A protocol domain or event subscription could not be established
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Browser connection lost
    #[error("Browser connection lost")]
    ConnectionLost,
}

/// Element lookup errors
#[derive(Error, Debug)]
pub enum LocatorError {
    /// No element matched the selector, or it could not be clicked
    #[error("Element not found: {0}")]
    NotFound(String),

    /// Neither candidate of a locator resolved
    #[error("No locator candidate resolved (css: {css:?}, xpath: {xpath})")]
    Exhausted {
        /// CSS candidate, if any
        css: Option<String>,
        /// XPath candidate
        xpath: String,
    },
}

/// Session log errors
#[derive(Error, Debug)]
pub enum SessionLogError {
    /// A line could not be parsed into an event
    #[error("Malformed log line {line}: {reason}")]
    MalformedLine {
        /// 1-based line number
        line: usize,
        /// Parse failure
        reason: String,
    },

    /// Payload does not match the declared event type
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Caption input errors
#[derive(Error, Debug)]
pub enum CaptionError {
    /// Captions value is not a JSON array of `{index, text}`
    #[error("Caption parse failed: {0}")]
    Parse(String),
}

/// Result type alias for ReasonKit Replay operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic error from a string
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Error::Generic(msg.into())
    }

    /// Create a CDP error from a string
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// Whether this error should end the process with a non-zero exit code
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Whether this error is a per-call timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Convert chromiumoxide errors
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}
