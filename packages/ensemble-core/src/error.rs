//! Centralized error types for the Ensemble core library.
//!
//! Every fallible operation in the crate returns [`EnsembleResult`]. The
//! variants follow the failure taxonomy the UI layer reports on:
//! connection-level failures, timeouts, malformed responses, rejected
//! credentials and references to players or queues that no longer exist.

use serde::Serialize;
use thiserror::Error;

use crate::protocol_constants::{AUTH_ERROR_CODES, NOT_FOUND_ERROR_CODES};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the Ensemble core.
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum EnsembleError {
    /// Connection-level failure: unreachable host, closed socket, failed handshake.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response within the request deadline.
    ///
    /// Treated as a transport failure for retry purposes.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Malformed or unexpected response shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Login rejected or token invalid/expired.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Referenced player or queue no longer exists server-side.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A command was issued while the session was not connected.
    #[error("Not connected")]
    NotConnected,

    /// Caller supplied an invalid argument (e.g. empty player id).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Server reported an error code that maps to no narrower variant.
    #[error("Server error {code}: {details}")]
    Server {
        /// Numeric error code from the response payload.
        code: i64,
        /// Human-readable details from the response payload.
        details: String,
    },
}

impl ErrorCode for EnsembleError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Protocol(_) => "protocol",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::NotConnected => "not_connected",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration",
            Self::Server { .. } => "server_error",
        }
    }
}

impl EnsembleError {
    /// Returns true for connection-class failures (transport, timeout, not connected).
    ///
    /// These are the failures the network retry profile retries.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::NotConnected
        )
    }

    /// Maps an `{error_code, details}` payload to the narrowest variant.
    #[must_use]
    pub fn from_server(code: i64, details: impl Into<String>) -> Self {
        let details = details.into();
        let lowered = details.to_lowercase();

        if NOT_FOUND_ERROR_CODES.contains(&code) || lowered.contains("not found") {
            Self::NotFound(details)
        } else if AUTH_ERROR_CODES.contains(&code)
            || lowered.contains("unauthorized")
            || lowered.contains("authentication")
        {
            Self::Auth(details)
        } else {
            Self::Server { code, details }
        }
    }
}

/// Convenient Result alias for crate-wide operations.
pub type EnsembleResult<T> = Result<T, EnsembleError>;

impl From<reqwest::Error> for EnsembleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EnsembleError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for EnsembleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
