//! Error handling for echem-session
//!
//! This module defines the crate-wide error type and a Result alias. Every
//! failure that reaches the session boundary is converted into one of these
//! variants, logged, and reconciled with the state machine before it is
//! returned to the caller.

use crate::session::state::ConnectionState;
use thiserror::Error;

/// Main error type for session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The instrument transport reported a failure (connect, disconnect, discover, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation did not complete within its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation is not valid in the current connection state
    #[error("Cannot {op} while {state}")]
    InvalidState {
        /// Operation that was rejected
        op: &'static str,
        /// State the session was in
        state: ConnectionState,
    },

    /// The device is already held by another session
    #[error("Device '{0}' is already connected to another session")]
    DeviceBusy(String),

    /// A method parameter could not be parsed
    #[error("Invalid value '{value}' for {field}")]
    InvalidParameter {
        /// Name of the offending field
        field: &'static str,
        /// Raw text that failed to parse
        value: String,
    },

    /// A method configuration parsed but is not physically meaningful
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// The UI-affine execution context has been torn down
    #[error("UI context is no longer available")]
    UiContextClosed,

    /// A scheduled UI callback was discarded before it ran
    #[error("UI callback was dropped before it ran")]
    CallbackDropped,

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SessionError>,
    },
}

impl SessionError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SessionError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::InvalidParameter {
            field: "e_begin",
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid value 'abc' for e_begin");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = SessionError::InvalidState {
            op: "start a measurement",
            state: ConnectionState::Measuring,
        };
        assert_eq!(err.to_string(), "Cannot start a measurement while Measuring");
    }

    #[test]
    fn test_error_with_context() {
        let err = SessionError::Transport("port closed".to_string());
        let with_ctx = err.with_context("Failed to connect");
        assert_eq!(with_ctx.to_string(), "Failed to connect: Transport error: port closed");
    }
}
