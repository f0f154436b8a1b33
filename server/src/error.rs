//! Error types for the Pomodoro server.
//!
//! This module defines the error hierarchy used throughout the server,
//! providing type-safe error handling with meaningful error messages.
//!
//! # Error Types
//!
//! - [`PomodoroError`] - Domain errors raised by the store, engine and task registry
//! - [`ServerError`] - Top-level server errors encompassing startup and runtime failures
//!
//! # Example
//!
//! ```rust
//! use pomodoro_server::error::PomodoroError;
//!
//! fn validate_title(title: &str) -> Result<(), PomodoroError> {
//!     if title.trim().is_empty() {
//!         return Err(PomodoroError::validation("task title cannot be empty"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(validate_title("").is_err());
//! ```

use std::error::Error;
use std::fmt;

use thiserror::Error as ThisError;

use crate::config::ConfigError;

/// Errors raised by the session store, the pomodoro engine and the task registry.
///
/// None of these are retried automatically. Transport adapters map each kind
/// to a protocol-appropriate response via [`PomodoroError::code`].
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum PomodoroError {
    /// A session is already active or paused.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced session or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input such as an empty title or a zero duration.
    #[error("validation error: {0}")]
    Validation(String),

    /// A store update referenced a session id other than the stored one.
    #[error("session id mismatch: expected {expected}, got {actual}")]
    Mismatch {
        /// Id of the record currently in the store.
        expected: String,
        /// Id supplied by the caller.
        actual: String,
    },

    /// Storage read or write failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Persisted data could not be parsed.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// The store lock is held by someone else.
    #[error("could not acquire store lock: {0}")]
    Lock(String),

    /// Unexpected failure (task join errors, serialization bugs).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PomodoroError {
    /// Creates a new conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a new not-found error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pomodoro_server::error::PomodoroError;
    ///
    /// let err = PomodoroError::not_found("task abc");
    /// assert!(matches!(err, PomodoroError::NotFound(_)));
    /// ```
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new mismatch error.
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Mismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Creates a new corrupt-state error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptState(message.into())
    }

    /// Creates a new lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Machine-readable error code used in JSON error bodies and GraphQL extensions.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Mismatch { .. } => "mismatch",
            Self::Io(_) => "io",
            Self::CorruptState(_) => "corrupt_state",
            Self::Lock(_) => "lock",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` if this error was caused by the caller's request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::NotFound(_) | Self::Validation(_) | Self::Mismatch { .. }
        )
    }
}

impl From<std::io::Error> for PomodoroError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PomodoroError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}

/// Top-level error type for the Pomodoro server binary.
///
/// # Error Categories
///
/// - **Configuration errors**: Problems loading or validating server config
/// - **Domain errors**: Store or engine failures during startup
/// - **Bind errors**: The HTTP listener or status socket could not be bound
/// - **Internal errors**: Unexpected failures that don't fit other categories
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error during server initialization.
    Config(ConfigError),

    /// Store, engine or registry error.
    Pomodoro(PomodoroError),

    /// Listener could not be bound.
    Bind {
        /// Address or socket path that failed to bind.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Unexpected internal server error.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Pomodoro(err) => write!(f, "{err}"),
            Self::Bind { address, source } => write!(f, "failed to bind {address}: {source}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Pomodoro(err) => Some(err),
            Self::Bind { source, .. } => Some(source),
            Self::Internal(_) => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<PomodoroError> for ServerError {
    fn from(err: PomodoroError) -> Self {
        Self::Pomodoro(err)
    }
}

impl ServerError {
    /// Creates a new bind error.
    pub fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// A specialized Result type for store, engine and registry operations.
pub type Result<T> = std::result::Result<T, PomodoroError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_displays_correctly() {
        let err = PomodoroError::conflict("a pomodoro is already running");
        assert_eq!(err.to_string(), "conflict: a pomodoro is already running");
    }

    #[test]
    fn mismatch_displays_both_ids() {
        let err = PomodoroError::mismatch("abc", "def");
        assert_eq!(err.to_string(), "session id mismatch: expected abc, got def");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(PomodoroError::conflict("x").code(), "conflict");
        assert_eq!(PomodoroError::not_found("x").code(), "not_found");
        assert_eq!(PomodoroError::validation("x").code(), "validation");
        assert_eq!(PomodoroError::mismatch("a", "b").code(), "mismatch");
        assert_eq!(PomodoroError::io("x").code(), "io");
        assert_eq!(PomodoroError::corrupt("x").code(), "corrupt_state");
        assert_eq!(PomodoroError::lock("x").code(), "lock");
        assert_eq!(PomodoroError::internal("x").code(), "internal");
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(PomodoroError::conflict("x").is_client_error());
        assert!(PomodoroError::not_found("x").is_client_error());
        assert!(PomodoroError::validation("x").is_client_error());
        assert!(!PomodoroError::io("x").is_client_error());
        assert!(!PomodoroError::lock("x").is_client_error());
        assert!(!PomodoroError::corrupt("x").is_client_error());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PomodoroError = io.into();
        assert!(matches!(err, PomodoroError::Io(ref m) if m.contains("denied")));
    }

    #[test]
    fn server_error_wraps_config_error() {
        let err: ServerError = ConfigError::MissingEnvVar("PORT".into()).into();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn server_error_bind_displays_address() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = ServerError::bind("127.0.0.1:7070", io);
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:7070: in use");
    }

    #[test]
    fn from_pomodoro_error_works_with_question_mark() {
        fn inner() -> std::result::Result<(), ServerError> {
            let _: () = Err(PomodoroError::lock("held"))?;
            Ok(())
        }

        assert!(matches!(inner().unwrap_err(), ServerError::Pomodoro(_)));
    }
}
