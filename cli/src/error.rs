//! Error types for the Pomodoro CLI.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while talking to the server.
///
/// The `Display` form is what the user sees after `error: `, so server
/// messages are passed through unchanged.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Request could not be sent or the response could not be decoded.
    #[error("could not reach server: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the request.
    #[error("{message}")]
    Api {
        status: u16,
        /// Machine-readable kind from the server, e.g. `conflict`.
        code: String,
        message: String,
    },

    /// No session exists to act on.
    #[error("no pomodoro session")]
    NoSession,
}

impl ClientError {
    /// Server error code, if the server produced this error.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// A specialized `Result` type for CLI operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_displays_server_message() {
        let err = ClientError::Api {
            status: 409,
            code: "conflict".to_string(),
            message: "conflict: a pomodoro is already running".to_string(),
        };
        assert_eq!(err.to_string(), "conflict: a pomodoro is already running");
        assert_eq!(err.code(), Some("conflict"));
    }

    #[test]
    fn no_session_display() {
        assert_eq!(ClientError::NoSession.to_string(), "no pomodoro session");
        assert_eq!(ClientError::NoSession.code(), None);
    }
}
