//! Configuration module for the Pomodoro CLI.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `POMODORO_SERVER_URL` | No | `http://127.0.0.1:7070` | Base URL of the server API |
//! | `POMODORO_SOCKET_PATH` | No | `<data dir>/pomodoro.sock` | Status-bar socket |
//! | `POMODORO_DATA_DIR` | No | platform data dir | Used to derive the socket path |
//!
//! # Example
//!
//! ```no_run
//! use pomodoro_cli::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Server URL: {}", config.server_url);
//! ```

use std::env;
use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;

/// Default server URL.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:7070";

/// Socket file name inside the data directory.
const SOCKET_FILE_NAME: &str = "pomodoro.sock";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// No socket path was configured and none could be derived.
    #[error("failed to determine data directory; set POMODORO_SOCKET_PATH")]
    NoDataDirectory,
}

/// Configuration for the Pomodoro CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server base URL without a trailing slash.
    pub server_url: String,

    /// Path of the server's status-bar socket.
    pub socket_path: PathBuf,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `POMODORO_SERVER_URL` is not an http(s) URL, or if
    /// no socket path can be determined.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = match non_empty_var("POMODORO_SERVER_URL") {
            Some(url) => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::InvalidValue {
                        key: "POMODORO_SERVER_URL".to_string(),
                        message: "must start with http:// or https://".to_string(),
                    });
                }
                url.trim_end_matches('/').to_string()
            }
            None => DEFAULT_SERVER_URL.to_string(),
        };

        let socket_path = match non_empty_var("POMODORO_SOCKET_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_data_dir()?.join(SOCKET_FILE_NAME),
        };

        Ok(Self {
            server_url,
            socket_path,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Same lookup as the server, so both agree on the socket location.
fn default_data_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = non_empty_var("POMODORO_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    ProjectDirs::from("", "", "pomodoro")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDirectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Runs `f` with all POMODORO_* variables cleared, restoring them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("POMODORO_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for key in ["POMODORO_SERVER_URL", "POMODORO_SOCKET_PATH", "POMODORO_DATA_DIR"] {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    #[test]
    #[serial]
    fn defaults_point_at_local_server() {
        with_clean_env(|| {
            env::set_var("POMODORO_DATA_DIR", "/tmp/pomodoro-test");
            let config = Config::from_env().unwrap();
            assert_eq!(config.server_url, DEFAULT_SERVER_URL);
            assert_eq!(
                config.socket_path,
                PathBuf::from("/tmp/pomodoro-test/pomodoro.sock")
            );
        });
    }

    #[test]
    #[serial]
    fn explicit_values_win() {
        with_clean_env(|| {
            env::set_var("POMODORO_SERVER_URL", "https://pomo.example.com/");
            env::set_var("POMODORO_SOCKET_PATH", "/run/user/1000/pomo.sock");
            let config = Config::from_env().unwrap();
            assert_eq!(config.server_url, "https://pomo.example.com");
            assert_eq!(config.socket_path, PathBuf::from("/run/user/1000/pomo.sock"));
        });
    }

    #[test]
    #[serial]
    fn non_http_url_is_rejected() {
        with_clean_env(|| {
            env::set_var("POMODORO_SERVER_URL", "ftp://example.com");
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "POMODORO_SERVER_URL"));
        });
    }
}
