//! Server configuration module.
//!
//! Parses configuration from environment variables for the Pomodoro server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 7070 | HTTP server port |
//! | `POMODORO_BIND_ADDR` | No | `127.0.0.1` | Address the HTTP server binds to |
//! | `POMODORO_DATA_DIR` | No | platform data dir | Directory holding the store files |
//! | `POMODORO_STORE` | No | `file` | Store backend: `file` or `memory` |
//! | `POMODORO_SOCKET_PATH` | No | `<data dir>/pomodoro.sock` | Status-bar query socket |
//! | `POMODORO_WORK_SECS` | No | 1500 | Default work phase length |
//! | `POMODORO_BREAK_SECS` | No | 300 | Default short break length |
//! | `POMODORO_LONG_BREAK_SECS` | No | 900 | Default long break length |
//! | `POMODORO_LOCK_TIMEOUT_MS` | No | 2000 | Max wait for the store lock file |
//! | `POMODORO_NOTIFY_URL` | No | - | Webhook called when a phase completes |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 7070;

/// Default bind address (loopback only).
const DEFAULT_BIND_ADDR: &str = "127.0.0.1";

/// Default work phase length (25 minutes).
pub const DEFAULT_WORK_SECS: u64 = 25 * 60;

/// Default short break length (5 minutes).
pub const DEFAULT_BREAK_SECS: u64 = 5 * 60;

/// Default long break length (15 minutes).
pub const DEFAULT_LONG_BREAK_SECS: u64 = 15 * 60;

/// Default store lock acquisition timeout.
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;

/// Socket file name inside the data directory.
const SOCKET_FILE_NAME: &str = "pomodoro.sock";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// No data directory was configured and none could be derived.
    #[error("failed to determine data directory; set POMODORO_DATA_DIR")]
    NoDataDirectory,
}

/// Which store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// JSON files with a lock file in the data directory.
    File,
    /// Process-local memory; nothing survives a restart.
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected 'file' or 'memory', got '{other}'")),
        }
    }
}

/// Default phase lengths used when a start request omits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    pub work_secs: u64,
    pub break_secs: u64,
    pub long_break_secs: u64,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            work_secs: DEFAULT_WORK_SECS,
            break_secs: DEFAULT_BREAK_SECS,
            long_break_secs: DEFAULT_LONG_BREAK_SECS,
        }
    }
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Address the HTTP listener binds to.
    pub bind_addr: String,

    /// Directory holding `pomodoro.json`, `tasks.json` and the lock file.
    pub data_dir: PathBuf,

    /// Store backend.
    pub store: StoreKind,

    /// Path of the status-bar unix socket.
    pub socket_path: PathBuf,

    /// Defaults applied to start requests.
    pub durations: PhaseDurations,

    /// How long to wait for the store lock file before failing.
    pub lock_timeout: Duration,

    /// Optional webhook notified on phase completion.
    pub notify_url: Option<String>,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A numeric variable does not parse or is zero where a duration is expected
    /// - `POMODORO_STORE` names an unknown backend
    /// - No data directory is configured and the platform default is unavailable
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pomodoro_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_number("PORT", DEFAULT_PORT)?;
        let bind_addr = env::var("POMODORO_BIND_ADDR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let data_dir = parse_data_dir()?;
        let store = parse_store_kind()?;
        let socket_path = env::var("POMODORO_SOCKET_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(SOCKET_FILE_NAME));
        let durations = PhaseDurations {
            work_secs: parse_duration_secs("POMODORO_WORK_SECS", DEFAULT_WORK_SECS)?,
            break_secs: parse_duration_secs("POMODORO_BREAK_SECS", DEFAULT_BREAK_SECS)?,
            long_break_secs: parse_duration_secs(
                "POMODORO_LONG_BREAK_SECS",
                DEFAULT_LONG_BREAK_SECS,
            )?,
        };
        let lock_timeout = Duration::from_millis(parse_number(
            "POMODORO_LOCK_TIMEOUT_MS",
            DEFAULT_LOCK_TIMEOUT_MS,
        )?);
        let notify_url = env::var("POMODORO_NOTIFY_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        if let Some(ref url) = notify_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidFormat {
                    var: "POMODORO_NOTIFY_URL".to_string(),
                    message: "must start with http:// or https://".to_string(),
                });
            }
        }

        Ok(Self {
            port,
            bind_addr,
            data_dir,
            store,
            socket_path,
            durations,
            lock_timeout,
            notify_url,
        })
    }

    /// Configuration for tests: in-memory store, port 0, default durations.
    #[must_use]
    pub fn for_tests(data_dir: PathBuf) -> Self {
        Self {
            port: 0,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            socket_path: data_dir.join(SOCKET_FILE_NAME),
            data_dir,
            store: StoreKind::Memory,
            durations: PhaseDurations::default(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            notify_url: None,
        }
    }
}

/// Parse a numeric environment variable, falling back to `default` when unset.
fn parse_number<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|err: T::Err| ConfigError::InvalidFormat {
                var: name.to_string(),
                message: err.to_string(),
            }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse a phase length in seconds; zero is rejected.
fn parse_duration_secs(name: &str, default: u64) -> Result<u64, ConfigError> {
    let secs = parse_number(name, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(secs)
}

/// Parse the POMODORO_STORE environment variable.
fn parse_store_kind() -> Result<StoreKind, ConfigError> {
    match env::var("POMODORO_STORE") {
        Ok(value) if !value.trim().is_empty() => {
            value
                .parse()
                .map_err(|message| ConfigError::InvalidFormat {
                    var: "POMODORO_STORE".to_string(),
                    message,
                })
        }
        _ => Ok(StoreKind::File),
    }
}

/// Resolve the data directory from POMODORO_DATA_DIR or the platform default.
fn parse_data_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = env::var("POMODORO_DATA_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    ProjectDirs::from("", "", "pomodoro")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDirectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to temporarily set environment variables for testing.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.iter().rev() {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    const ALL_VARS: &[&str] = &[
        "PORT",
        "POMODORO_BIND_ADDR",
        "POMODORO_DATA_DIR",
        "POMODORO_STORE",
        "POMODORO_SOCKET_PATH",
        "POMODORO_WORK_SECS",
        "POMODORO_BREAK_SECS",
        "POMODORO_LONG_BREAK_SECS",
        "POMODORO_LOCK_TIMEOUT_MS",
        "POMODORO_NOTIFY_URL",
    ];

    fn clean_env() -> EnvGuard {
        let mut guard = EnvGuard::new();
        for var in ALL_VARS {
            guard.remove(var);
        }
        guard
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        let mut guard = clean_env();
        guard.set("POMODORO_DATA_DIR", "/tmp/pomodoro-test");

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pomodoro-test"));
        assert_eq!(config.store, StoreKind::File);
        assert_eq!(
            config.socket_path,
            PathBuf::from("/tmp/pomodoro-test/pomodoro.sock")
        );
        assert_eq!(config.durations, PhaseDurations::default());
        assert_eq!(config.lock_timeout, Duration::from_millis(2000));
        assert!(config.notify_url.is_none());
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        let mut guard = clean_env();
        guard.set("PORT", "9090");
        guard.set("POMODORO_BIND_ADDR", "0.0.0.0");
        guard.set("POMODORO_DATA_DIR", "/var/lib/pomodoro");
        guard.set("POMODORO_STORE", "memory");
        guard.set("POMODORO_SOCKET_PATH", "/run/pomodoro.sock");
        guard.set("POMODORO_WORK_SECS", "50");
        guard.set("POMODORO_BREAK_SECS", "10");
        guard.set("POMODORO_LONG_BREAK_SECS", "30");
        guard.set("POMODORO_LOCK_TIMEOUT_MS", "500");
        guard.set("POMODORO_NOTIFY_URL", "https://hooks.example.com/done");

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.port, 9090);
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.socket_path, PathBuf::from("/run/pomodoro.sock"));
        assert_eq!(
            config.durations,
            PhaseDurations {
                work_secs: 50,
                break_secs: 10,
                long_break_secs: 30,
            }
        );
        assert_eq!(config.lock_timeout, Duration::from_millis(500));
        assert_eq!(
            config.notify_url.as_deref(),
            Some("https://hooks.example.com/done")
        );
    }

    #[test]
    #[serial]
    fn test_parse_port_invalid() {
        let mut guard = clean_env();
        guard.set("PORT", "not-a-number");

        let result = parse_number::<u16>("PORT", DEFAULT_PORT);
        assert!(matches!(result, Err(ConfigError::InvalidFormat { ref var, .. }) if var == "PORT"));
    }

    #[test]
    #[serial]
    fn test_parse_port_out_of_range() {
        let mut guard = clean_env();
        guard.set("PORT", "99999");

        assert!(parse_number::<u16>("PORT", DEFAULT_PORT).is_err());
    }

    #[test]
    #[serial]
    fn test_zero_duration_rejected() {
        let mut guard = clean_env();
        guard.set("POMODORO_DATA_DIR", "/tmp/pomodoro-test");
        guard.set("POMODORO_WORK_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == "POMODORO_WORK_SECS")
        );
    }

    #[test]
    #[serial]
    fn test_unknown_store_rejected() {
        let mut guard = clean_env();
        guard.set("POMODORO_DATA_DIR", "/tmp/pomodoro-test");
        guard.set("POMODORO_STORE", "sqlite");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == "POMODORO_STORE"));
    }

    #[test]
    #[serial]
    fn test_notify_url_requires_http_scheme() {
        let mut guard = clean_env();
        guard.set("POMODORO_DATA_DIR", "/tmp/pomodoro-test");
        guard.set("POMODORO_NOTIFY_URL", "ftp://example.com");

        let err = Config::from_env().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == "POMODORO_NOTIFY_URL")
        );
    }

    #[test]
    fn test_store_kind_parsing() {
        assert_eq!("file".parse::<StoreKind>(), Ok(StoreKind::File));
        assert_eq!(" Memory ".parse::<StoreKind>(), Ok(StoreKind::Memory));
        assert!("redis".parse::<StoreKind>().is_err());
    }
}
