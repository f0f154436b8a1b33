//! Pomodoro CLI - command-line client for the Pomodoro server.
//!
//! # Modules
//!
//! - [`client`]: HTTP client for the server API
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types surfaced to the user
//! - [`status`]: Status-bar socket query
//! - [`types`]: Session and task records as returned by the server

pub mod client;
pub mod config;
pub mod error;
pub mod status;
pub mod types;

pub use client::{ApiClient, StartOptions};
pub use config::Config;
pub use error::{ClientError, Result};
pub use types::{Phase, Pomodoro, PomodoroState, Task};
