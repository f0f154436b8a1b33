//! Pomodoro Server - session engine and real-time event hub.
//!
//! This crate provides the server component of Pomodoro, responsible for:
//! - Running the single pomodoro session state machine and its ticker
//! - Persisting the session record and the task list
//! - Publishing every state change on an in-process event bus
//! - Exposing commands and live events over HTTP, WebSocket, GraphQL and a
//!   status-bar unix socket
//!
//! # Architecture
//!
//! The [`engine`] and the [`tasks`] registry write through a [`store`] and
//! publish on the [`bus`]. Transports ([`routes`], [`graphql`], `status`) only
//! call engine and registry methods and subscribe to the bus; they never touch
//! the store directly.

pub mod broadcast;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod graphql;
pub mod notify;
pub mod routes;
#[cfg(unix)]
pub mod status;
pub mod store;
pub mod tasks;
pub mod types;
