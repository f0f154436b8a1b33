//! Pomodoro Server - Main entry point.
//!
//! This binary starts the Pomodoro server with:
//! - Structured JSON logging
//! - Cleanup of sessions left active by a previous run
//! - Completion hooks (log line, optional webhook)
//! - The status-bar unix socket
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`pomodoro_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Ephemeral server with two-minute work phases
//! POMODORO_STORE=memory POMODORO_WORK_SECS=120 cargo run --bin pomodoro-server
//!
//! # Persistent server with a completion webhook
//! POMODORO_NOTIFY_URL=https://hooks.example.com/pomodoro \
//! PORT=7070 \
//! cargo run --release --bin pomodoro-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use pomodoro_server::config::{Config, StoreKind};
use pomodoro_server::error::ServerError;
use pomodoro_server::notify::{register_hooks, CompletionHook, LogHook, WebhookHook};
use pomodoro_server::routes::{create_router, AppState};
use pomodoro_server::store::{FileStore, MemoryStore, SharedStore};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                      - HTTP server port (default: 7070)");
            eprintln!("  POMODORO_BIND_ADDR        - Listen address (default: 127.0.0.1)");
            eprintln!("  POMODORO_DATA_DIR         - Directory for store files");
            eprintln!("  POMODORO_STORE            - 'file' or 'memory' (default: file)");
            eprintln!("  POMODORO_SOCKET_PATH      - Status-bar socket path");
            eprintln!("  POMODORO_WORK_SECS        - Default work phase (default: 1500)");
            eprintln!("  POMODORO_BREAK_SECS       - Default short break (default: 300)");
            eprintln!("  POMODORO_LONG_BREAK_SECS  - Default long break (default: 900)");
            eprintln!("  POMODORO_LOCK_TIMEOUT_MS  - Store lock timeout (default: 2000)");
            eprintln!("  POMODORO_NOTIFY_URL       - Webhook for completed phases");
            eprintln!("  RUST_LOG                  - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Server failed");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> Result<(), ServerError> {
    info!(
        port = config.port,
        bind_addr = %config.bind_addr,
        store = ?config.store,
        data_dir = %config.data_dir.display(),
        work_secs = config.durations.work_secs,
        "Pomodoro server starting"
    );

    let store: SharedStore = match config.store {
        StoreKind::File => Arc::new(FileStore::open(&config.data_dir, config.lock_timeout)?),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };

    let state = AppState::new(config.clone(), store);

    if let Some(stale) = state.engine.cleanup_stale().await? {
        info!(session_id = %stale, "Discarded unfinished session from previous run");
    }

    let mut hooks: Vec<Arc<dyn CompletionHook>> = vec![Arc::new(LogHook)];
    if let Some(ref url) = config.notify_url {
        match WebhookHook::new(url.clone()) {
            Ok(hook) => hooks.push(Arc::new(hook)),
            Err(err) => warn!(error = %err, url = %url, "Webhook disabled"),
        }
    }
    let hook_count = register_hooks(&state.bus, hooks).len();
    info!(hooks = hook_count, "Completion hooks registered");

    let shutdown = CancellationToken::new();

    #[cfg(unix)]
    let status_handle = match pomodoro_server::status::serve(
        config.socket_path.clone(),
        Arc::clone(&state.engine),
        shutdown.clone(),
    ) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(
                error = %err,
                path = %config.socket_path.display(),
                "Status socket unavailable"
            );
            None
        }
    };

    let engine = Arc::clone(&state.engine);
    let bus = state.bus.clone();
    let app = create_router(state);

    let bind_addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| ServerError::bind(bind_addr.clone(), err))?;
    info!(address = %bind_addr, "Server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    info!("Server ready to accept connections");

    let served = server
        .await
        .map_err(|err| ServerError::internal(err.to_string()));

    info!("Server shutting down gracefully");
    engine.shutdown().await;
    shutdown.cancel();
    #[cfg(unix)]
    {
        if let Some(handle) = status_handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Status socket task failed");
            }
        }
    }
    bus.shutdown().await;

    served
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves on SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
