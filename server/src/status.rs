//! Status-bar socket.
//!
//! A unix-domain socket that answers every connection with the remaining
//! time of the latest session as `MM:SS\n`, then closes. Any failure to read
//! the engine yields the placeholder `--:--\n`; callers never see an error.
//!
//! ```bash
//! socat - UNIX-CONNECT:$HOME/.local/share/pomodoro/pomodoro.sock
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::PomodoroEngine;

/// Shown whenever the remaining time is unavailable.
pub const PLACEHOLDER: &str = "--:--";

/// Formats seconds as zero-padded `MM:SS`. Minutes are not capped at 59.
///
/// ```rust
/// use pomodoro_server::status::format_remaining;
///
/// assert_eq!(format_remaining(0), "00:00");
/// assert_eq!(format_remaining(1499), "24:59");
/// assert_eq!(format_remaining(6000), "100:00");
/// ```
#[must_use]
pub fn format_remaining(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Line written to a status-bar client.
pub async fn status_line(engine: &PomodoroEngine) -> String {
    match engine.remaining_secs().await {
        Ok(secs) => format_remaining(secs),
        Err(err) => {
            debug!(error = %err, "Remaining time unavailable");
            PLACEHOLDER.to_string()
        }
    }
}

/// Binds the status socket at `path` and serves it until `shutdown` fires.
///
/// A leftover socket file from an earlier run is removed before binding; the
/// file is removed again when the server stops.
///
/// # Errors
///
/// Returns the bind error if the socket cannot be created.
pub fn serve(
    path: impl Into<PathBuf>,
    engine: Arc<PomodoroEngine>,
    shutdown: CancellationToken,
) -> io::Result<JoinHandle<()>> {
    let path = path.into();
    remove_stale(&path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(&path)?;
    info!(path = %path.display(), "Status socket listening");

    Ok(tokio::spawn(async move {
        loop {
            let stream = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        warn!(error = %err, "Status socket accept failed");
                        continue;
                    }
                },
            };

            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if let Err(err) = answer(stream, &engine).await {
                    debug!(error = %err, "Status client went away");
                }
            });
        }

        remove_stale(&path);
        debug!(path = %path.display(), "Status socket closed");
    }))
}

async fn answer(mut stream: UnixStream, engine: &PomodoroEngine) -> io::Result<()> {
    let line = status_line(engine).await;
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await
}

fn remove_stale(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale status socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "Could not remove status socket"),
    }
}
