//! Status-bar socket client.
//!
//! Reads the one-line `MM:SS` answer the server writes to every connection.
//! Never fails: any problem yields [`PLACEHOLDER`].

use std::path::Path;
use std::time::Duration;

use tracing::debug;

/// Printed whenever the socket cannot be read.
pub const PLACEHOLDER: &str = "--:--";

/// Maximum time spent connecting and reading.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Returns the remaining time reported by the socket at `path`.
#[cfg(unix)]
pub async fn query(path: &Path) -> String {
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixStream;

    let read = async {
        let mut stream = UnixStream::connect(path).await?;
        let mut out = String::new();
        stream.read_to_string(&mut out).await?;
        Ok::<_, std::io::Error>(out)
    };

    match tokio::time::timeout(QUERY_TIMEOUT, read).await {
        Ok(Ok(line)) if !line.trim().is_empty() => line.trim().to_string(),
        Ok(Ok(_)) => PLACEHOLDER.to_string(),
        Ok(Err(err)) => {
            debug!(path = %path.display(), error = %err, "Status socket unavailable");
            PLACEHOLDER.to_string()
        }
        Err(_) => {
            debug!(path = %path.display(), "Status socket timed out");
            PLACEHOLDER.to_string()
        }
    }
}

#[cfg(not(unix))]
pub async fn query(path: &Path) -> String {
    debug!(path = %path.display(), "Status socket requires a unix platform");
    PLACEHOLDER.to_string()
}
