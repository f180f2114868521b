//! Sending side of the event protocol, used by the hook command.

use super::protocol::SessionEvent;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Deliver one event to the daemon at `socket_path`.
pub async fn send_event(socket_path: &Path, event: &SessionEvent) -> Result<()> {
    let payload = event.encode().context("Failed to encode event")?;

    tokio::time::timeout(SEND_TIMEOUT, async {
        let mut stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .context("Timed out sending event")?
}
