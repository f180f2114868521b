//! Local event ingestion over a Unix domain socket.
//!
//! Agents (via their hooks) connect, write one JSON message, and go away. The
//! daemon never answers; the connection is closed once the message is read.

pub mod client;
pub mod protocol;

use crate::data::SessionStatus;
use crate::sessions::SessionStore;
use protocol::{ProtocolError, SessionEvent, MAX_MESSAGE_BYTES};
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How long a client may take to deliver its message.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK_SIZE: usize = 1024;
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("socket path is empty")]
    EmptySocketPath,
    #[error("{0} exists and is not a socket")]
    NotASocket(String),
    #[error("another daemon is already listening on {0}")]
    AlreadyRunning(String),
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A bound listener. Dropping it unlinks the socket path.
#[derive(Debug)]
pub struct SocketListener {
    path: PathBuf,
    listener: UnixListener,
}

impl SocketListener {
    /// Bind at `path`, replacing a stale socket left by a previous run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, ListenerError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ListenerError::EmptySocketPath);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|source| ListenerError::Bind {
            path: path.display().to_string(),
            source,
        })?;
        if let Err(err) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
            debug!(error = %err, path = %path.display(), "Could not restrict socket permissions");
        }

        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` flips to true. Each connection is
    /// served by its own task, so a slow client never stalls the accept loop.
    pub async fn run(self, store: Arc<SessionStore>, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.path.display(), "Socket listener started");

        let mut accept_errors: u32 = 0;
        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    accept = self.listener.accept() => match accept {
                        Ok((stream, _addr)) => {
                            accept_errors = 0;
                            let store = Arc::clone(&store);
                            tokio::spawn(async move {
                                handle_connection(stream, &store).await;
                            });
                        }
                        Err(err) => {
                            // e.g. EMFILE: retrying at once would spin
                            accept_errors = accept_errors.saturating_add(1);
                            let pause = accept_backoff(accept_errors);
                            warn!(error = %err, pause_ms = pause.as_millis() as u64, "Failed to accept connection");
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
            }
        }

        info!(path = %self.path.display(), "Socket listener stopped");
    }
}

/// Pause after the `consecutive`-th accept failure in a row.
fn accept_backoff(consecutive: u32) -> Duration {
    let doublings = consecutive.saturating_sub(1).min(8);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << doublings)
        .min(ACCEPT_BACKOFF_MAX)
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(error = %err, path = %self.path.display(), "Failed to remove socket path");
            }
        }
    }
}

fn remove_stale_socket(path: &Path) -> Result<(), ListenerError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    if !metadata.file_type().is_socket() {
        return Err(ListenerError::NotASocket(path.display().to_string()));
    }

    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => Err(ListenerError::AlreadyRunning(path.display().to_string())),
        Err(_) => {
            std::fs::remove_file(path)?;
            debug!(path = %path.display(), "Removed stale socket");
            Ok(())
        }
    }
}

async fn handle_connection(mut stream: UnixStream, store: &SessionStore) {
    let bytes = match read_message(&mut stream).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "Dropping message");
            return;
        }
    };

    match SessionEvent::decode(&bytes) {
        Ok(event) => {
            apply_event(store, event);
        }
        Err(err) => {
            warn!(error = %err, "Dropping malformed message");
        }
    }
}

/// Read until the peer closes, a complete JSON value has arrived, or the
/// size cap is exceeded.
async fn read_message(stream: &mut UnixStream) -> Result<Vec<u8>, ProtocolError> {
    let read = async {
        let mut buf = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(buf);
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_MESSAGE_BYTES {
                return Err(ProtocolError::TooLarge {
                    limit: MAX_MESSAGE_BYTES,
                });
            }
            if is_complete_json(&buf) {
                return Ok(buf);
            }
        }
    };

    tokio::time::timeout(READ_TIMEOUT, read)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// Clients are not required to half-close, so a buffer that already parses
/// (or can never parse) ends the read.
fn is_complete_json(buf: &[u8]) -> bool {
    match serde_json::from_slice::<serde::de::IgnoredAny>(buf) {
        Ok(_) => true,
        Err(err) => !err.is_eof(),
    }
}

/// Route a decoded event to the store. Returns whether the store changed.
pub fn apply_event(store: &SessionStore, event: SessionEvent) -> bool {
    let name = event.name();
    let applied = match event {
        SessionEvent::SessionStart {
            session_id,
            cwd,
            terminal,
            transcript_path,
        } => {
            let added = store.add(&session_id, &cwd, terminal);
            if added {
                info!(session_id = %session_id, cwd = %cwd.display(), "Session started");
                if let Some(path) = transcript_path {
                    store.set_transcript_path(&session_id, path);
                }
            }
            added
        }
        SessionEvent::SessionEnd { session_id } => {
            let removed = store.remove(&session_id);
            if removed {
                info!(session_id = %session_id, "Session ended");
            }
            removed
        }
        SessionEvent::AgentIdle {
            session_id,
            last_message,
        } => store.update_status(&session_id, SessionStatus::Idle, last_message),
        SessionEvent::AgentActive { session_id } => {
            store.update_status(&session_id, SessionStatus::Working, None)
        }
    };
    debug!(event = name, applied, "Event processed");
    applied
}
