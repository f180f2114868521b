//! Logs a one-line summary of the session table whenever it changes.

use super::SessionStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Counts reported by the summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub total: usize,
    pub idle: usize,
    pub working: usize,
}

impl SessionSummary {
    pub fn of(store: &SessionStore) -> Self {
        let sessions = store.snapshot();
        let idle = sessions
            .iter()
            .filter(|s| s.status == crate::data::SessionStatus::Idle)
            .count();
        Self {
            total: sessions.len(),
            idle,
            working: sessions.len() - idle,
        }
    }
}

pub fn spawn_summary_logger(
    store: Arc<SessionStore>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut revisions = store.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let revision = *revisions.borrow_and_update();
                    let summary = SessionSummary::of(&store);
                    tracing::info!(
                        revision,
                        total = summary.total,
                        idle = summary.idle,
                        working = summary.working,
                        "Sessions changed"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SessionStatus, TerminalInfo};

    #[test]
    fn test_summary_counts() {
        let store = SessionStore::new();
        assert_eq!(SessionSummary::of(&store), SessionSummary::default());

        store.add("a", "/tmp/a", TerminalInfo::default());
        store.add("b", "/tmp/b", TerminalInfo::default());
        store.update_status("b", SessionStatus::Idle, None);

        assert_eq!(
            SessionSummary::of(&store),
            SessionSummary {
                total: 2,
                idle: 1,
                working: 1
            }
        );
    }

    #[tokio::test]
    async fn test_logger_stops_on_shutdown() {
        let store = Arc::new(SessionStore::new());
        let (tx, rx) = watch::channel(false);
        let handle = spawn_summary_logger(Arc::clone(&store), rx);

        store.add("a", "/tmp/a", TerminalInfo::default());
        tokio::task::yield_now().await;

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
