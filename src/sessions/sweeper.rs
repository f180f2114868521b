//! Periodic eviction of stale sessions.

use super::SessionStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    pub interval: Duration,
    pub idle_ttl: Duration,
    pub working_ttl: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(30 * 60),
            working_ttl: Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl SweepPolicy {
    /// One eviction pass against the current wall clock.
    pub fn sweep_now(&self, store: &SessionStore) -> Vec<String> {
        store.sweep(Utc::now(), to_chrono(self.idle_ttl), to_chrono(self.working_ttl))
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

/// Run the sweeper until `shutdown` flips to true.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    policy: SweepPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + policy.interval,
            policy.interval,
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = policy.sweep_now(&store);
                    if !removed.is_empty() {
                        tracing::info!(count = removed.len(), ids = ?removed, "Evicted stale sessions");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Session sweeper stopped");
    })
}
