//! In-memory session table shared by the listener, sweeper and poller.

use crate::data::{CheckCounts, PullRequestStatus, Session, SessionStatus, TerminalInfo};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Concurrency-safe table of sessions, ordered by creation.
///
/// Every mutation happens under one write lock, so `snapshot()` always sees
/// whole sessions. Observers call `subscribe()` and re-read `snapshot()` when
/// the revision moves.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<Vec<Session>>,
    revision: watch::Sender<u64>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            sessions: RwLock::new(Vec::new()),
            revision,
        }
    }

    /// Create a Working session. Returns false, leaving the existing session
    /// untouched, if the id is already present.
    pub fn add(&self, id: &str, cwd: impl Into<PathBuf>, terminal: TerminalInfo) -> bool {
        self.add_at(id, cwd, terminal, Utc::now())
    }

    pub fn add_at(
        &self,
        id: &str,
        cwd: impl Into<PathBuf>,
        terminal: TerminalInfo,
        now: DateTime<Utc>,
    ) -> bool {
        let mut sessions = self.write();
        if sessions.iter().any(|s| s.id == id) {
            return false;
        }
        sessions.push(Session::new(id, cwd, terminal, now));
        self.bump();
        true
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        let removed = sessions.len() != before;
        if removed {
            self.bump();
        }
        removed
    }

    /// Set the status and touch `last_activity`. `last_message` only
    /// overwrites when provided. No-op for unknown ids.
    pub fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        last_message: Option<String>,
    ) -> bool {
        self.update_status_at(id, status, last_message, Utc::now())
    }

    pub fn update_status_at(
        &self,
        id: &str,
        status: SessionStatus,
        last_message: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        self.modify(id, |session| {
            session.status = status;
            // never move backwards, even if the wall clock does
            session.last_activity = session.last_activity.max(now);
            if let Some(message) = last_message {
                session.last_message = Some(message);
            }
            true
        })
    }

    pub fn set_transcript_path(&self, id: &str, path: impl Into<String>) -> bool {
        let path = path.into();
        self.modify(id, |session| {
            if session.transcript_path.as_deref() == Some(path.as_str()) {
                return false;
            }
            session.transcript_path = Some(path);
            true
        })
    }

    /// Attach, replace, or (with `None`) clear the tracked pull request.
    pub fn set_pr_info(&self, id: &str, pr_info: Option<PullRequestStatus>) -> bool {
        self.modify(id, |session| {
            if session.pr_info == pr_info {
                return false;
            }
            session.pr_info = pr_info;
            true
        })
    }

    /// Write check counters, but only while the session still tracks the PR
    /// head they were fetched for.
    pub fn apply_check_counts(&self, id: &str, head_sha: &str, counts: CheckCounts) -> bool {
        self.modify(id, |session| match session.pr_info.as_mut() {
            Some(pr) if pr.head_sha == head_sha && pr.checks != counts => {
                pr.checks = counts;
                true
            }
            _ => false,
        })
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.read().iter().find(|s| s.id == id).cloned()
    }

    /// Point-in-time copy of every session, oldest first.
    pub fn snapshot(&self) -> Vec<Session> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn idle_count(&self) -> usize {
        self.count_status(SessionStatus::Idle)
    }

    pub fn working_count(&self) -> usize {
        self.count_status(SessionStatus::Working)
    }

    /// Drop sessions inactive for longer than their status allows. Returns
    /// the removed ids.
    pub fn sweep(&self, now: DateTime<Utc>, idle_ttl: Duration, working_ttl: Duration) -> Vec<String> {
        let mut sessions = self.write();
        let mut removed = Vec::new();
        sessions.retain(|session| {
            let stale = session.is_stale(now, idle_ttl, working_ttl);
            if stale {
                removed.push(session.id.clone());
            }
            !stale
        });
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }

    /// Change feed: the value is a revision counter bumped on every effective
    /// mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn count_status(&self, status: SessionStatus) -> usize {
        self.read().iter().filter(|s| s.status == status).count()
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Session) -> bool) -> bool {
        let mut sessions = self.write();
        let Some(session) = sessions.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        let changed = f(session);
        if changed {
            self.bump();
        }
        changed
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
