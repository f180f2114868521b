//! Keeps each session's pull request and CI status in sync with GitHub.
//!
//! Every tick the poller reads the store, works out which sessions sit on a
//! GitHub feature branch, and for each one either refreshes the check runs
//! of the PR it already knows about or looks the PR up again when the branch
//! moved. Sessions are handled concurrently; the calls for one session are
//! sequenced.

use crate::data::Session;
use crate::integrations::checks;
use crate::integrations::git::RepoSlug;
use crate::integrations::github::PullRequestApi;
use crate::sessions::SessionStore;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub eligible: usize,
    pub pr_lookups: usize,
    pub check_refreshes: usize,
    pub cleared: usize,
    /// True when remote calls were skipped because of a rate limit.
    pub backed_off: bool,
}

#[derive(Debug)]
enum Action {
    /// Branch unchanged and a PR is attached: only re-read its checks.
    RefreshChecks {
        id: String,
        repo: RepoSlug,
        head_sha: String,
    },
    LookupPullRequest {
        id: String,
        repo: RepoSlug,
        branch: String,
    },
}

/// Result of one action that the tick has to fold back into its own state.
enum Outcome {
    Done,
    /// Lookup was rate limited; forget the branch so the next tick retries.
    Retry(String),
}

pub struct StatusPoller {
    store: Arc<SessionStore>,
    api: Arc<dyn PullRequestApi>,
    max_concurrent: usize,
    /// Branch each session had at its last PR lookup.
    last_checked_branch: HashMap<String, String>,
}

impl StatusPoller {
    pub fn new(store: Arc<SessionStore>, api: Arc<dyn PullRequestApi>) -> Self {
        Self {
            store,
            api,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            last_checked_branch: HashMap::new(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn last_checked_branch(&self, id: &str) -> Option<&str> {
        self.last_checked_branch.get(id).map(String::as_str)
    }

    /// Run one reconciliation pass over the current sessions.
    ///
    /// While a rate limit is in force no remote calls are made, but a session
    /// whose branch moved still loses the PR of its old branch.
    pub async fn poll_once(&mut self) -> TickSummary {
        let mut summary = TickSummary::default();
        let backing_off = self.api.is_backing_off();

        let sessions = self.store.snapshot();
        let live: HashSet<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        self.last_checked_branch
            .retain(|id, _| live.contains(id.as_str()));

        let mut actions = Vec::new();
        for session in &sessions {
            match self.plan(session) {
                Some(action) => actions.push(action),
                None => {
                    self.last_checked_branch.remove(&session.id);
                    // no longer on a feature branch
                    if session.pr_info.is_some() && self.store.set_pr_info(&session.id, None) {
                        summary.cleared += 1;
                    }
                }
            }
        }

        summary.eligible = actions.len();

        if backing_off {
            tracing::debug!("GitHub rate limit in force, skipping remote calls");
            summary.backed_off = true;
            for action in &actions {
                if let Action::LookupPullRequest { id, .. } = action {
                    if self.store.set_pr_info(id, None) {
                        summary.cleared += 1;
                    }
                }
            }
            return summary;
        }

        for action in &actions {
            match action {
                Action::RefreshChecks { .. } => summary.check_refreshes += 1,
                Action::LookupPullRequest { id, branch, .. } => {
                    summary.pr_lookups += 1;
                    self.last_checked_branch.insert(id.clone(), branch.clone());
                }
            }
        }

        let store = &*self.store;
        let api = &*self.api;
        let outcomes: Vec<Outcome> = stream::iter(actions)
            .map(|action| execute(store, api, action))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for outcome in outcomes {
            if let Outcome::Retry(id) = outcome {
                self.last_checked_branch.remove(&id);
            }
        }

        summary
    }

    /// Decide what a session needs this tick. None means the session is not
    /// eligible.
    fn plan(&self, session: &Session) -> Option<Action> {
        let head = session.git_head()?;
        let branch = head.pr_branch()?.to_string();
        let repo = session.git_repo()?;

        let unchanged = self.last_checked_branch.get(&session.id) == Some(&branch);
        if unchanged {
            if let Some(pr) = &session.pr_info {
                return Some(Action::RefreshChecks {
                    id: session.id.clone(),
                    repo,
                    head_sha: pr.head_sha.clone(),
                });
            }
        }

        Some(Action::LookupPullRequest {
            id: session.id.clone(),
            repo,
            branch,
        })
    }

    /// Poll after `initial_delay`, then every `interval`, until `shutdown`
    /// flips to true. A tick already running is allowed to finish.
    pub fn spawn(
        mut self,
        initial_delay: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = interval.max(Duration::from_secs(1));
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + initial_delay, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let summary = self.poll_once().await;
                        tracing::debug!(
                            eligible = summary.eligible,
                            lookups = summary.pr_lookups,
                            refreshes = summary.check_refreshes,
                            cleared = summary.cleared,
                            backed_off = summary.backed_off,
                            "Status poll finished"
                        );
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Status poller stopped");
        })
    }
}

async fn execute(store: &SessionStore, api: &dyn PullRequestApi, action: Action) -> Outcome {
    match action {
        Action::RefreshChecks { id, repo, head_sha } => {
            refresh_checks(store, api, &id, &repo, &head_sha).await;
            Outcome::Done
        }
        Action::LookupPullRequest { id, repo, branch } => {
            match api.find_open_pull_request(&repo, &branch).await {
                Ok(Some(pr)) => {
                    let head_sha = pr.head_sha.clone();
                    tracing::debug!(session_id = %id, repo = %repo, branch = %branch, number = pr.number, "Found open PR");
                    store.set_pr_info(&id, Some(pr));
                    refresh_checks(store, api, &id, &repo, &head_sha).await;
                    Outcome::Done
                }
                Ok(None) => {
                    store.set_pr_info(&id, None);
                    Outcome::Done
                }
                Err(err) => {
                    // a failed lookup leaves no PR known for the current branch
                    store.set_pr_info(&id, None);
                    if err.is_rate_limited() {
                        tracing::debug!(session_id = %id, error = %err, "PR lookup deferred");
                        Outcome::Retry(id)
                    } else {
                        tracing::warn!(session_id = %id, repo = %repo, branch = %branch, error = %err, "PR lookup failed");
                        Outcome::Done
                    }
                }
            }
        }
    }
}

async fn refresh_checks(
    store: &SessionStore,
    api: &dyn PullRequestApi,
    id: &str,
    repo: &RepoSlug,
    head_sha: &str,
) {
    match api.list_check_runs(repo, head_sha).await {
        Ok(runs) => {
            let counts = checks::aggregate(&runs);
            if !store.apply_check_counts(id, head_sha, counts) {
                tracing::debug!(session_id = %id, head_sha, "Check counts no longer apply");
            }
        }
        Err(err) => {
            tracing::debug!(session_id = %id, head_sha, error = %err, "Check run fetch failed");
        }
    }
}
