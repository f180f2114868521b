use crate::integrations::git::{self, GitHead, RepoSlug};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Branches that never get pull-request tracking.
pub const TRUNK_BRANCHES: [&str; 2] = ["main", "master"];

/// One tracked agent run, keyed by its opaque session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub cwd: PathBuf,
    pub status: SessionStatus,
    pub last_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub terminal: TerminalInfo,
    pub transcript_path: Option<String>,
    pub pr_info: Option<PullRequestStatus>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        cwd: impl Into<PathBuf>,
        terminal: TerminalInfo,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            cwd: cwd.into(),
            status: SessionStatus::Working,
            last_message: None,
            start_time: now,
            last_activity: now,
            terminal,
            transcript_path: None,
            pr_info: None,
        }
    }

    /// Current HEAD of the repository at `cwd`, read fresh from disk.
    pub fn git_head(&self) -> Option<GitHead> {
        git::read_head(&self.cwd)
    }

    /// Branch name for display: the branch, or a short SHA when detached.
    pub fn git_branch(&self) -> Option<String> {
        self.git_head().map(|head| head.display_name().to_string())
    }

    /// GitHub owner/name parsed from the `origin` remote.
    pub fn git_repo(&self) -> Option<RepoSlug> {
        git::read_origin_repo(&self.cwd)
    }

    /// Working directory with the home directory replaced by `~`.
    pub fn short_cwd(&self) -> String {
        shorten_home(&self.cwd)
    }

    /// Time since the session started: "2h 5m" or "12m".
    pub fn elapsed_label(&self, now: DateTime<Utc>) -> String {
        let minutes = (now - self.start_time).num_minutes().max(0);
        let hours = minutes / 60;
        if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else {
            format!("{}m", minutes)
        }
    }

    pub fn status_text(&self) -> &'static str {
        self.status.label()
    }

    /// How long the session may stay inactive in its current status.
    pub fn is_stale(
        &self,
        now: DateTime<Utc>,
        idle_ttl: chrono::Duration,
        working_ttl: chrono::Duration,
    ) -> bool {
        let inactive = now - self.last_activity;
        match self.status {
            SessionStatus::Idle => inactive > idle_ttl,
            SessionStatus::Working => inactive > working_ttl,
        }
    }
}

fn shorten_home(path: &Path) -> String {
    let display = path.to_string_lossy().to_string();
    if let Some(home) = dirs::home_dir() {
        if let Some(home_str) = home.to_str() {
            if let Some(stripped) = display.strip_prefix(home_str) {
                if stripped.is_empty() || stripped.starts_with('/') {
                    return format!("~{}", stripped);
                }
            }
        }
    }
    display
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Working,
    Idle,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Working => "Working...",
            Self::Idle => "Waiting for you",
        }
    }
}

/// Terminal details reported at session start, consumed by the terminal launcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub tty: Option<String>,
    pub terminal_pid: Option<String>,
    /// "warp", "iterm2", "terminal", "vscode", "cursor", ...
    pub terminal_app: Option<String>,
}

/// The open pull request tracked for a session's branch, with its CI counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub number: u64,
    pub url: String,
    pub head_sha: String,
    pub checks: CheckCounts,
}

impl PullRequestStatus {
    /// A freshly discovered PR whose checks have not been fetched yet.
    pub fn new(number: u64, url: impl Into<String>, head_sha: impl Into<String>) -> Self {
        Self {
            number,
            url: url.into(),
            head_sha: head_sha.into(),
            checks: CheckCounts::default(),
        }
    }

    pub fn overall_status(&self) -> ChecksStatus {
        self.checks.status()
    }

    pub fn checks_summary(&self) -> String {
        let c = &self.checks;
        match self.overall_status() {
            ChecksStatus::None => "No checks".to_string(),
            ChecksStatus::Running => {
                format!("Checks running... ({}/{})", c.passed(), c.total())
            }
            ChecksStatus::Failed => format!(
                "{} failed ({}/{} passed)",
                c.failed(),
                c.passed(),
                c.total()
            ),
            ChecksStatus::Passed => {
                format!("All checks passed ({}/{})", c.total(), c.total())
            }
        }
    }

    pub fn checks_icon(&self) -> &'static str {
        self.overall_status().icon()
    }
}

/// Check-run counters. `total` is always `passed + failed + pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckCounts {
    total: u32,
    passed: u32,
    failed: u32,
    pending: u32,
}

impl CheckCounts {
    pub fn new(passed: u32, failed: u32, pending: u32) -> Self {
        Self {
            total: passed + failed + pending,
            passed,
            failed,
            pending,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Priority: no checks, then anything pending, then any failure.
    pub fn status(&self) -> ChecksStatus {
        if self.total == 0 {
            ChecksStatus::None
        } else if self.pending > 0 {
            ChecksStatus::Running
        } else if self.failed > 0 {
            ChecksStatus::Failed
        } else {
            ChecksStatus::Passed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksStatus {
    None,
    Running,
    Failed,
    Passed,
}

impl ChecksStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            Self::None => "⚪",
            Self::Running => "🔄",
            Self::Failed => "❌",
            Self::Passed => "✅",
        }
    }
}
