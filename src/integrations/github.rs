//! GitHub REST lookups for a branch's open pull request and its check runs.

use crate::config::GithubConfig;
use crate::data::PullRequestStatus;
use crate::integrations::checks::CheckRun;
use crate::integrations::git::RepoSlug;
use crate::integrations::{build_http_client, github_token};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);
const MIN_BACKOFF: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("GitHub API rate limited, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("GitHub API error: {0}")]
    Status(StatusCode),
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected GitHub response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl GitHubError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GitHubError::RateLimited { .. })
    }
}

/// The remote calls the status poller needs.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// The open PR whose head is `branch`, if any. Counters start zeroed.
    async fn find_open_pull_request(
        &self,
        repo: &RepoSlug,
        branch: &str,
    ) -> Result<Option<PullRequestStatus>, GitHubError>;

    async fn list_check_runs(
        &self,
        repo: &RepoSlug,
        head_sha: &str,
    ) -> Result<Vec<CheckRun>, GitHubError>;

    /// True while a rate limit is in force and calls would be refused.
    fn is_backing_off(&self) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    sha: String,
}

/// `check_runs` is required: a body without it is an error, not "no checks".
#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<CheckRun>,
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    backoff_until: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            backoff_until: Mutex::new(None),
        }
    }

    /// Build a client from config, resolving a token on the way.
    pub async fn from_config(config: &GithubConfig) -> anyhow::Result<Self> {
        let http = build_http_client(Duration::from_secs(config.request_timeout_secs))
            .context("Failed to create HTTP client")?;
        let token = github_token::resolve_token(config).await;
        Ok(Self::new(http, config.api_url.clone(), token))
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn remaining_backoff(&self) -> Option<Duration> {
        let mut until = self
            .backoff_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let deadline = (*until)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            *until = None;
            None
        } else {
            Some(remaining)
        }
    }

    fn start_backoff(&self, wait: Duration) {
        tracing::warn!(wait_secs = wait.as_secs(), "GitHub rate limit hit, pausing requests");
        *self
            .backoff_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + wait);
    }

    async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, GitHubError>
    where
        T: for<'de> Deserialize<'de>,
    {
        if let Some(retry_after) = self.remaining_backoff() {
            return Err(GitHubError::RateLimited { retry_after });
        }

        let mut request = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .query(query)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "herder")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let response = self.check_status(response)?;
        response.json().await.map_err(GitHubError::Decode)
    }

    fn check_status(&self, response: Response) -> Result<Response, GitHubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let wait = backoff_from_rate_limit_headers(response.headers(), unix_now());
            let wait = match wait {
                Some(wait) => Some(wait),
                None if status == StatusCode::TOO_MANY_REQUESTS => Some(DEFAULT_BACKOFF),
                // a 403 with quota left is a permission problem, not a rate limit
                None => None,
            };
            if let Some(wait) = wait {
                self.start_backoff(wait);
                return Err(GitHubError::RateLimited { retry_after: wait });
            }
        }

        Err(GitHubError::Status(status))
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    async fn find_open_pull_request(
        &self,
        repo: &RepoSlug,
        branch: &str,
    ) -> Result<Option<PullRequestStatus>, GitHubError> {
        let head = format!("{}:{}", repo.owner, branch);
        let path = format!("/repos/{}/{}/pulls", repo.owner, repo.name);
        let pulls: Vec<PullResponse> = self
            .get(
                &path,
                &[("head", head.as_str()), ("state", "open"), ("per_page", "1")],
            )
            .await?;

        Ok(pulls
            .into_iter()
            .next()
            .map(|pr| PullRequestStatus::new(pr.number, pr.html_url, pr.head.sha)))
    }

    async fn list_check_runs(
        &self,
        repo: &RepoSlug,
        head_sha: &str,
    ) -> Result<Vec<CheckRun>, GitHubError> {
        let path = format!(
            "/repos/{}/{}/commits/{}/check-runs",
            repo.owner, repo.name, head_sha
        );
        let body: CheckRunsResponse = self.get(&path, &[("per_page", "100")]).await?;
        Ok(body.check_runs)
    }

    fn is_backing_off(&self) -> bool {
        self.remaining_backoff().is_some()
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// How long to wait when the quota is exhausted, or None if it is not.
fn backoff_from_rate_limit_headers(headers: &HeaderMap, now_epoch: u64) -> Option<Duration> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    };

    if header_u64("x-ratelimit-remaining") != Some(0) {
        return header_u64("retry-after")
            .map(|secs| Duration::from_secs(secs).clamp(MIN_BACKOFF, MAX_BACKOFF));
    }

    let Some(reset_epoch) = header_u64("x-ratelimit-reset") else {
        return Some(DEFAULT_BACKOFF);
    };

    let wait = Duration::from_secs(reset_epoch.saturating_sub(now_epoch));
    Some(wait.clamp(MIN_BACKOFF, MAX_BACKOFF))
}
