//! GitHub token discovery.
//!
//! Sources are tried in order and the first hit wins: an environment
//! variable, `gh auth token` from the first installed gh binary, then the
//! github.com `oauth_token` in the gh CLI hosts file. Finding nothing is fine;
//! public repositories work unauthenticated.

use crate::config::GithubConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

const GH_TIMEOUT: Duration = Duration::from_secs(5);
const GITHUB_HOST: &str = "github.com";

/// One host block of gh's `hosts.yml`.
#[derive(Debug, Deserialize)]
struct HostEntry {
    #[serde(default)]
    oauth_token: Option<String>,
}

pub async fn resolve_token(config: &GithubConfig) -> Option<String> {
    let env_value = std::env::var(&config.token_env).ok();
    resolve_token_with(env_value, &config.gh_paths, config.hosts_file().as_deref()).await
}

pub async fn resolve_token_with(
    env_value: Option<String>,
    gh_paths: &[PathBuf],
    hosts_file: Option<&Path>,
) -> Option<String> {
    if let Some(token) = env_value.as_deref().and_then(non_empty) {
        tracing::debug!("Using GitHub token from environment");
        return Some(token);
    }

    for gh in gh_paths {
        if let Some(token) = token_from_gh(gh).await {
            tracing::debug!(gh = %gh.display(), "Using GitHub token from gh CLI");
            return Some(token);
        }
    }

    if let Some(token) = hosts_file.and_then(token_from_hosts_file) {
        tracing::debug!("Using GitHub token from gh hosts file");
        return Some(token);
    }

    tracing::debug!("No GitHub token found, requests will be unauthenticated");
    None
}

async fn token_from_gh(gh: &Path) -> Option<String> {
    if !gh.is_file() {
        return None;
    }

    let output = tokio::time::timeout(
        GH_TIMEOUT,
        Command::new(gh).args(["auth", "token"]).kill_on_drop(true).output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }
    non_empty(&String::from_utf8_lossy(&output.stdout))
}

fn token_from_hosts_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    parse_hosts_token(&content)
}

/// The github.com `oauth_token` of a gh `hosts.yml`. Tokens for other
/// hosts are never sent to api.github.com.
pub fn parse_hosts_token(content: &str) -> Option<String> {
    let mut hosts: BTreeMap<String, HostEntry> = match serde_yaml::from_str(content) {
        Ok(hosts) => hosts,
        Err(e) => {
            tracing::debug!(error = %e, "Unreadable gh hosts file");
            return None;
        }
    };
    hosts
        .remove(GITHUB_HOST)?
        .oauth_token
        .as_deref()
        .and_then(non_empty)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
