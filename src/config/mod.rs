use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sessions::SweepPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
}

pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/herder.sock")
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_working_ttl")]
    pub working_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_idle_ttl() -> u64 {
    30 * 60
}

fn default_working_ttl() -> u64 {
    4 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl(),
            working_ttl_secs: default_working_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl SessionsConfig {
    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            working_ttl: Duration::from_secs(self.working_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Sessions resolved in parallel within one tick.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_initial_delay() -> u64 {
    2
}

fn default_poll_interval() -> u64 {
    20
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            interval_secs: default_poll_interval(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Environment variable checked first for a token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// `gh` executables tried, in order, for `gh auth token`.
    #[serde(default = "default_gh_paths")]
    pub gh_paths: Vec<PathBuf>,
    /// gh CLI hosts file; defaults to `~/.config/gh/hosts.yml`.
    #[serde(default)]
    pub hosts_file: Option<PathBuf>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_gh_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/bin/gh"),
        PathBuf::from("/opt/homebrew/bin/gh"),
        PathBuf::from("/usr/bin/gh"),
    ]
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
            token_env: default_token_env(),
            gh_paths: default_gh_paths(),
            hosts_file: None,
        }
    }
}

impl GithubConfig {
    pub fn hosts_file(&self) -> Option<PathBuf> {
        self.hosts_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config/gh/hosts.yml")))
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = directories::ProjectDirs::from("", "", "herder")
        .context("Could not determine config directory")?
        .config_dir()
        .to_path_buf();
    Ok(dir)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration.
///
/// An explicitly given path must exist. Without one, the default location is
/// read if present and built-in defaults are used otherwise.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found at {}", p.display());
            }
            p.to_path_buf()
        }
        None => match default_config_path() {
            Ok(p) if p.exists() => p,
            _ => return Ok(Config::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    parse(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
}

pub fn parse(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}
