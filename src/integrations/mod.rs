pub mod checks;
pub mod claude;
pub mod git;
pub mod github;
pub mod github_token;

use std::time::Duration;

/// HTTP client shared by all GitHub requests so connections are pooled.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .pool_max_idle_per_host(5)
        .build()
}
