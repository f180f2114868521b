//! GitHub client tests against a local fake API server.

mod test_utils;

use herder::data::CheckCounts;
use herder::integrations::build_http_client;
use herder::integrations::checks::aggregate;
use herder::integrations::git::RepoSlug;
use herder::integrations::github::{GitHubClient, GitHubError, PullRequestApi};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use test_utils::{unix_now, FakeGitHub, Reply};

fn client(server: &FakeGitHub, token: Option<&str>) -> GitHubClient {
    let http = build_http_client(Duration::from_secs(5)).unwrap();
    GitHubClient::new(http, server.url.clone(), token.map(str::to_string))
}

fn repo() -> RepoSlug {
    RepoSlug::new("octo", "widgets")
}

fn open_pull(number: u64, sha: &str) -> serde_json::Value {
    json!([{
        "number": number,
        "state": "open",
        "html_url": format!("https://github.com/octo/widgets/pull/{number}"),
        "title": "Add widgets",
        "head": { "ref": "feat/widgets", "sha": sha },
    }])
}

mod pull_requests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_finds_open_pull_request() {
        let server = FakeGitHub::start(|_| Reply::json(200, open_pull(42, "abc123"))).await;
        let github = client(&server, Some("secret"));

        let pr = github
            .find_open_pull_request(&repo(), "feat/widgets")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.url, "https://github.com/octo/widgets/pull/42");
        assert_eq!(pr.head_sha, "abc123");
        assert_eq!(pr.checks, CheckCounts::default());

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.target.starts_with("/repos/octo/widgets/pulls?"));
        assert!(request.target.contains("head=octo%3Afeat%2Fwidgets"));
        assert!(request.target.contains("state=open"));
        assert!(request.target.contains("per_page=1"));
        assert_eq!(request.header("accept"), Some("application/vnd.github+json"));
        assert_eq!(request.header("authorization"), Some("Bearer secret"));
        assert_eq!(request.header("user-agent"), Some("herder"));
    }

    #[tokio::test]
    async fn test_no_open_pull_request() {
        let server = FakeGitHub::start(|_| Reply::json(200, json!([]))).await;
        let github = client(&server, None);

        let pr = github.find_open_pull_request(&repo(), "feat").await.unwrap();
        assert_eq!(pr, None);
        assert_eq!(server.requests()[0].header("authorization"), None);
    }

    #[tokio::test]
    async fn test_server_error_is_status_error() {
        let server =
            FakeGitHub::start(|_| Reply::json(404, json!({"message": "Not Found"}))).await;
        let github = client(&server, None);

        let err = github
            .find_open_pull_request(&repo(), "feat")
            .await
            .unwrap_err();
        assert!(matches!(err, GitHubError::Status(s) if s.as_u16() == 404));
        assert!(!github.is_backing_off());
    }

    #[tokio::test]
    async fn test_unexpected_body_is_decode_error() {
        let server = FakeGitHub::start(|_| Reply::json(200, json!({"oops": true}))).await;
        let github = client(&server, None);

        let err = github
            .find_open_pull_request(&repo(), "feat")
            .await
            .unwrap_err();
        assert!(matches!(err, GitHubError::Decode(_)));
    }
}

mod check_runs {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_lists_check_runs_for_commit() {
        let server = FakeGitHub::start(|_| {
            Reply::json(
                200,
                json!({
                    "total_count": 4,
                    "check_runs": [
                        {"id": 1, "name": "build", "status": "completed", "conclusion": "success"},
                        {"id": 2, "name": "lint", "status": "completed", "conclusion": "skipped"},
                        {"id": 3, "name": "test", "status": "completed", "conclusion": "failure"},
                        {"id": 4, "name": "deploy", "status": "queued", "conclusion": null},
                    ]
                }),
            )
        })
        .await;
        let github = client(&server, None);

        let runs = github.list_check_runs(&repo(), "abc123").await.unwrap();
        assert_eq!(runs.len(), 4);
        assert_eq!(aggregate(&runs), CheckCounts::new(2, 1, 1));
        assert!(server.requests()[0]
            .target
            .starts_with("/repos/octo/widgets/commits/abc123/check-runs"));
    }

    #[tokio::test]
    async fn test_empty_check_runs_list() {
        let server = FakeGitHub::start(|_| {
            Reply::json(200, json!({"total_count": 0, "check_runs": []}))
        })
        .await;
        let github = client(&server, None);

        let runs = github.list_check_runs(&repo(), "abc123").await.unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_body_without_check_runs_is_decode_error() {
        let server =
            FakeGitHub::start(|_| Reply::json(200, json!({"message": "Server Error"}))).await;
        let github = client(&server, None);

        let err = github.list_check_runs(&repo(), "abc123").await.unwrap_err();
        assert!(matches!(err, GitHubError::Decode(_)));
        assert!(!github.is_backing_off());
    }
}

mod rate_limits {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_exhausted_quota_starts_backoff() {
        let reset = unix_now() + 120;
        let server = FakeGitHub::start(move |_| {
            Reply::json(403, json!({"message": "API rate limit exceeded"}))
                .with_header("x-ratelimit-remaining", 0)
                .with_header("x-ratelimit-reset", reset)
        })
        .await;
        let github = client(&server, None);

        let err = github
            .find_open_pull_request(&repo(), "feat")
            .await
            .unwrap_err();
        match err {
            GitHubError::RateLimited { retry_after } => {
                assert!(retry_after > Duration::from_secs(100));
                assert!(retry_after <= Duration::from_secs(120));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(github.is_backing_off());

        // later calls are refused locally
        let err = github.list_check_runs(&repo(), "abc").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_too_many_requests_backs_off_without_headers() {
        let server = FakeGitHub::start(|_| Reply::json(429, json!({}))).await;
        let github = client(&server, None);

        let err = github.list_check_runs(&repo(), "abc").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(github.is_backing_off());
    }

    #[tokio::test]
    async fn test_forbidden_with_quota_left_is_not_a_rate_limit() {
        let server = FakeGitHub::start(|_| {
            Reply::json(403, json!({"message": "Resource not accessible"}))
                .with_header("x-ratelimit-remaining", 4999)
        })
        .await;
        let github = client(&server, Some("token"));

        let err = github
            .find_open_pull_request(&repo(), "feat")
            .await
            .unwrap_err();
        assert!(matches!(err, GitHubError::Status(s) if s.as_u16() == 403));
        assert!(!github.is_backing_off());
    }
}
