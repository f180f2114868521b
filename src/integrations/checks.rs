//! Check-run aggregation.

use crate::data::CheckCounts;
use serde::Deserialize;

/// A single CI job result for a commit, as returned by the check-runs endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckRun {
    #[serde(default)]
    pub name: Option<String>,
    /// "queued", "in_progress", "completed", ...
    #[serde(default)]
    pub status: String,
    /// Only set once `status` is "completed".
    #[serde(default)]
    pub conclusion: Option<String>,
}

impl CheckRun {
    pub fn new(status: &str, conclusion: Option<&str>) -> Self {
        Self {
            name: None,
            status: status.to_string(),
            conclusion: conclusion.map(str::to_string),
        }
    }
}

/// Conclusions that count as a pass.
const PASSING_CONCLUSIONS: [&str; 3] = ["success", "skipped", "neutral"];

/// Fold check runs into counters.
///
/// Completed runs pass on success/skipped/neutral and fail on anything else
/// (including a missing conclusion); runs not yet completed are pending.
pub fn aggregate(runs: &[CheckRun]) -> CheckCounts {
    let mut passed = 0;
    let mut failed = 0;
    let mut pending = 0;

    for run in runs {
        if run.status == "completed" {
            let conclusion = run.conclusion.as_deref().unwrap_or("");
            if PASSING_CONCLUSIONS.contains(&conclusion) {
                passed += 1;
            } else {
                failed += 1;
            }
        } else {
            pending += 1;
        }
    }

    CheckCounts::new(passed, failed, pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ChecksStatus;

    #[test]
    fn test_aggregate_empty() {
        let counts = aggregate(&[]);
        assert_eq!(counts, CheckCounts::new(0, 0, 0));
        assert_eq!(counts.status(), ChecksStatus::None);
    }

    #[test]
    fn test_passing_conclusions() {
        let runs = vec![
            CheckRun::new("completed", Some("success")),
            CheckRun::new("completed", Some("skipped")),
            CheckRun::new("completed", Some("neutral")),
        ];
        assert_eq!(aggregate(&runs), CheckCounts::new(3, 0, 0));
    }

    #[test]
    fn test_failing_conclusions() {
        let runs = vec![
            CheckRun::new("completed", Some("failure")),
            CheckRun::new("completed", Some("cancelled")),
            CheckRun::new("completed", Some("timed_out")),
            CheckRun::new("completed", Some("action_required")),
            CheckRun::new("completed", None),
        ];
        assert_eq!(aggregate(&runs), CheckCounts::new(0, 5, 0));
    }

    #[test]
    fn test_incomplete_runs_are_pending() {
        let runs = vec![
            CheckRun::new("queued", None),
            CheckRun::new("in_progress", None),
            // a conclusion without completion still counts as pending
            CheckRun::new("in_progress", Some("success")),
        ];
        assert_eq!(aggregate(&runs), CheckCounts::new(0, 0, 3));
    }

    #[test]
    fn test_mixed_runs_total_is_input_length() {
        let runs = vec![
            CheckRun::new("completed", Some("success")),
            CheckRun::new("completed", Some("failure")),
            CheckRun::new("queued", None),
            CheckRun::new("completed", Some("success")),
        ];
        let counts = aggregate(&runs);
        assert_eq!(counts.total(), runs.len() as u32);
        assert_eq!(counts, CheckCounts::new(2, 1, 1));
        assert_eq!(counts.status(), ChecksStatus::Running);
    }

    #[test]
    fn test_deserialize_check_run() {
        let json = r#"{"id": 1, "name": "build", "status": "completed", "conclusion": null}"#;
        let run: CheckRun = serde_json::from_str(json).unwrap();
        assert_eq!(run.name.as_deref(), Some("build"));
        assert_eq!(run.status, "completed");
        assert_eq!(run.conclusion, None);
    }
}
