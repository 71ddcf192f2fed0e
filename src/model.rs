//! Core data model for grading
//!
//! Shared types that flow through the whole pipeline: submissions, test
//! batteries, attempt records and per-user progress. Wire-level protocol
//! types live in `protocol`, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A learner's solution to one challenge: three independent source channels.
///
/// Payloads are opaque text as far as the host is concerned; only the
/// sandbox interprets them. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: String,
    pub challenge_id: String,
    pub markup: String,
    pub style: String,
    pub script: String,
}

impl Submission {
    pub fn new(
        user_id: impl Into<String>,
        challenge_id: impl Into<String>,
        markup: impl Into<String>,
        style: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            challenge_id: challenge_id.into(),
            markup: markup.into(),
            style: style.into(),
            script: script.into(),
        }
    }
}

/// One assertion in a test battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Assertion source evaluated inside the sandbox; truthy means pass.
    pub assertion: String,
    /// Scoring weight. Missing or non-positive values count as 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, assertion: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assertion: assertion.into(),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Effective scoring weight (defaults to 1.0, non-positive ignored).
    pub fn effective_weight(&self) -> f64 {
        match self.weight {
            Some(w) if w > 0.0 => w,
            _ => 1.0,
        }
    }
}

/// The ordered set of test cases for one challenge version.
///
/// Authored server-side and pinned to a content version so that grading
/// and revalidation always run the same assertions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestBattery {
    pub challenge_id: String,
    pub content_version: u32,
    pub tests: Vec<TestCase>,
}

impl TestBattery {
    pub fn new(challenge_id: impl Into<String>, content_version: u32, tests: Vec<TestCase>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            content_version,
            tests,
        }
    }
}

/// Result of evaluating a single test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub message: String,
    /// Rendering of the assertion's value when it evaluated to a falsy
    /// result. Absent for passes and for faulted assertions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_value: Option<String>,
}

impl TestOutcome {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: "passed".to_string(),
            captured_value: None,
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            captured_value: None,
        }
    }

    pub fn with_captured_value(mut self, value: impl Into<String>) -> Self {
        self.captured_value = Some(value.into());
        self
    }
}

/// Terminal status of a graded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptStatus::Pass => "pass",
            AttemptStatus::Fail => "fail",
            AttemptStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// How a sandbox run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every test produced a result before the deadline.
    Completed,
    /// The wall-clock budget elapsed first.
    Timeout,
    /// The sandbox died or faulted before the battery finished.
    Fault,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::Completed => "completed",
            Termination::Timeout => "timeout",
            Termination::Fault => "fault",
        };
        write!(f, "{}", s)
    }
}

/// Severity of a line captured from the sandboxed script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
}

/// One log line captured from the sandbox, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
}

/// One fully graded run of a submission. Append-only once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub submission: Submission,
    pub outcomes: Vec<TestOutcome>,
    pub status: AttemptStatus,
    /// Weighted pass percentage in [0, 100], rounded to two decimals.
    pub score: f64,
    pub runtime_logs: Vec<LogLine>,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    /// Per-test pass flags in battery order.
    pub fn pass_flags(&self) -> Vec<bool> {
        self.outcomes.iter().map(|o| o.passed).collect()
    }
}

/// Per-user, per-challenge progress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// No stored record for the pair. Records written by the worker start
    /// at `InProgress`, so this value never lands in the store.
    NotStarted,
    InProgress,
    Completed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// Reconciled progress for one (user, challenge) pair.
///
/// `best_score` only ever rises, `completed_at` is set once and kept, and
/// `status` never moves backwards from `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub challenge_id: String,
    pub status: ProgressStatus,
    pub best_score: f64,
    pub total_attempts: u32,
    pub first_attempted_at: DateTime<Utc>,
    pub last_attempted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_weight_defaults_to_one() {
        let tc = TestCase::new("t", "true");
        assert_eq!(tc.effective_weight(), 1.0);
        assert_eq!(tc.with_weight(0.0).effective_weight(), 1.0);
        assert_eq!(TestCase::new("t", "true").with_weight(-3.0).effective_weight(), 1.0);
        assert_eq!(TestCase::new("t", "true").with_weight(2.5).effective_weight(), 2.5);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AttemptStatus::Pass).unwrap(), "\"pass\"");
        assert_eq!(serde_json::to_string(&Termination::Timeout).unwrap(), "\"timeout\"");
        assert_eq!(
            serde_json::to_string(&ProgressStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_outcome_skips_absent_captured_value() {
        let json = serde_json::to_value(TestOutcome::passed("t")).unwrap();
        assert!(json.get("captured_value").is_none());

        let json =
            serde_json::to_value(TestOutcome::failed("t", "nope").with_captured_value("0")).unwrap();
        assert_eq!(json["captured_value"], "0");
    }

    #[test]
    fn test_pass_flags_order() {
        let attempt = Attempt {
            submission: Submission::new("u", "c", "", "", ""),
            outcomes: vec![
                TestOutcome::passed("a"),
                TestOutcome::failed("b", "assertion failed"),
                TestOutcome::passed("c"),
            ],
            status: AttemptStatus::Fail,
            score: 66.67,
            runtime_logs: vec![],
            execution_time_ms: 12,
            created_at: Utc::now(),
        };
        assert_eq!(attempt.pass_flags(), vec![true, false, true]);
    }
}
