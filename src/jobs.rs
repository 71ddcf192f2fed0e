//! Queue job types and processing
//!
//! Jobs arrive on the Redis queue as tagged JSON. `grade` is the
//! server-authoritative path; `verify` additionally carries a verdict the
//! client computed for itself, which must survive revalidation before
//! anything persists.
//!
//! A processing `Err` means the platform failed and the job is worth
//! retrying. Everything the submitter caused (oversized payload, unknown
//! challenge, rejected claim, failing tests) comes back as a result.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GraderError;
use crate::model::{AttemptStatus, LogLine, ProgressRecord, Submission, TestOutcome};
use crate::revalidator::ReportedVerdict;
use crate::service::{Graded, SubmissionService};

/// Worker job enum - represents the job types the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Grade a submission server-side
    #[serde(rename = "grade")]
    Grade(SubmissionJob),
    /// Revalidate a client-graded submission
    #[serde(rename = "verify")]
    Verify(VerifyJob),
}

impl WorkerJob {
    /// Submission this job concerns, for result keying.
    pub fn submission_id(&self) -> i64 {
        match self {
            WorkerJob::Grade(job) => job.submission_id,
            WorkerJob::Verify(job) => job.submission.submission_id,
        }
    }
}

/// Job received from the Redis queue
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub submission_id: i64,
    pub user_id: String,
    pub challenge_id: String,
    pub content_version: u32,
    pub markup: String,
    /// Markup-only lessons submit no style or script.
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub script: String,
}

impl SubmissionJob {
    pub fn submission(&self) -> Submission {
        Submission::new(
            self.user_id.clone(),
            self.challenge_id.clone(),
            self.markup.clone(),
            self.style.clone(),
            self.script.clone(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyJob {
    #[serde(flatten)]
    pub submission: SubmissionJob,
    pub claimed: ClaimedVerdict,
}

/// Verdict the client computed for its own run.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimedVerdict {
    pub status: AttemptStatus,
    pub score: f64,
    #[serde(default)]
    pub outcomes: Vec<ClaimedOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimedOutcome {
    pub passed: bool,
}

impl From<&ClaimedVerdict> for ReportedVerdict {
    fn from(claimed: &ClaimedVerdict) -> Self {
        ReportedVerdict {
            status: claimed.status,
            score: claimed.score,
            passes: claimed.outcomes.iter().map(|o| o.passed).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Graded and stored, progress updated.
    Persisted,
    /// Claimed verdict failed revalidation; nothing stored.
    Rejected,
    /// The submission could not be graded (bad payload, unknown challenge).
    Failed,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::Persisted => "persisted",
            Disposition::Rejected => "rejected",
            Disposition::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Result of processing one job, pushed back for the platform tier
#[derive(Debug, Serialize, Deserialize)]
pub struct GradeResult {
    pub submission_id: i64,
    /// "persisted", "rejected", or "failed"
    pub disposition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttemptStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<TestOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_logs: Vec<LogLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GradeResult {
    pub fn persisted(submission_id: i64, graded: Graded) -> Self {
        let Graded { attempt, progress } = graded;
        Self {
            submission_id,
            disposition: Disposition::Persisted.to_string(),
            status: Some(attempt.status),
            score: Some(attempt.score),
            outcomes: attempt.outcomes,
            runtime_logs: attempt.runtime_logs,
            execution_time_ms: Some(attempt.execution_time_ms),
            progress: Some(progress),
            error_message: None,
        }
    }

    /// The rejection message stays generic on purpose; detail lives in
    /// the audit trail.
    pub fn rejected(submission_id: i64) -> Self {
        Self {
            submission_id,
            disposition: Disposition::Rejected.to_string(),
            status: None,
            score: None,
            outcomes: vec![],
            runtime_logs: vec![],
            execution_time_ms: None,
            progress: None,
            error_message: Some(GraderError::ValidationMismatch.to_string()),
        }
    }

    pub fn failed(submission_id: i64, message: impl Into<String>) -> Self {
        Self {
            submission_id,
            disposition: Disposition::Failed.to_string(),
            status: None,
            score: None,
            outcomes: vec![],
            runtime_logs: vec![],
            execution_time_ms: None,
            progress: None,
            error_message: Some(message.into()),
        }
    }
}

/// Process one queue job
pub async fn process_job(service: &SubmissionService, job: &WorkerJob) -> Result<GradeResult> {
    match job {
        WorkerJob::Grade(job) => process_grade_job(service, job).await,
        WorkerJob::Verify(job) => process_verify_job(service, job).await,
    }
}

pub async fn process_grade_job(
    service: &SubmissionService,
    job: &SubmissionJob,
) -> Result<GradeResult> {
    info!(
        "Grading submission {} for {}/{} v{}",
        job.submission_id, job.user_id, job.challenge_id, job.content_version
    );
    match service.grade(job.submission(), job.content_version).await {
        Ok(graded) => Ok(GradeResult::persisted(job.submission_id, graded)),
        Err(e) if e.is_infrastructure() => Err(e.into()),
        Err(e) => Ok(GradeResult::failed(job.submission_id, e.to_string())),
    }
}

pub async fn process_verify_job(
    service: &SubmissionService,
    job: &VerifyJob,
) -> Result<GradeResult> {
    let submission_id = job.submission.submission_id;
    info!(
        "Verifying claimed {} (score {:.2}) on submission {} for {}/{} v{}",
        job.claimed.status,
        job.claimed.score,
        submission_id,
        job.submission.user_id,
        job.submission.challenge_id,
        job.submission.content_version
    );
    let claimed = ReportedVerdict::from(&job.claimed);
    match service
        .verify(
            job.submission.submission(),
            job.submission.content_version,
            claimed,
        )
        .await
    {
        Ok(graded) => Ok(GradeResult::persisted(submission_id, graded)),
        Err(GraderError::ValidationMismatch) => Ok(GradeResult::rejected(submission_id)),
        Err(e) if e.is_infrastructure() => Err(e.into()),
        Err(e) => Ok(GradeResult::failed(submission_id, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grade_job_wire_shape() {
        let raw = json!({
            "job_type": "grade",
            "submission_id": 41,
            "user_id": "u1",
            "challenge_id": "intro-heading",
            "content_version": 2,
            "markup": "<h1>hi</h1>"
        });
        let job: WorkerJob = serde_json::from_value(raw).unwrap();
        match job {
            WorkerJob::Grade(job) => {
                assert_eq!(job.submission_id, 41);
                assert_eq!(job.style, "");
                assert_eq!(job.script, "");
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_verify_job_wire_shape() {
        let raw = json!({
            "job_type": "verify",
            "submission_id": 42,
            "user_id": "u1",
            "challenge_id": "intro-heading",
            "content_version": 2,
            "markup": "<h1>hi</h1>",
            "style": "",
            "script": "",
            "claimed": {
                "status": "pass",
                "score": 100.0,
                "outcomes": [{"passed": true}, {"passed": true}]
            }
        });
        let job: WorkerJob = serde_json::from_value(raw).unwrap();
        match job {
            WorkerJob::Verify(job) => {
                assert_eq!(job.submission.submission_id, 42);
                assert_eq!(job.claimed.status, AttemptStatus::Pass);
                let reported = ReportedVerdict::from(&job.claimed);
                assert_eq!(reported.passes, vec![true, true]);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_rejected_result_is_generic() {
        let result = GradeResult::rejected(7);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["disposition"], "rejected");
        assert_eq!(value["error_message"], "submission failed validation");
        assert!(value.get("score").is_none());
        assert!(value.get("outcomes").is_none());
    }

    #[test]
    fn test_failed_result_carries_message() {
        let result = GradeResult::failed(9, "no test battery for challenge x v1");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["disposition"], "failed");
        assert!(value["error_message"]
            .as_str()
            .unwrap()
            .contains("no test battery"));
    }
}
