//! Revalidation service
//!
//! Client-side grading is untrusted by design: before anything persists,
//! the submission is re-run in a fresh sandbox with identical bounds and
//! the claimed verdict is compared with the server's own result. The
//! server's attempt is the only one that ever persists; a rejected claim
//! persists nothing.
//!
//! Rejection detail stays server-side (logs and the rejection audit).
//! Callers only ever see the generic `ValidationMismatch`.

use std::fmt;

use chrono::Utc;
use tracing::warn;

use crate::error::GraderError;
use crate::executor::{ExecutionReport, SandboxExecutor};
use crate::model::{Attempt, AttemptStatus, Submission, TestBattery};
use crate::scorer;

/// Claimed and computed scores may differ by float noise across runs;
/// anything beyond this is a mismatch.
pub const SCORE_TOLERANCE: f64 = 0.01;

/// What a client-tier run claims about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedVerdict {
    pub status: AttemptStatus,
    pub score: f64,
    /// Per-test pass flags, in battery order.
    pub passes: Vec<bool>,
}

impl From<&Attempt> for ReportedVerdict {
    fn from(attempt: &Attempt) -> Self {
        Self {
            status: attempt.status,
            score: attempt.score,
            passes: attempt.pass_flags(),
        }
    }
}

/// First disagreement found between claim and re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    Status,
    Score,
    OutcomeCount,
    TestFlipped { index: usize },
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchKind::Status => write!(f, "status"),
            MismatchKind::Score => write!(f, "score"),
            MismatchKind::OutcomeCount => write!(f, "outcome count"),
            MismatchKind::TestFlipped { index } => write!(f, "test {} flipped", index),
        }
    }
}

/// Result of revalidating one claimed verdict.
#[derive(Debug)]
pub enum Revalidation {
    /// Claim agreed with the re-run. The server-graded attempt is what
    /// persists, not the claim.
    Accepted(Attempt),
    /// Claim disagreed. Nothing persists; `computed` feeds the audit.
    Rejected {
        computed: Attempt,
        mismatch: MismatchKind,
    },
}

/// Assemble a graded attempt from a sandbox run.
pub fn build_attempt(
    submission: Submission,
    battery: &TestBattery,
    report: ExecutionReport,
) -> Attempt {
    let (score, status) = scorer::grade(battery, &report.outcomes, report.termination);
    Attempt {
        submission,
        outcomes: report.outcomes,
        status,
        score,
        runtime_logs: report.logs,
        execution_time_ms: report.duration_ms,
        created_at: Utc::now(),
    }
}

/// Compare a claimed verdict with the freshly graded attempt.
pub fn compare(claimed: &ReportedVerdict, fresh: &Attempt) -> Option<MismatchKind> {
    if claimed.status != fresh.status {
        return Some(MismatchKind::Status);
    }
    if (claimed.score - fresh.score).abs() > SCORE_TOLERANCE + 1e-9 {
        return Some(MismatchKind::Score);
    }
    let fresh_passes = fresh.pass_flags();
    if claimed.passes.len() != fresh_passes.len() {
        return Some(MismatchKind::OutcomeCount);
    }
    claimed
        .passes
        .iter()
        .zip(&fresh_passes)
        .position(|(a, b)| a != b)
        .map(|index| MismatchKind::TestFlipped { index })
}

#[derive(Debug, Clone)]
pub struct Revalidator {
    executor: SandboxExecutor,
}

impl Revalidator {
    /// The executor is shared with provisional grading, so re-runs use
    /// identical resource bounds by construction.
    pub fn new(executor: SandboxExecutor) -> Self {
        Self { executor }
    }

    pub async fn revalidate(
        &self,
        submission: &Submission,
        battery: &TestBattery,
        claimed: &ReportedVerdict,
    ) -> Result<Revalidation, GraderError> {
        let report = self.executor.execute(submission, battery).await?;
        let computed = build_attempt(submission.clone(), battery, report);
        match compare(claimed, &computed) {
            None => Ok(Revalidation::Accepted(computed)),
            Some(mismatch) => {
                warn!(
                    "revalidation rejected: user_id={} challenge_id={} mismatch={} claimed_score={} computed_score={}",
                    submission.user_id,
                    submission.challenge_id,
                    mismatch,
                    claimed.score,
                    computed.score
                );
                Ok(Revalidation::Rejected { computed, mismatch })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestOutcome;

    fn fresh_attempt(passes: &[bool], score: f64, status: AttemptStatus) -> Attempt {
        Attempt {
            submission: Submission::new("u", "c", "", "", ""),
            outcomes: passes
                .iter()
                .enumerate()
                .map(|(i, &p)| {
                    if p {
                        TestOutcome::passed(format!("t{}", i))
                    } else {
                        TestOutcome::failed(format!("t{}", i), "expected a truthy result")
                    }
                })
                .collect(),
            status,
            score,
            runtime_logs: vec![],
            execution_time_ms: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_agreeing_verdicts_match() {
        let fresh = fresh_attempt(&[true, false], 50.0, AttemptStatus::Fail);
        let claimed = ReportedVerdict::from(&fresh);
        assert_eq!(compare(&claimed, &fresh), None);
    }

    #[test]
    fn test_score_within_tolerance_accepted() {
        let fresh = fresh_attempt(&[true, false], 50.0, AttemptStatus::Fail);
        let claimed = ReportedVerdict {
            status: AttemptStatus::Fail,
            score: 50.01,
            passes: vec![true, false],
        };
        assert_eq!(compare(&claimed, &fresh), None);
    }

    #[test]
    fn test_score_beyond_tolerance_rejected() {
        let fresh = fresh_attempt(&[true, false], 50.0, AttemptStatus::Fail);
        let claimed = ReportedVerdict {
            status: AttemptStatus::Fail,
            score: 50.02,
            passes: vec![true, false],
        };
        assert_eq!(compare(&claimed, &fresh), Some(MismatchKind::Score));
    }

    #[test]
    fn test_inflated_status_rejected() {
        let fresh = fresh_attempt(&[true, false], 50.0, AttemptStatus::Fail);
        let claimed = ReportedVerdict {
            status: AttemptStatus::Pass,
            score: 100.0,
            passes: vec![true, true],
        };
        assert_eq!(compare(&claimed, &fresh), Some(MismatchKind::Status));
    }

    #[test]
    fn test_flipped_test_rejected() {
        let fresh = fresh_attempt(&[true, false, true], 66.67, AttemptStatus::Fail);
        let claimed = ReportedVerdict {
            status: AttemptStatus::Fail,
            score: 66.67,
            passes: vec![true, true, false],
        };
        assert_eq!(compare(&claimed, &fresh), Some(MismatchKind::TestFlipped { index: 1 }));
    }

    #[test]
    fn test_outcome_count_mismatch_rejected() {
        let fresh = fresh_attempt(&[true, false], 50.0, AttemptStatus::Fail);
        let claimed = ReportedVerdict {
            status: AttemptStatus::Fail,
            score: 50.0,
            passes: vec![true],
        };
        assert_eq!(compare(&claimed, &fresh), Some(MismatchKind::OutcomeCount));
    }
}
