//! Submission grading pipeline
//!
//! Ties the pieces together for one submission: payload caps, battery
//! lookup, sandbox execution, scoring, optional revalidation of a claimed
//! verdict, persistence, and progress reconciliation. Nothing persists
//! until the verdict is the server's own.

use std::sync::Arc;

use tracing::info;

use crate::audit::{RejectionAudit, RejectionRecord};
use crate::config::get_config;
use crate::content::ChallengeSource;
use crate::error::GraderError;
use crate::executor::SandboxExecutor;
use crate::model::{Attempt, ProgressRecord, Submission, TestBattery};
use crate::progress::ProgressReconciler;
use crate::revalidator::{build_attempt, Revalidation, Revalidator, ReportedVerdict};
use crate::store::{Store, StoreError};

/// A persisted attempt together with the progress record it produced.
#[derive(Debug)]
pub struct Graded {
    pub attempt: Attempt,
    pub progress: ProgressRecord,
}

pub struct SubmissionService {
    content: Arc<dyn ChallengeSource>,
    store: Arc<dyn Store>,
    executor: SandboxExecutor,
    revalidator: Revalidator,
    reconciler: ProgressReconciler,
    audit: RejectionAudit,
    max_payload_bytes: usize,
}

impl SubmissionService {
    /// The revalidator shares the grading executor, so re-runs always use
    /// the same resource bounds as the provisional run.
    pub fn new(
        content: Arc<dyn ChallengeSource>,
        store: Arc<dyn Store>,
        executor: SandboxExecutor,
        audit: RejectionAudit,
    ) -> Self {
        let revalidator = Revalidator::new(executor.clone());
        let reconciler = ProgressReconciler::from_config(store.clone());
        Self {
            content,
            store,
            executor,
            revalidator,
            reconciler,
            audit,
            max_payload_bytes: get_config().max_payload_bytes,
        }
    }

    /// Grade a submission server-side and persist the result.
    pub async fn grade(
        &self,
        submission: Submission,
        content_version: u32,
    ) -> Result<Graded, GraderError> {
        self.check_payload_sizes(&submission)?;
        let battery = self
            .battery(&submission.challenge_id, content_version)
            .await?;
        let report = self.executor.execute(&submission, &battery).await?;
        let attempt = build_attempt(submission, &battery, report);
        self.persist(attempt).await
    }

    /// Re-run a submission that arrived with a client-computed verdict.
    /// An accepted claim persists the server's attempt; a rejected claim
    /// persists nothing and is recorded in the audit trail.
    pub async fn verify(
        &self,
        submission: Submission,
        content_version: u32,
        claimed: ReportedVerdict,
    ) -> Result<Graded, GraderError> {
        self.check_payload_sizes(&submission)?;
        let battery = self
            .battery(&submission.challenge_id, content_version)
            .await?;
        match self
            .revalidator
            .revalidate(&submission, &battery, &claimed)
            .await?
        {
            Revalidation::Accepted(attempt) => self.persist(attempt).await,
            Revalidation::Rejected { computed, mismatch } => {
                let record = RejectionRecord::new(
                    &submission,
                    content_version,
                    &claimed,
                    &computed,
                    mismatch,
                );
                self.audit.record(&record).await;
                Err(GraderError::ValidationMismatch)
            }
        }
    }

    fn check_payload_sizes(&self, submission: &Submission) -> Result<(), GraderError> {
        let limit = self.max_payload_bytes;
        let channels = [
            ("markup", &submission.markup),
            ("style", &submission.style),
            ("script", &submission.script),
        ];
        for (channel, content) in channels {
            if content.len() > limit {
                return Err(GraderError::PayloadTooLarge { channel, limit });
            }
        }
        Ok(())
    }

    async fn battery(
        &self,
        challenge_id: &str,
        content_version: u32,
    ) -> Result<TestBattery, GraderError> {
        self.content
            .battery(challenge_id, content_version)
            .await?
            .ok_or_else(|| GraderError::UnknownChallenge {
                challenge_id: challenge_id.to_string(),
                content_version,
            })
    }

    async fn persist(&self, attempt: Attempt) -> Result<Graded, GraderError> {
        self.store
            .append_attempt(&attempt)
            .await
            .map_err(store_err)?;
        let progress = self.reconciler.reconcile(&attempt).await?;
        info!(
            "Graded {}/{}: {} with score {:.2} (attempt #{})",
            attempt.submission.user_id,
            attempt.submission.challenge_id,
            attempt.status,
            attempt.score,
            progress.total_attempts
        );
        Ok(Graded { attempt, progress })
    }
}

fn store_err(e: StoreError) -> GraderError {
    match e {
        StoreError::Conflict => GraderError::PersistenceConflict,
        StoreError::Backend(msg) => GraderError::Persistence(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::executor::SandboxLimits;
    use crate::model::{TestCase, TestBattery};
    use crate::store::memory::MemoryStore;

    struct FixedSource(Option<TestBattery>);

    #[async_trait]
    impl ChallengeSource for FixedSource {
        async fn battery(
            &self,
            _challenge_id: &str,
            _content_version: u32,
        ) -> Result<Option<TestBattery>, GraderError> {
            Ok(self.0.clone())
        }
    }

    fn service(source: FixedSource) -> SubmissionService {
        // Runner path is never reached by these tests.
        SubmissionService::new(
            Arc::new(source),
            Arc::new(MemoryStore::new()),
            SandboxExecutor::new("/nonexistent/runner", SandboxLimits::default()),
            RejectionAudit::disabled(),
        )
    }

    #[tokio::test]
    async fn test_oversized_channel_is_rejected_before_execution() {
        let battery = TestBattery::new("c1", 1, vec![TestCase::new("t", "1")]);
        let svc = service(FixedSource(Some(battery)));
        let big = "x".repeat(svc.max_payload_bytes + 1);
        let err = svc
            .grade(Submission::new("u1", "c1", "", "", big), 1)
            .await
            .unwrap_err();
        match err {
            GraderError::PayloadTooLarge { channel, .. } => assert_eq!(channel, "script"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_challenge_version() {
        let svc = service(FixedSource(None));
        let err = svc
            .grade(Submission::new("u1", "c1", "<p></p>", "", ""), 7)
            .await
            .unwrap_err();
        match err {
            GraderError::UnknownChallenge {
                challenge_id,
                content_version,
            } => {
                assert_eq!(challenge_id, "c1");
                assert_eq!(content_version, 7);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
