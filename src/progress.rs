//! Progress reconciliation
//!
//! Folds each persisted attempt into the per-(user, challenge) progress
//! record. The merge itself is a pure function of (prior record, attempt,
//! clock); the reconciler wraps it in the store's atomic upsert and retries
//! a bounded number of times when concurrent attempts collide.
//!
//! Monotonicity rules:
//! - `best_score` never decreases.
//! - `completed` is never revoked; a later failing attempt leaves it set.
//! - `completed_at` records the first pass and is never rewritten.
//! - `first_attempted_at` is fixed at the first merge.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::get_config;
use crate::error::GraderError;
use crate::model::{Attempt, AttemptStatus, ProgressRecord, ProgressStatus};
use crate::store::{Store, StoreError};

const CONFLICT_BACKOFF_MS: u64 = 20;

/// Fold one attempt into the progress record. Pure; safe to re-run when
/// the store retries the upsert.
pub fn merge_attempt(
    prior: Option<&ProgressRecord>,
    attempt: &Attempt,
    now: DateTime<Utc>,
) -> ProgressRecord {
    let passed = attempt.status == AttemptStatus::Pass;
    match prior {
        None => ProgressRecord {
            user_id: attempt.submission.user_id.clone(),
            challenge_id: attempt.submission.challenge_id.clone(),
            status: if passed {
                ProgressStatus::Completed
            } else {
                ProgressStatus::InProgress
            },
            best_score: attempt.score,
            total_attempts: 1,
            first_attempted_at: now,
            last_attempted_at: now,
            completed_at: passed.then_some(now),
        },
        Some(prior) => {
            let completed = passed || prior.status == ProgressStatus::Completed;
            ProgressRecord {
                user_id: prior.user_id.clone(),
                challenge_id: prior.challenge_id.clone(),
                status: if completed {
                    ProgressStatus::Completed
                } else {
                    ProgressStatus::InProgress
                },
                best_score: prior.best_score.max(attempt.score),
                total_attempts: prior.total_attempts.saturating_add(1),
                first_attempted_at: prior.first_attempted_at,
                last_attempted_at: now,
                completed_at: prior.completed_at.or_else(|| passed.then_some(now)),
            }
        }
    }
}

pub struct ProgressReconciler {
    store: Arc<dyn Store>,
    retry_limit: u32,
}

impl ProgressReconciler {
    pub fn new(store: Arc<dyn Store>, retry_limit: u32) -> Self {
        Self {
            store,
            retry_limit: retry_limit.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn Store>) -> Self {
        Self::new(store, get_config().persistence_retry_limit)
    }

    /// Apply `attempt` to the progress record, retrying lost races up to
    /// the configured bound before giving up with a conflict error.
    pub async fn reconcile(&self, attempt: &Attempt) -> Result<ProgressRecord, GraderError> {
        let user_id = &attempt.submission.user_id;
        let challenge_id = &attempt.submission.challenge_id;
        let merge = |prior: Option<ProgressRecord>| merge_attempt(prior.as_ref(), attempt, Utc::now());

        let mut tries = 0u32;
        loop {
            match self.store.update_progress(user_id, challenge_id, &merge).await {
                Ok(record) => {
                    debug!(
                        "Progress for {}/{}: {} attempts, best {:.2}, status {}",
                        user_id, challenge_id, record.total_attempts, record.best_score, record.status
                    );
                    return Ok(record);
                }
                Err(StoreError::Conflict) => {
                    tries += 1;
                    if tries >= self.retry_limit {
                        warn!(
                            "Progress update for {}/{} still conflicted after {} tries",
                            user_id, challenge_id, tries
                        );
                        return Err(GraderError::PersistenceConflict);
                    }
                    tokio::time::sleep(Duration::from_millis(
                        CONFLICT_BACKOFF_MS * u64::from(tries),
                    ))
                    .await;
                }
                Err(StoreError::Backend(msg)) => return Err(GraderError::Persistence(msg)),
            }
        }
    }
}
