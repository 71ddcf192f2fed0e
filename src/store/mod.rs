//! Persistence layer
//!
//! One trait, two backends: an in-memory store for tests and single-node
//! runs, and a Redis store for the worker fleet. Attempts are append-only
//! history; progress is a single record per (user, challenge) updated
//! through an atomic read-merge-write.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Attempt, ProgressRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer held the same (user, challenge) progress row.
    #[error("concurrent progress update")]
    Conflict,
    #[error("store backend: {0}")]
    Backend(String),
}

/// Merge applied inside the store's atomicity boundary: prior record in,
/// next record out. Must be pure; the store may call it again on retry.
pub type MergeFn<'a> = &'a (dyn Fn(Option<ProgressRecord>) -> ProgressRecord + Send + Sync);

#[async_trait]
pub trait Store: Send + Sync {
    /// Append one graded attempt to the per-(user, challenge) history.
    async fn append_attempt(&self, attempt: &Attempt) -> Result<(), StoreError>;

    /// Atomic conditional upsert: read the prior progress record, apply
    /// `merge`, write the result. Returns the record as written.
    async fn update_progress(
        &self,
        user_id: &str,
        challenge_id: &str,
        merge: MergeFn<'_>,
    ) -> Result<ProgressRecord, StoreError>;

    async fn progress(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<ProgressRecord>, StoreError>;

    /// Attempt history, oldest first.
    async fn attempts(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Vec<Attempt>, StoreError>;
}
