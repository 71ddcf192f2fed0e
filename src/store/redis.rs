//! Redis-backed store
//!
//! Attempts live in append-only lists (RPUSH), progress records in plain
//! keys guarded by a short SET NX EX lock per (user, challenge). The lock
//! carries a TTL so a crashed holder cannot wedge the row; a writer that
//! cannot acquire it within its spin budget reports a conflict and lets
//! the reconciler retry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{MergeFn, Store, StoreError};
use crate::model::{Attempt, ProgressRecord};

/// Redis key layout for persisted grading state.
pub mod keys {
    pub fn attempts(user_id: &str, challenge_id: &str) -> String {
        format!("grader:attempts:{}:{}", user_id, challenge_id)
    }

    pub fn progress(user_id: &str, challenge_id: &str) -> String {
        format!("grader:progress:{}:{}", user_id, challenge_id)
    }

    pub fn progress_lock(user_id: &str, challenge_id: &str) -> String {
        format!("grader:progress:lock:{}:{}", user_id, challenge_id)
    }
}

const LOCK_TTL_SECS: u64 = 5;
const LOCK_SPIN_ATTEMPTS: u32 = 10;
const LOCK_SPIN_DELAY_MS: u64 = 25;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// The connection manager reconnects on its own, so one shared handle
    /// serves the store and the audit sink alike.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn acquire_lock(&self, lock_key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        for _ in 0..LOCK_SPIN_ATTEMPTS {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(lock_key)
                .arg("held")
                .arg("NX")
                .arg("EX")
                .arg(LOCK_TTL_SECS)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            if claimed.is_some() {
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(LOCK_SPIN_DELAY_MS)).await;
        }
        Ok(false)
    }

    async fn release_lock(&self, lock_key: &str) {
        let mut conn = self.conn.clone();
        // Best effort; the TTL reclaims a lost lock anyway.
        let _: Result<(), _> = conn.del(lock_key).await;
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn corrupt(e: serde_json::Error) -> StoreError {
    StoreError::Backend(format!("corrupt record: {}", e))
}

#[async_trait]
impl Store for RedisStore {
    async fn append_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        let key = keys::attempts(&attempt.submission.user_id, &attempt.submission.challenge_id);
        let json = serde_json::to_string(attempt).map_err(corrupt)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&key, &json).await.map_err(backend)?;
        Ok(())
    }

    async fn update_progress(
        &self,
        user_id: &str,
        challenge_id: &str,
        merge: MergeFn<'_>,
    ) -> Result<ProgressRecord, StoreError> {
        let lock_key = keys::progress_lock(user_id, challenge_id);
        if !self.acquire_lock(&lock_key).await? {
            return Err(StoreError::Conflict);
        }

        let result = async {
            let key = keys::progress(user_id, challenge_id);
            let mut conn = self.conn.clone();
            let prior_raw: Option<String> = conn.get(&key).await.map_err(backend)?;
            let prior = match prior_raw {
                Some(raw) => Some(serde_json::from_str(&raw).map_err(corrupt)?),
                None => None,
            };
            let merged = merge(prior);
            let json = serde_json::to_string(&merged).map_err(corrupt)?;
            conn.set::<_, _, ()>(&key, &json).await.map_err(backend)?;
            Ok(merged)
        }
        .await;

        self.release_lock(&lock_key).await;
        result
    }

    async fn progress(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<ProgressRecord>, StoreError> {
        let key = keys::progress(user_id, challenge_id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await.map_err(backend)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(corrupt)?)),
            None => Ok(None),
        }
    }

    async fn attempts(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Vec<Attempt>, StoreError> {
        let key = keys::attempts(user_id, challenge_id);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&key, 0, -1).await.map_err(backend)?;
        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(corrupt))
            .collect()
    }
}
