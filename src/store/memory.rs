//! In-memory store
//!
//! Backed by `DashMap`; the entry lock makes `update_progress` atomic per
//! key, so this backend never reports a conflict.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{MergeFn, Store, StoreError};
use crate::model::{Attempt, ProgressRecord};

type Key = (String, String);

#[derive(Debug, Default)]
pub struct MemoryStore {
    attempts: DashMap<Key, Vec<Attempt>>,
    progress: DashMap<Key, ProgressRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, challenge_id: &str) -> Key {
        (user_id.to_string(), challenge_id.to_string())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        let key = Self::key(&attempt.submission.user_id, &attempt.submission.challenge_id);
        self.attempts.entry(key).or_default().push(attempt.clone());
        Ok(())
    }

    async fn update_progress(
        &self,
        user_id: &str,
        challenge_id: &str,
        merge: MergeFn<'_>,
    ) -> Result<ProgressRecord, StoreError> {
        match self.progress.entry(Self::key(user_id, challenge_id)) {
            Entry::Occupied(mut entry) => {
                let merged = merge(Some(entry.get().clone()));
                entry.insert(merged.clone());
                Ok(merged)
            }
            Entry::Vacant(entry) => {
                let merged = merge(None);
                entry.insert(merged.clone());
                Ok(merged)
            }
        }
    }

    async fn progress(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<ProgressRecord>, StoreError> {
        Ok(self
            .progress
            .get(&Self::key(user_id, challenge_id))
            .map(|r| r.clone()))
    }

    async fn attempts(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Vec<Attempt>, StoreError> {
        Ok(self
            .attempts
            .get(&Self::key(user_id, challenge_id))
            .map(|a| a.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttemptStatus, ProgressStatus, Submission};
    use chrono::Utc;

    fn attempt(user: &str, challenge: &str, score: f64) -> Attempt {
        Attempt {
            submission: Submission::new(user, challenge, "", "", ""),
            outcomes: vec![],
            status: AttemptStatus::Fail,
            score,
            runtime_logs: vec![],
            execution_time_ms: 1,
            created_at: Utc::now(),
        }
    }

    fn record(user: &str, challenge: &str, attempts: u32) -> ProgressRecord {
        let now = Utc::now();
        ProgressRecord {
            user_id: user.to_string(),
            challenge_id: challenge.to_string(),
            status: ProgressStatus::InProgress,
            best_score: 10.0,
            total_attempts: attempts,
            first_attempted_at: now,
            last_attempted_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_append_and_list_attempts() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.append_attempt(&attempt("u1", "c1", 10.0)).await.unwrap();
            store.append_attempt(&attempt("u1", "c1", 20.0)).await.unwrap();
            store.append_attempt(&attempt("u2", "c1", 30.0)).await.unwrap();

            let history = store.attempts("u1", "c1").await.unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].score, 10.0);
            assert_eq!(history[1].score, 20.0);
            assert_eq!(store.attempts("u2", "c1").await.unwrap().len(), 1);
            assert!(store.attempts("u3", "c1").await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_update_progress_sees_prior() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            assert_eq!(store.progress("u1", "c1").await.unwrap(), None);

            let first = store
                .update_progress("u1", "c1", &|prior| {
                    assert!(prior.is_none());
                    record("u1", "c1", 1)
                })
                .await
                .unwrap();
            assert_eq!(first.total_attempts, 1);

            let second = store
                .update_progress("u1", "c1", &|prior| {
                    let prior = prior.unwrap();
                    record("u1", "c1", prior.total_attempts + 1)
                })
                .await
                .unwrap();
            assert_eq!(second.total_attempts, 2);
            assert_eq!(
                store.progress("u1", "c1").await.unwrap().unwrap().total_attempts,
                2
            );
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_all_land() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_progress("u1", "c1", &|prior| {
                        let attempts = prior.map(|p| p.total_attempts).unwrap_or(0);
                        record("u1", "c1", attempts + 1)
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let final_record = store.progress("u1", "c1").await.unwrap().unwrap();
        assert_eq!(final_record.total_attempts, 16);
    }
}
