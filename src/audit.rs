//! Rejection audit trail
//!
//! When revalidation rejects a claimed verdict, the evidence is kept for
//! review: who submitted what, what they claimed, and what the server
//! computed. The submitter only ever sees a generic validation failure,
//! so this list is where the detail lives. Writes are best-effort; a
//! failed audit write never fails the grading path.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::get_config;
use crate::model::{Attempt, AttemptStatus, Submission};
use crate::revalidator::{MismatchKind, ReportedVerdict};

const AUDIT_LIST_KEY: &str = "grader:audit:rejections";

/// Content fingerprint over the three submission channels. Channels are
/// length-prefixed so content cannot be shifted across a boundary to
/// produce the same digest.
pub fn fingerprint(submission: &Submission) -> String {
    let mut hasher = Sha256::new();
    for channel in [&submission.markup, &submission.style, &submission.script] {
        hasher.update((channel.len() as u64).to_be_bytes());
        hasher.update(channel.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// One rejected claim, with verbatim copies of what was submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord {
    pub user_id: String,
    pub challenge_id: String,
    pub content_version: u32,
    pub fingerprint: String,
    pub mismatch: String,
    pub claimed_status: AttemptStatus,
    pub claimed_score: f64,
    pub computed_status: AttemptStatus,
    pub computed_score: f64,
    /// Submission channels, base64-armored for safe transport and review.
    pub markup_b64: String,
    pub style_b64: String,
    pub script_b64: String,
    pub created_at: DateTime<Utc>,
}

impl RejectionRecord {
    pub fn new(
        submission: &Submission,
        content_version: u32,
        claimed: &ReportedVerdict,
        computed: &Attempt,
        mismatch: MismatchKind,
    ) -> Self {
        Self {
            user_id: submission.user_id.clone(),
            challenge_id: submission.challenge_id.clone(),
            content_version,
            fingerprint: fingerprint(submission),
            mismatch: mismatch.to_string(),
            claimed_status: claimed.status,
            claimed_score: claimed.score,
            computed_status: computed.status,
            computed_score: computed.score,
            markup_b64: general_purpose::STANDARD.encode(&submission.markup),
            style_b64: general_purpose::STANDARD.encode(&submission.style),
            script_b64: general_purpose::STANDARD.encode(&submission.script),
            created_at: Utc::now(),
        }
    }
}

/// Sink for rejection records, backed by a capped-retention Redis list.
#[derive(Clone)]
pub struct RejectionAudit {
    conn: Option<ConnectionManager>,
    ttl_secs: u64,
}

impl RejectionAudit {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn: Some(conn),
            ttl_secs: get_config().audit_ttl_secs,
        }
    }

    /// Sink that drops records; rejections then only appear in the logs.
    pub fn disabled() -> Self {
        Self {
            conn: None,
            ttl_secs: 0,
        }
    }

    pub async fn record(&self, record: &RejectionRecord) {
        let Some(conn) = &self.conn else {
            return;
        };
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialize rejection record: {}", e);
                return;
            }
        };

        let mut conn = conn.clone();
        let ttl = self.ttl_secs as i64;
        let outcome: redis::RedisResult<()> = async {
            conn.rpush::<_, _, ()>(AUDIT_LIST_KEY, &json).await?;
            conn.expire::<_, ()>(AUDIT_LIST_KEY, ttl).await?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            warn!("Failed to write rejection audit record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> Submission {
        Submission::new("u1", "c1", "<h1>hi</h1>", "h1 { color: red; }", "log('x');")
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(&submission());
        let b = fingerprint(&submission());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_separates_channels() {
        let a = fingerprint(&Submission::new("u", "c", "ab", "c", ""));
        let b = fingerprint(&Submission::new("u", "c", "a", "bc", ""));
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_carries_verbatim_payloads() {
        let submission = submission();
        let claimed = ReportedVerdict {
            status: AttemptStatus::Pass,
            score: 100.0,
            passes: vec![true],
        };
        let computed = Attempt {
            submission: submission.clone(),
            outcomes: vec![],
            status: AttemptStatus::Fail,
            score: 0.0,
            runtime_logs: vec![],
            execution_time_ms: 5,
            created_at: Utc::now(),
        };

        let record =
            RejectionRecord::new(&submission, 2, &claimed, &computed, MismatchKind::Status);
        assert_eq!(record.mismatch, "status");
        assert_eq!(record.claimed_score, 100.0);
        assert_eq!(record.computed_status, AttemptStatus::Fail);
        let markup = general_purpose::STANDARD.decode(&record.markup_b64).unwrap();
        assert_eq!(String::from_utf8(markup).unwrap(), submission.markup);
    }
}
