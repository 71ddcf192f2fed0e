//! Error types shared across the grading pipeline.

use thiserror::Error;

/// Errors surfaced by the grading pipeline.
///
/// `ValidationMismatch` deliberately carries no detail: the caller-facing
/// message must not explain which check a forged verdict tripped. The full
/// diff goes to the rejection audit instead.
#[derive(Debug, Error)]
pub enum GraderError {
    /// A client-reported verdict disagreed with the server re-run.
    #[error("submission failed validation")]
    ValidationMismatch,

    /// The sandbox never became ready, or could not be torn down. This is
    /// an infrastructure failure; a slow submission is not an error and
    /// finishes as a timed-out attempt instead.
    #[error("sandbox did not respond within the execution window")]
    ExecutionTimeout,

    /// A progress upsert kept losing races past the retry bound.
    #[error("progress update conflicted with concurrent attempts")]
    PersistenceConflict,

    /// A submission channel exceeded the configured size cap.
    #[error("{channel} payload exceeds {limit} bytes")]
    PayloadTooLarge { channel: &'static str, limit: usize },

    /// No test battery exists for the requested challenge version.
    #[error("no test battery for challenge {challenge_id} v{content_version}")]
    UnknownChallenge {
        challenge_id: String,
        content_version: u32,
    },

    /// The content source (registry file or object storage) failed.
    #[error("content source error: {0}")]
    Content(String),

    /// The persistence backend failed for a reason other than a conflict.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Spawning or supervising the sandbox process failed.
    #[error("sandbox error: {0}")]
    Sandbox(String),
}

impl GraderError {
    /// True for failures of the platform rather than of the submission.
    /// Infrastructure failures are retryable; user-level failures are not.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            GraderError::ExecutionTimeout
                | GraderError::PersistenceConflict
                | GraderError::Content(_)
                | GraderError::Persistence(_)
                | GraderError::Sandbox(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_mismatch_message_is_generic() {
        let msg = GraderError::ValidationMismatch.to_string();
        assert_eq!(msg, "submission failed validation");
        assert!(!msg.contains("score"));
        assert!(!msg.contains("test"));
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(GraderError::ExecutionTimeout.is_infrastructure());
        assert!(GraderError::Persistence("down".into()).is_infrastructure());
        assert!(!GraderError::ValidationMismatch.is_infrastructure());
        assert!(!GraderError::PayloadTooLarge { channel: "markup", limit: 1 }.is_infrastructure());
    }
}
