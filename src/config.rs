//! Worker configuration
//!
//! All knobs come from environment variables with conservative defaults,
//! loaded once at startup and shared through a `OnceLock`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

/// Runtime configuration for the grading worker.
#[derive(Debug, Clone)]
pub struct GraderConfig {
    /// Wall-clock budget for one sandbox run, in milliseconds.
    pub time_budget_ms: u64,
    /// How long to wait for the sandbox ready handshake before treating
    /// the run as an infrastructure failure.
    pub handshake_grace_ms: u64,
    /// Address-space cap for the sandbox process, in MB.
    pub memory_limit_mb: u32,
    /// RLIMIT_NOFILE for the sandbox process.
    pub open_files: u32,
    /// Per-channel submission size cap, in bytes.
    pub max_payload_bytes: usize,
    /// Log lines retained per run; extras are dropped and counted.
    pub max_log_lines: usize,
    /// Longest retained log line; longer lines are truncated.
    pub max_log_line_len: usize,
    /// Bounded retries for conflicting progress upserts.
    pub persistence_retry_limit: u32,
    /// Port for the health probe server.
    pub health_port: u16,
    /// Explicit path to the sandbox runner binary. When unset the worker
    /// looks for `grader-sandbox` next to its own executable.
    pub sandbox_runner_path: Option<PathBuf>,
    /// Retention for rejection audit records, in seconds.
    pub audit_ttl_secs: u64,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 5000,
            handshake_grace_ms: 2000,
            memory_limit_mb: 256,
            open_files: 16,
            max_payload_bytes: 64 * 1024,
            max_log_lines: 256,
            max_log_line_len: 4096,
            persistence_retry_limit: 3,
            health_port: 8088,
            sandbox_runner_path: None,
            audit_ttl_secs: 7 * 24 * 3600,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl GraderConfig {
    /// Load configuration from `GRADER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            time_budget_ms: env_parse("GRADER_TIME_BUDGET_MS", defaults.time_budget_ms),
            handshake_grace_ms: env_parse("GRADER_HANDSHAKE_GRACE_MS", defaults.handshake_grace_ms),
            memory_limit_mb: env_parse("GRADER_MEMORY_LIMIT_MB", defaults.memory_limit_mb),
            open_files: env_parse("GRADER_OPEN_FILES", defaults.open_files),
            max_payload_bytes: env_parse("GRADER_MAX_PAYLOAD_BYTES", defaults.max_payload_bytes),
            max_log_lines: env_parse("GRADER_MAX_LOG_LINES", defaults.max_log_lines),
            max_log_line_len: env_parse("GRADER_MAX_LOG_LINE_LEN", defaults.max_log_line_len),
            persistence_retry_limit: env_parse(
                "GRADER_PERSISTENCE_RETRIES",
                defaults.persistence_retry_limit,
            ),
            health_port: env_parse("GRADER_HEALTH_PORT", defaults.health_port),
            sandbox_runner_path: std::env::var("GRADER_SANDBOX_BIN").ok().map(PathBuf::from),
            audit_ttl_secs: env_parse("GRADER_AUDIT_TTL_SECS", defaults.audit_ttl_secs),
        }
    }

    /// Where the sandbox runner binary lives. Falls back to a sibling of
    /// the current executable, which is where cargo installs both bins.
    pub fn runner_path(&self) -> PathBuf {
        if let Some(path) = &self.sandbox_runner_path {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("grader-sandbox")))
            .unwrap_or_else(|| PathBuf::from("grader-sandbox"))
    }
}

static CONFIG: OnceLock<GraderConfig> = OnceLock::new();

/// Install the worker configuration. Later calls are ignored.
pub fn init_config(config: GraderConfig) {
    let _ = CONFIG.set(config);
}

/// Read the worker configuration, falling back to defaults if `init_config`
/// was never called.
pub fn get_config() -> &'static GraderConfig {
    CONFIG.get_or_init(|| {
        warn!("Grader config not initialized, using defaults");
        GraderConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GraderConfig::default();
        assert_eq!(cfg.time_budget_ms, 5000);
        assert_eq!(cfg.max_payload_bytes, 65536);
        assert_eq!(cfg.persistence_retry_limit, 3);
        assert!(cfg.sandbox_runner_path.is_none());
    }

    #[test]
    fn test_runner_path_prefers_explicit_override() {
        let cfg = GraderConfig {
            sandbox_runner_path: Some(PathBuf::from("/opt/grader/grader-sandbox")),
            ..Default::default()
        };
        assert_eq!(cfg.runner_path(), PathBuf::from("/opt/grader/grader-sandbox"));
    }
}
