use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use tracing::{error, info};

use grader::audit::RejectionAudit;
use grader::config::{get_config, init_config, GraderConfig};
use grader::content::{ChallengeSource, StorageChallengeSource, TomlChallengeRegistry};
use grader::executor::SandboxExecutor;
use grader::health::{self, HealthState};
use grader::jobs::{process_job, Disposition, GradeResult};
use grader::redis_manager::RedisManager;
use grader::service::SubmissionService;
use grader::storage::StorageClient;
use grader::store::redis::RedisStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    init_config(GraderConfig::from_env());
    let config = get_config();
    info!(
        "Grader config: time budget {}ms, memory {}MB, payload cap {} bytes",
        config.time_budget_ms, config.memory_limit_mb, config.max_payload_bytes
    );

    info!("Starting Grading Worker...");

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());

    let mut manager = RedisManager::with_url(&redis_url).await?;
    info!("Worker {} ready", manager.worker_id());

    // The store and the rejection audit share one auto-reconnecting handle.
    let client = redis::Client::open(redis_url.as_str()).context("Failed to create Redis client")?;
    let conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect the Redis store")?;
    let store = Arc::new(RedisStore::new(conn.clone()));
    let audit = RejectionAudit::new(conn);

    let content = challenge_source().await?;

    let executor = SandboxExecutor::from_config(config);
    info!("Sandbox runner at {}", config.runner_path().display());

    let service = SubmissionService::new(content, store, executor, audit);

    let health = HealthState::new();
    health::spawn(health.clone(), config.health_port);
    health.mark_ready();

    info!("Waiting for jobs...");

    loop {
        let job = manager.pop_job().await?;
        let submission_id = job.submission_id();

        match process_job(&service, &job).await {
            Ok(result) => {
                if result.disposition == Disposition::Rejected.to_string() {
                    health.record_rejected();
                }
                health.record_processed();
                if let Err(e) = manager.store_grade_result(&result).await {
                    error!("Failed to store grade result: {}", e);
                }
                info!(
                    "Job completed: submission_id={}, disposition={}",
                    result.submission_id, result.disposition
                );
            }
            Err(e) => {
                error!("Failed to process job {}: {:#}", submission_id, e);
                health.record_failed();
                let error_result = GradeResult::failed(submission_id, format!("{:#}", e));
                if let Err(e) = manager.store_grade_result(&error_result).await {
                    error!("Failed to store grade error result: {}", e);
                }
            }
        }
    }
}

/// Pick where test batteries come from.
///
/// `CHALLENGES_CONFIG` selects a local TOML registry for development;
/// production workers fetch versioned battery documents from MinIO.
async fn challenge_source() -> Result<Arc<dyn ChallengeSource>> {
    if let Ok(path) = std::env::var("CHALLENGES_CONFIG") {
        let registry = TomlChallengeRegistry::from_file(Path::new(&path))
            .with_context(|| format!("Failed to load challenge registry from {}", path))?;
        info!("Loaded challenge registry from {}", path);
        return Ok(Arc::new(registry));
    }

    let storage = StorageClient::from_env().await?;
    info!("Connected to MinIO storage");
    Ok(Arc::new(StorageChallengeSource::new(storage)))
}
