//! Health and readiness probes
//!
//! Small HTTP surface for orchestration: liveness says the process is up,
//! readiness says the worker has a Redis lease and is polling the queue.
//! `/statusz` adds coarse counters for dashboards.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    claims_rejected: AtomicU64,
}

impl HealthState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn record_processed(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.claims_rejected.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct StatusBody {
    ready: bool,
    jobs_processed: u64,
    jobs_failed: u64,
    claims_rejected: u64,
    version: &'static str,
}

async fn healthz() -> &'static str {
    "OK"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn statusz(State(state): State<Arc<HealthState>>) -> Json<StatusBody> {
    Json(StatusBody {
        ready: state.ready.load(Ordering::SeqCst),
        jobs_processed: state.jobs_processed.load(Ordering::Relaxed),
        jobs_failed: state.jobs_failed.load(Ordering::Relaxed),
        claims_rejected: state.claims_rejected.load(Ordering::Relaxed),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/statusz", get(statusz))
        .with_state(state)
}

/// Serve the probe endpoints for the life of the process.
pub fn spawn(state: Arc<HealthState>, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let app = router(state);
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("Health endpoints on {}", addr);
                if let Err(e) = axum::serve(listener, app).await {
                    error!("Health server stopped: {}", e);
                }
            }
            Err(e) => error!("Could not bind health endpoints on {}: {}", addr, e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_flips_once_marked() {
        let state = HealthState::new();
        let (code, _) = readyz(State(state.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        state.mark_ready();
        let (code, body) = readyz(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn test_status_counters() {
        let state = HealthState::new();
        state.record_processed();
        state.record_processed();
        state.record_failed();
        state.record_rejected();

        let Json(body) = statusz(State(state)).await;
        assert_eq!(body.jobs_processed, 2);
        assert_eq!(body.jobs_failed, 1);
        assert_eq!(body.claims_rejected, 1);
        assert!(!body.ready);
    }
}
