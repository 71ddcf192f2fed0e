//! Sandboxed grading worker for browser-lab challenges.
//!
//! A submission (markup, style, script) runs inside a spawned sandbox
//! process under hard resource limits, the challenge's test battery is
//! evaluated against the resulting document, and the outcome is scored
//! and folded into per-user progress in Redis.

pub mod audit;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod health;
pub mod jobs;
pub mod model;
pub mod progress;
pub mod protocol;
pub mod redis_manager;
pub mod revalidator;
pub mod scorer;
pub mod service;
pub mod storage;
pub mod store;
