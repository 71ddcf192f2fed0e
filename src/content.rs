//! Challenge content sources
//!
//! A test battery is addressed by (challenge id, content version) and is
//! immutable once published: re-grading against version N must see exactly
//! the battery version N shipped. Two sources exist: a TOML registry file
//! for development and self-contained deployments, and object storage for
//! the hosted platform. Storage fetches are cached for the life of the
//! worker since a published version never changes.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::GraderError;
use crate::model::{TestBattery, TestCase};
use crate::storage::StorageClient;

/// Provider of test batteries by (challenge, content version).
#[async_trait]
pub trait ChallengeSource: Send + Sync {
    /// Fetch the battery, or None when that version was never published.
    async fn battery(
        &self,
        challenge_id: &str,
        content_version: u32,
    ) -> Result<Option<TestBattery>, GraderError>;
}

/// Raw TOML shape of one published battery
#[derive(Debug, Deserialize)]
struct RawBattery {
    id: String,
    version: u32,
    #[serde(default, rename = "test")]
    tests: Vec<RawTest>,
}

#[derive(Debug, Deserialize)]
struct RawTest {
    name: String,
    assertion: String,
    weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    #[serde(default, rename = "challenge")]
    challenges: Vec<RawBattery>,
}

impl From<RawBattery> for TestBattery {
    fn from(raw: RawBattery) -> Self {
        let tests = raw
            .tests
            .into_iter()
            .map(|t| TestCase {
                name: t.name,
                assertion: t.assertion,
                weight: t.weight,
            })
            .collect();
        TestBattery::new(raw.id, raw.version, tests)
    }
}

/// Registry of batteries loaded from a single TOML file.
#[derive(Debug)]
pub struct TomlChallengeRegistry {
    batteries: HashMap<(String, u32), TestBattery>,
}

impl TomlChallengeRegistry {
    pub fn from_toml(content: &str) -> Result<Self, GraderError> {
        let raw: RawRegistry = toml::from_str(content)
            .map_err(|e| GraderError::Content(format!("challenge registry: {}", e)))?;

        let mut batteries = HashMap::new();
        for raw_battery in raw.challenges {
            let battery: TestBattery = raw_battery.into();
            let key = (battery.challenge_id.clone(), battery.content_version);
            if batteries.insert(key, battery).is_some() {
                warn!("Challenge registry lists a duplicate battery, keeping the later entry");
            }
        }

        Ok(Self { batteries })
    }

    pub fn from_file(path: &Path) -> Result<Self, GraderError> {
        let content = fs::read_to_string(path)
            .map_err(|e| GraderError::Content(format!("read {}: {}", path.display(), e)))?;
        let registry = Self::from_toml(&content)?;
        info!(
            "Loaded {} test batteries from {}",
            registry.batteries.len(),
            path.display()
        );
        Ok(registry)
    }
}

#[async_trait]
impl ChallengeSource for TomlChallengeRegistry {
    async fn battery(
        &self,
        challenge_id: &str,
        content_version: u32,
    ) -> Result<Option<TestBattery>, GraderError> {
        let key = (challenge_id.to_string(), content_version);
        Ok(self.batteries.get(&key).cloned())
    }
}

/// Batteries fetched from object storage, one TOML document per version.
pub struct StorageChallengeSource {
    storage: StorageClient,
    cache: DashMap<(String, u32), TestBattery>,
}

impl StorageChallengeSource {
    pub fn new(storage: StorageClient) -> Self {
        Self {
            storage,
            cache: DashMap::new(),
        }
    }

    fn object_key(challenge_id: &str, content_version: u32) -> String {
        format!("batteries/{}/v{}.toml", challenge_id, content_version)
    }
}

#[async_trait]
impl ChallengeSource for StorageChallengeSource {
    async fn battery(
        &self,
        challenge_id: &str,
        content_version: u32,
    ) -> Result<Option<TestBattery>, GraderError> {
        let cache_key = (challenge_id.to_string(), content_version);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(Some(hit.clone()));
        }

        let object = Self::object_key(challenge_id, content_version);
        let text = match self
            .storage
            .download_string(&object)
            .await
            .map_err(|e| GraderError::Content(format!("{:#}", e)))?
        {
            Some(text) => text,
            None => return Ok(None),
        };

        let raw: RawBattery = toml::from_str(&text)
            .map_err(|e| GraderError::Content(format!("battery {}: {}", object, e)))?;
        if raw.id != challenge_id || raw.version != content_version {
            return Err(GraderError::Content(format!(
                "battery {} declares {}/v{}, expected {}/v{}",
                object, raw.id, raw.version, challenge_id, content_version
            )));
        }

        let battery: TestBattery = raw.into();
        self.cache.insert(cache_key, battery.clone());
        Ok(Some(battery))
    }
}
