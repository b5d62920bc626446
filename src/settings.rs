use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::db::RetryPolicy;

const DEBUG_AGGREGATION_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub aggregation_interval_secs: u64,
    pub sample_interval_ms: u64,
    /// Samples kept between aggregation cycles; about 60 s at 30 fps.
    pub buffer_capacity: usize,
    pub pending_capacity: usize,
    pub storage_retry_attempts: u32,
    pub storage_retry_backoff_ms: u64,
    pub export_dir: Option<PathBuf>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            aggregation_interval_secs: 30,
            sample_interval_ms: 33,
            buffer_capacity: 1800,
            pending_capacity: 20,
            storage_retry_attempts: 3,
            storage_retry_backoff_ms: 200,
            export_dir: None,
        }
    }
}

impl TrackerSettings {
    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs.max(1))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.storage_retry_attempts.max(1),
            backoff: Duration::from_millis(self.storage_retry_backoff_ms),
        }
    }

    /// Applies `HEALTHTRACK_DEBUG=1`, which shortens the aggregation window.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("HEALTHTRACK_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.aggregation_interval_secs = DEBUG_AGGREGATION_INTERVAL_SECS;
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    /// Loads `path`, falling back to defaults when the file is missing or
    /// cannot be parsed.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings in {}: {err}", path.display());
                TrackerSettings::default()
            })
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> TrackerSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
