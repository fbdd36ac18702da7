use crate::error::MeasurementError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted budget or timeout: one day.
const MAX_DURATION_SECS: f64 = 86_400.0;
const MAX_STREAMS: usize = 64;
const MAX_UPLOAD_CHUNK_KB: u64 = 100_000;

/// Tunables for one measurement run.
///
/// Sizes are decimal (1 MB = 1_000_000 bytes) to match how rates are reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub latency_attempts: usize,
    pub duration_budget_secs: f64,
    pub stream_count: usize,
    pub overall_timeout_secs: f64,
    pub probe_timeout_ms: u64,
    pub stream_cap_mb: u64,
    pub upload_chunk_kb: u64,
    pub progress_interval_ms: u64,
    pub catalog_path: Option<PathBuf>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            latency_attempts: 5,
            duration_budget_secs: 10.0,
            stream_count: 4,
            overall_timeout_secs: 90.0,
            probe_timeout_ms: 2_000,
            stream_cap_mb: 25,
            upload_chunk_kb: 1_000,
            progress_interval_ms: 100,
            catalog_path: None,
        }
    }
}

impl MeasurementConfig {
    pub fn duration_budget(&self) -> Duration {
        clamped_secs(self.duration_budget_secs)
    }

    pub fn overall_timeout(&self) -> Duration {
        clamped_secs(self.overall_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn stream_cap_bytes(&self) -> u64 {
        self.stream_cap_mb.saturating_mul(1_000_000)
    }

    pub fn upload_chunk_bytes(&self) -> usize {
        usize::try_from(self.upload_chunk_kb.saturating_mul(1_000)).unwrap_or(usize::MAX)
    }

    /// Rejects values that would make a run meaningless or unbounded.
    pub fn validate(&self) -> Result<(), MeasurementError> {
        let invalid = |msg: &str| Err(MeasurementError::InvalidConfig(msg.to_string()));
        let max_ms = (MAX_DURATION_SECS * 1000.0) as u64;

        if self.latency_attempts == 0 {
            return invalid("latency_attempts must be at least 1");
        }
        if self.stream_count == 0 || self.stream_count > MAX_STREAMS {
            return invalid("stream_count must be between 1 and 64");
        }
        if !bounded_secs(self.duration_budget_secs) {
            return invalid("duration_budget_secs must be positive and at most one day");
        }
        if !bounded_secs(self.overall_timeout_secs) {
            return invalid("overall_timeout_secs must be positive and at most one day");
        }
        if self.probe_timeout_ms == 0 || self.probe_timeout_ms > max_ms {
            return invalid("probe_timeout_ms must be positive and at most one day");
        }
        if self.stream_cap_mb == 0 || self.stream_cap_mb.checked_mul(1_000_000).is_none() {
            return invalid("stream_cap_mb must be at least 1 and fit in a byte count");
        }
        if self.upload_chunk_kb == 0 || self.upload_chunk_kb > MAX_UPLOAD_CHUNK_KB {
            return invalid("upload_chunk_kb must be between 1 and 100000");
        }
        if self.progress_interval_ms == 0 || self.progress_interval_ms > max_ms {
            return invalid("progress_interval_ms must be positive and at most one day");
        }
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ericspeed").join("config.json"))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: MeasurementConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Reads the per-user config file, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load_default() -> Self {
        Self::default_path()
            .filter(|path| path.exists())
            .and_then(|path| match Self::load(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    log::warn!("Ignoring config at {}: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default()
    }
}

fn bounded_secs(secs: f64) -> bool {
    secs > 0.0 && secs <= MAX_DURATION_SECS && Duration::try_from_secs_f64(secs).is_ok()
}

/// Out-of-range values only reach here unvalidated; they saturate instead of panicking.
fn clamped_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DURATION_SECS)).unwrap_or_default()
}
