pub mod catalog;
pub mod download;
pub mod engine;
pub mod orchestrator;
pub mod ping;
pub mod report;
pub mod selector;
pub mod store;
pub mod throughput;
pub mod transport;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::MeasurementError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A candidate measurement server. Immutable once loaded into a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u32,
    /// Base URL of the server, e.g. `https://speed.cloudflare.com`.
    pub host: String,
    pub sponsor: String,
    pub country: String,
    /// Advertised distance from the client, used only to break latency ties.
    #[serde(default)]
    pub distance_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => f.write_str("download"),
            Direction::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub endpoint_id: u32,
    /// Minimum round trip over the successful attempts.
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub successful_attempts: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputSample {
    pub direction: Direction,
    pub bytes: u64,
    /// Wall-clock time until the slowest stream finished.
    pub elapsed: Duration,
    pub bits_per_second: f64,
}

impl ThroughputSample {
    /// Builds a sample from an aggregate byte count. A zero window yields a zero rate.
    pub fn new(direction: Direction, bytes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let bits_per_second = if secs > 0.0 {
            (bytes as f64 * 8.0) / secs
        } else {
            0.0
        };
        Self {
            direction,
            bytes,
            elapsed,
            bits_per_second,
        }
    }

    pub fn mbps(&self) -> f64 {
        self.bits_per_second / 1_000_000.0
    }
}

/// What the selected endpoint reports about the client. Every field is optional
/// because the lookup is best effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub isp: Option<String>,
    pub country: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// The terminal artifact of a successful run. Only built once every stage succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub server: Endpoint,
    /// Latency observed while selecting the server.
    pub server_latency_ms: f64,
    pub client: ClientInfo,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementStatus {
    Idle,
    Selecting,
    ProbingLatency,
    ProbingDownload,
    ProbingUpload,
    Complete,
    Failed(MeasurementError),
}

impl MeasurementStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            MeasurementStatus::Selecting
                | MeasurementStatus::ProbingLatency
                | MeasurementStatus::ProbingDownload
                | MeasurementStatus::ProbingUpload
        )
    }
}

impl fmt::Display for MeasurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementStatus::Idle => f.write_str("idle"),
            MeasurementStatus::Selecting => f.write_str("selecting server"),
            MeasurementStatus::ProbingLatency => f.write_str("measuring latency"),
            MeasurementStatus::ProbingDownload => f.write_str("measuring download"),
            MeasurementStatus::ProbingUpload => f.write_str("measuring upload"),
            MeasurementStatus::Complete => f.write_str("complete"),
            MeasurementStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Live updates for a renderer. Dropped rather than queued when the receiver lags.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Status(MeasurementStatus),
    Latency { endpoint_id: u32, rtt_ms: f64 },
    Throughput {
        direction: Direction,
        bytes: u64,
        mbps: f64,
    },
}

pub(crate) type ProgressTx = Option<tokio::sync::mpsc::Sender<ProgressEvent>>;

pub(crate) fn emit(progress: &ProgressTx, event: ProgressEvent) {
    if let Some(tx) = progress {
        let _ = tx.try_send(event);
    }
}
