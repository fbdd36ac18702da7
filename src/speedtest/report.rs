use super::{ClientInfo, MeasurementResult};
use chrono::SecondsFormat;
use serde::Serialize;

/// Flat, render-ready view of a [`MeasurementResult`] for gauges, tables and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementReport {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub client: ClientInfo,
    pub server: ServerReport,
    /// ISO-8601, UTC.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerReport {
    pub host: String,
    pub sponsor: String,
    pub country: String,
    pub latency_ms: f64,
}

impl From<&MeasurementResult> for MeasurementReport {
    fn from(result: &MeasurementResult) -> Self {
        Self {
            download_mbps: result.download_mbps,
            upload_mbps: result.upload_mbps,
            ping_ms: result.ping_ms,
            jitter_ms: result.jitter_ms,
            client: result.client.clone(),
            server: ServerReport {
                host: result.server.host.clone(),
                sponsor: result.server.sponsor.clone(),
                country: result.server.country.clone(),
                latency_ms: result.server_latency_ms,
            },
            timestamp: result
                .completed_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
