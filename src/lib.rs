//! Internet speed test engine.
//!
//! Picks the lowest-latency server from a catalog, measures latency, then download
//! and upload throughput over concurrent streams, and keeps the latest result in a
//! process-wide store that front ends can poll.

pub mod error;
pub mod settings;
pub mod speedtest;

pub use error::MeasurementError;
pub use settings::MeasurementConfig;
pub use speedtest::catalog::EndpointCatalog;
pub use speedtest::engine::{RunOutcome, SpeedTestEngine};
pub use speedtest::report::{MeasurementReport, ServerReport};
pub use speedtest::store::ResultStore;
pub use speedtest::transport::{ChunkStream, HttpTransport, Transport};
pub use speedtest::{
    ClientInfo, Direction, Endpoint, LatencySample, MeasurementResult, MeasurementStatus,
    ProgressEvent, ThroughputSample,
};
