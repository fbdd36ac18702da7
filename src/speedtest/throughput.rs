use super::transport::Transport;
use super::{
    download, emit, upload, Direction, Endpoint, ProgressEvent, ProgressTx, ThroughputSample,
};
use crate::error::MeasurementError;
use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Limits shared by every stream of one throughput measurement.
#[derive(Clone)]
pub(crate) struct StreamBudget {
    pub index: usize,
    pub deadline: Instant,
    pub cap_bytes: u64,
    pub cancel: CancellationToken,
    /// Bytes moved by all streams so far, for progress sampling.
    pub moved: Arc<AtomicU64>,
}

impl StreamBudget {
    pub fn record(&self, bytes: u64) {
        self.moved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn finish(&self, bytes: u64, end: StreamEnd) -> StreamOutcome {
        StreamOutcome {
            index: self.index,
            bytes,
            finished_at: Instant::now(),
            end,
        }
    }
}

#[derive(Debug)]
pub(crate) enum StreamEnd {
    Deadline,
    CapReached,
    /// The server closed the transfer before the cap.
    Exhausted,
    Cancelled,
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub(crate) struct StreamOutcome {
    pub index: usize,
    pub bytes: u64,
    pub finished_at: Instant,
    pub end: StreamEnd,
}

/// Runs concurrent transfer streams against one endpoint and aggregates them
/// into a single rate.
pub struct ThroughputProber {
    transport: Arc<dyn Transport>,
    cap_bytes: u64,
    chunk_bytes: usize,
    progress_interval: Duration,
    progress: ProgressTx,
}

impl ThroughputProber {
    pub fn new(
        transport: Arc<dyn Transport>,
        cap_bytes: u64,
        chunk_bytes: usize,
        progress_interval: Duration,
    ) -> Self {
        Self {
            transport,
            cap_bytes,
            chunk_bytes,
            progress_interval,
            progress: None,
        }
    }

    pub(crate) fn with_progress(mut self, progress: ProgressTx) -> Self {
        self.progress = progress;
        self
    }

    /// Measures one direction. The rate is total bytes over the time the slowest
    /// stream took, so concurrent streams are not double counted.
    pub async fn measure(
        &self,
        endpoint: &Endpoint,
        direction: Direction,
        duration_budget: Duration,
        stream_count: usize,
        cancel: &CancellationToken,
    ) -> Result<ThroughputSample, MeasurementError> {
        if cancel.is_cancelled() {
            return Err(MeasurementError::Cancelled);
        }

        let start = Instant::now();
        let moved = Arc::new(AtomicU64::new(0));
        let payload = match direction {
            Direction::Upload => Some(random_payload(self.chunk_bytes)),
            Direction::Download => None,
        };

        let mut streams = JoinSet::new();
        for index in 0..stream_count {
            let budget = StreamBudget {
                index,
                deadline: start + duration_budget,
                cap_bytes: self.cap_bytes,
                cancel: cancel.clone(),
                moved: moved.clone(),
            };
            let transport = self.transport.clone();
            let endpoint = endpoint.clone();
            match &payload {
                Some(payload) => {
                    let payload = payload.clone();
                    streams.spawn(async move {
                        upload::run_stream(transport, endpoint, payload, budget).await
                    });
                }
                None => {
                    streams.spawn(async move {
                        download::run_stream(transport, endpoint, budget).await
                    });
                }
            }
        }

        let mut ticker = interval(self.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut outcomes = Vec::with_capacity(stream_count);
        let mut last_moved = 0u64;
        let mut last_tick = start;

        loop {
            tokio::select! {
                joined = streams.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        log_outcome(direction, &outcome);
                        outcomes.push(outcome);
                    }
                    // A panicked stream contributes nothing.
                    Some(Err(e)) => log::warn!("{} stream task aborted: {}", direction, e),
                    None => break,
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let total = moved.load(Ordering::Relaxed);
                    let window = now.duration_since(last_tick).as_secs_f64();
                    if window > 0.0 {
                        let mbps = ((total - last_moved) as f64 * 8.0) / window / 1_000_000.0;
                        let event = ProgressEvent::Throughput {
                            direction,
                            bytes: total,
                            mbps,
                        };
                        emit(&self.progress, event);
                    }
                    last_moved = total;
                    last_tick = now;
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(MeasurementError::Cancelled);
        }

        aggregate(direction, start, &outcomes)
    }
}

fn aggregate(
    direction: Direction,
    start: Instant,
    outcomes: &[StreamOutcome],
) -> Result<ThroughputSample, MeasurementError> {
    let total: u64 = outcomes.iter().map(|o| o.bytes).sum();
    let slowest = outcomes
        .iter()
        .filter(|o| o.bytes > 0)
        .map(|o| o.finished_at)
        .max();

    let Some(slowest) = slowest else {
        log::error!("{}: no stream transferred any data", direction);
        return Err(MeasurementError::TransferFailed { direction });
    };

    let sample = ThroughputSample::new(direction, total, slowest.duration_since(start));
    log::info!(
        "{}: {} bytes in {:.2}s over {} streams = {:.2} Mbps",
        direction,
        sample.bytes,
        sample.elapsed.as_secs_f64(),
        outcomes.len(),
        sample.mbps()
    );
    Ok(sample)
}

fn log_outcome(direction: Direction, outcome: &StreamOutcome) {
    match &outcome.end {
        StreamEnd::Failed(e) => log::debug!(
            "{} stream {} failed after {} bytes: {}",
            direction,
            outcome.index,
            outcome.bytes,
            e
        ),
        end => log::debug!(
            "{} stream {} stopped ({:?}) after {} bytes",
            direction,
            outcome.index,
            end,
            outcome.bytes
        ),
    }
}

fn random_payload(size: usize) -> Bytes {
    let mut rng = rand::rngs::StdRng::from_entropy();
    let mut data = vec![0u8; size];
    rng.fill_bytes(&mut data);
    Bytes::from(data)
}
