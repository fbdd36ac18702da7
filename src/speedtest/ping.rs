use super::transport::Transport;
use super::{emit, Endpoint, LatencySample, ProgressEvent, ProgressTx};
use crate::error::MeasurementError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

const ATTEMPT_GAP: Duration = Duration::from_millis(50);

/// Measures round-trip time to a single endpoint.
pub struct LatencyProber {
    transport: Arc<dyn Transport>,
    attempt_timeout: Duration,
    progress: ProgressTx,
}

impl LatencyProber {
    pub fn new(transport: Arc<dyn Transport>, attempt_timeout: Duration) -> Self {
        Self {
            transport,
            attempt_timeout,
            progress: None,
        }
    }

    pub(crate) fn with_progress(mut self, progress: ProgressTx) -> Self {
        self.progress = progress;
        self
    }

    /// Sends `attempts` sequential round trips and reports the fastest one. Failed
    /// or timed-out attempts are dropped; if none succeed the endpoint is
    /// unreachable.
    pub async fn probe(
        &self,
        endpoint: &Endpoint,
        attempts: usize,
        cancel: &CancellationToken,
    ) -> Result<LatencySample, MeasurementError> {
        let mut samples: Vec<f64> = Vec::with_capacity(attempts);

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(ATTEMPT_GAP) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(MeasurementError::Cancelled);
            }

            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MeasurementError::Cancelled),
                outcome = timeout(self.attempt_timeout, self.transport.ping(endpoint)) => outcome,
            };

            match outcome {
                Ok(Ok(())) => {
                    let rtt_ms = start.elapsed().as_secs_f64() * 1000.0;
                    samples.push(rtt_ms);
                    emit(
                        &self.progress,
                        ProgressEvent::Latency {
                            endpoint_id: endpoint.id,
                            rtt_ms,
                        },
                    );
                }
                Ok(Err(e)) => log::debug!("ping {} attempt {}: {}", endpoint.host, attempt + 1, e),
                Err(_) => log::debug!("ping {} attempt {}: timed out", endpoint.host, attempt + 1),
            }
        }

        summarize(endpoint.id, &samples).ok_or(MeasurementError::EndpointUnreachable {
            endpoint_id: endpoint.id,
        })
    }
}

fn summarize(endpoint_id: u32, samples: &[f64]) -> Option<LatencySample> {
    let min = samples.iter().copied().min_by(f64::total_cmp)?;

    Some(LatencySample {
        endpoint_id,
        rtt_ms: min,
        jitter_ms: jitter(samples),
        successful_attempts: samples.len(),
        timestamp: Utc::now(),
    })
}

/// Sample standard deviation of the round trips.
fn jitter(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let avg = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance: f64 =
        samples.iter().map(|&x| (x - avg).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::{endpoint, FakeTransport, PingScript};

    fn prober(fake: FakeTransport) -> LatencyProber {
        LatencyProber::new(Arc::new(fake), Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn reports_minimum_of_successful_attempts() {
        let fake = FakeTransport::new().with_ping(1, PingScript::Sequence(&[40, 12, 25]));

        let sample = prober(fake)
            .probe(&endpoint(1), 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sample.endpoint_id, 1);
        assert_eq!(sample.successful_attempts, 3);
        assert!((sample.rtt_ms - 12.0).abs() < 1e-9);
        assert!(sample.jitter_ms > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let fake = FakeTransport::new().with_ping(1, PingScript::Rtt(Duration::from_secs(2)));

        let err = prober(fake)
            .probe(&endpoint(1), 3, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, MeasurementError::EndpointUnreachable { endpoint_id: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn all_failed_attempts_is_unreachable() {
        let fake =
            FakeTransport::new().with_ping(4, PingScript::Unreachable(Duration::from_millis(5)));

        let err = prober(fake)
            .probe(&endpoint(4), 2, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, MeasurementError::EndpointUnreachable { endpoint_id: 4 });
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt_sends_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fake = FakeTransport::new().with_ping(1, PingScript::Rtt(Duration::from_millis(1)));

        let err = prober(fake).probe(&endpoint(1), 3, &cancel).await.unwrap_err();
        assert_eq!(err, MeasurementError::Cancelled);
    }

    #[test]
    fn jitter_of_single_sample_is_zero() {
        assert_eq!(jitter(&[10.0]), 0.0);
        assert!((jitter(&[10.0, 20.0]) - 7.0710678).abs() < 1e-6);
    }
}
