use super::catalog::EndpointCatalog;
use super::ping::LatencyProber;
use super::{Endpoint, LatencySample};
use crate::error::MeasurementError;
use futures::future::join_all;
use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;

/// Picks the catalog entry with the lowest latency.
pub struct ServerSelector<'a> {
    prober: &'a LatencyProber,
    attempts: usize,
}

impl<'a> ServerSelector<'a> {
    pub fn new(prober: &'a LatencyProber, attempts: usize) -> Self {
        Self { prober, attempts }
    }

    /// Probes every endpoint concurrently. Ties on latency go to the smaller
    /// advertised distance, then to the earlier catalog position.
    pub async fn select(
        &self,
        catalog: &EndpointCatalog,
        cancel: &CancellationToken,
    ) -> Result<(Endpoint, LatencySample), MeasurementError> {
        if cancel.is_cancelled() {
            return Err(MeasurementError::Cancelled);
        }

        let probes = catalog
            .iter()
            .map(|endpoint| self.prober.probe(endpoint, self.attempts, cancel));
        let outcomes = join_all(probes).await;

        if cancel.is_cancelled() {
            return Err(MeasurementError::Cancelled);
        }

        let mut reachable = Vec::new();
        for (endpoint, outcome) in catalog.iter().zip(outcomes) {
            match outcome {
                Ok(sample) => {
                    log::debug!(
                        "{} ({}): {:.1} ms",
                        endpoint.host,
                        endpoint.sponsor,
                        sample.rtt_ms
                    );
                    reachable.push((endpoint, sample));
                }
                Err(e) => log::warn!("skipping {}: {}", endpoint.host, e),
            }
        }

        // min_by keeps the first of equal elements, which preserves catalog order.
        let (endpoint, sample) = reachable
            .into_iter()
            .min_by(|(a, sa), (b, sb)| compare(a, sa, b, sb))
            .ok_or(MeasurementError::NoReachableEndpoint)?;

        log::info!(
            "selected {} ({}, {}) at {:.1} ms",
            endpoint.host,
            endpoint.sponsor,
            endpoint.country,
            sample.rtt_ms
        );
        Ok((endpoint.clone(), sample))
    }
}

fn compare(a: &Endpoint, sa: &LatencySample, b: &Endpoint, sb: &LatencySample) -> Ordering {
    sa.rtt_ms
        .total_cmp(&sb.rtt_ms)
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
}
