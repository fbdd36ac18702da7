use super::throughput::{StreamBudget, StreamEnd, StreamOutcome};
use super::transport::Transport;
use super::Endpoint;
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::sleep_until;

/// One upload stream: posts `payload`-sized bodies back to back. A body only counts
/// once the server has acknowledged it; an in-flight body at the deadline is lost.
pub(crate) async fn run_stream(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    payload: Bytes,
    budget: StreamBudget,
) -> StreamOutcome {
    let mut uploaded: u64 = 0;

    while uploaded < budget.cap_bytes {
        let remaining = (budget.cap_bytes - uploaded).min(payload.len() as u64) as usize;
        let body = payload.slice(..remaining);

        let sent = tokio::select! {
            biased;
            _ = budget.cancel.cancelled() => return budget.finish(uploaded, StreamEnd::Cancelled),
            _ = sleep_until(budget.deadline) => return budget.finish(uploaded, StreamEnd::Deadline),
            sent = transport.upload(&endpoint, body) => sent,
        };

        match sent {
            Ok(acked) => {
                uploaded += acked;
                budget.record(acked);
            }
            Err(e) => return budget.finish(uploaded, StreamEnd::Failed(e)),
        }
    }

    budget.finish(uploaded, StreamEnd::CapReached)
}
