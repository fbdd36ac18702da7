use super::throughput::{StreamBudget, StreamEnd, StreamOutcome};
use super::transport::Transport;
use super::Endpoint;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::sleep_until;

/// One download stream: reads until the deadline, the byte cap, cancellation, or an
/// error. Only bytes actually received are counted.
pub(crate) async fn run_stream(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    budget: StreamBudget,
) -> StreamOutcome {
    let opened = tokio::select! {
        biased;
        _ = budget.cancel.cancelled() => return budget.finish(0, StreamEnd::Cancelled),
        _ = sleep_until(budget.deadline) => return budget.finish(0, StreamEnd::Deadline),
        opened = transport.download(&endpoint, budget.cap_bytes) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => return budget.finish(0, StreamEnd::Failed(e)),
    };

    let mut downloaded: u64 = 0;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = budget.cancel.cancelled() => {
                return budget.finish(downloaded, StreamEnd::Cancelled);
            }
            _ = sleep_until(budget.deadline) => {
                return budget.finish(downloaded, StreamEnd::Deadline);
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(len)) => {
                downloaded += len as u64;
                budget.record(len as u64);
                if downloaded >= budget.cap_bytes {
                    return budget.finish(downloaded, StreamEnd::CapReached);
                }
            }
            Some(Err(e)) => return budget.finish(downloaded, StreamEnd::Failed(e)),
            None => return budget.finish(downloaded, StreamEnd::Exhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::{endpoint, FakeTransport, StreamScript};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn budget(cap_bytes: u64, within: Duration) -> StreamBudget {
        StreamBudget {
            index: 0,
            deadline: Instant::now() + within,
            cap_bytes,
            cancel: CancellationToken::new(),
            moved: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_cap() {
        let fake = FakeTransport::new()
            .with_download(StreamScript::steady(400, Duration::from_millis(10)));
        let budget = budget(1_000, Duration::from_secs(5));
        let moved = budget.moved.clone();

        let outcome = run_stream(Arc::new(fake), endpoint(1), budget).await;

        assert!(matches!(outcome.end, StreamEnd::CapReached));
        assert_eq!(outcome.bytes, 1_200);
        assert_eq!(moved.load(Ordering::Relaxed), 1_200);
    }

    #[tokio::test(start_paused = true)]
    async fn short_server_response_is_exhausted() {
        let script = StreamScript::steady(100, Duration::from_millis(10)).with_total_chunks(3);
        let fake = FakeTransport::new().with_download(script);

        let budget = budget(10_000, Duration::from_secs(5));
        let outcome = run_stream(Arc::new(fake), endpoint(1), budget).await;

        assert!(matches!(outcome.end, StreamEnd::Exhausted));
        assert_eq!(outcome.bytes, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_moves_nothing() {
        let fake = FakeTransport::new()
            .with_download(StreamScript::steady(100, Duration::from_millis(10)).failing_opens(1));

        let budget = budget(10_000, Duration::from_secs(5));
        let outcome = run_stream(Arc::new(fake), endpoint(1), budget).await;

        assert!(matches!(outcome.end, StreamEnd::Failed(_)));
        assert_eq!(outcome.bytes, 0);
    }
}
