use super::catalog::EndpointCatalog;
use super::ping::LatencyProber;
use super::selector::ServerSelector;
use super::store::RunGuard;
use super::throughput::ThroughputProber;
use super::transport::Transport;
use super::{
    emit, ClientInfo, Direction, Endpoint, MeasurementResult, MeasurementStatus, ProgressEvent,
    ProgressTx,
};
use crate::error::MeasurementError;
use crate::settings::MeasurementConfig;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Runs selection, latency, download and upload strictly one after another and
/// publishes the result only if all of them succeed.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    config: MeasurementConfig,
    progress: ProgressTx,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: MeasurementConfig) -> Self {
        Self {
            transport,
            config,
            progress: None,
        }
    }

    pub(crate) fn with_progress(mut self, progress: ProgressTx) -> Self {
        self.progress = progress;
        self
    }

    /// Runs one measurement under the overall timeout. `guard` is the store's run
    /// slot; it is released when this returns.
    pub async fn run(
        &self,
        catalog: &EndpointCatalog,
        guard: RunGuard,
        cancel: &CancellationToken,
    ) -> Result<Arc<MeasurementResult>, MeasurementError> {
        let stages_cancel = cancel.child_token();
        let outcome = match self.config.validate() {
            Err(e) => Err(e),
            Ok(()) => match timeout(
                self.config.overall_timeout(),
                self.stages(catalog, &guard, &stages_cancel),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    stages_cancel.cancel();
                    Err(MeasurementError::Timeout)
                }
            },
        };

        match outcome {
            Ok(result) => {
                let result = guard.publish(result);
                log::info!(
                    "measurement complete: down {:.2} Mbps, up {:.2} Mbps, ping {:.1} ms",
                    result.download_mbps,
                    result.upload_mbps,
                    result.ping_ms
                );
                emit(&self.progress, ProgressEvent::Status(MeasurementStatus::Complete));
                Ok(result)
            }
            Err(e) => {
                log::error!("measurement failed: {}", e);
                guard.fail(e.clone());
                emit(
                    &self.progress,
                    ProgressEvent::Status(MeasurementStatus::Failed(e.clone())),
                );
                Err(e)
            }
        }
    }

    async fn stages(
        &self,
        catalog: &EndpointCatalog,
        guard: &RunGuard,
        cancel: &CancellationToken,
    ) -> Result<MeasurementResult, MeasurementError> {
        let config = &self.config;
        let latency = LatencyProber::new(self.transport.clone(), config.probe_timeout())
            .with_progress(self.progress.clone());
        let throughput = ThroughputProber::new(
            self.transport.clone(),
            config.stream_cap_bytes(),
            config.upload_chunk_bytes(),
            config.progress_interval(),
        )
        .with_progress(self.progress.clone());

        self.enter(guard, MeasurementStatus::Selecting, cancel)?;
        let (server, selection) = ServerSelector::new(&latency, config.latency_attempts)
            .select(catalog, cancel)
            .await?;

        self.enter(guard, MeasurementStatus::ProbingLatency, cancel)?;
        let ping = latency
            .probe(&server, config.latency_attempts, cancel)
            .await?;
        let client = self.client_info(&server, cancel).await?;

        self.enter(guard, MeasurementStatus::ProbingDownload, cancel)?;
        let download = throughput
            .measure(
                &server,
                Direction::Download,
                config.duration_budget(),
                config.stream_count,
                cancel,
            )
            .await?;

        self.enter(guard, MeasurementStatus::ProbingUpload, cancel)?;
        let upload = throughput
            .measure(
                &server,
                Direction::Upload,
                config.duration_budget(),
                config.stream_count,
                cancel,
            )
            .await?;

        Ok(MeasurementResult {
            download_mbps: download.mbps(),
            upload_mbps: upload.mbps(),
            ping_ms: ping.rtt_ms,
            jitter_ms: ping.jitter_ms,
            server,
            server_latency_ms: selection.rtt_ms,
            client,
            completed_at: Utc::now(),
        })
    }

    fn enter(
        &self,
        guard: &RunGuard,
        status: MeasurementStatus,
        cancel: &CancellationToken,
    ) -> Result<(), MeasurementError> {
        if cancel.is_cancelled() {
            return Err(MeasurementError::Cancelled);
        }
        log::info!("{}", status);
        guard.set_status(status.clone());
        emit(&self.progress, ProgressEvent::Status(status));
        Ok(())
    }

    /// Best effort: a failed lookup leaves the client fields empty.
    async fn client_info(
        &self,
        server: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<ClientInfo, MeasurementError> {
        let lookup = self.transport.client_info(server);
        let lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MeasurementError::Cancelled),
            lookup = timeout(self.config.probe_timeout(), lookup) => lookup,
        };

        match lookup {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => {
                log::warn!("client lookup via {} failed: {}", server.host, e);
                Ok(ClientInfo::default())
            }
            Err(_) => {
                log::warn!("client lookup via {} timed out", server.host);
                Ok(ClientInfo::default())
            }
        }
    }
}
