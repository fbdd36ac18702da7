use super::catalog::EndpointCatalog;
use super::orchestrator::Orchestrator;
use super::report::MeasurementReport;
use super::store::ResultStore;
use super::transport::{HttpTransport, Transport};
use super::{MeasurementResult, MeasurementStatus, ProgressEvent};
use crate::error::MeasurementError;
use crate::settings::MeasurementConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type RunOutcome = Result<Arc<MeasurementResult>, MeasurementError>;

struct ActiveRun {
    cancel: CancellationToken,
    /// Cancelled when the run task ends, however it ends.
    done: CancellationToken,
    /// Taken by the first `wait` to see the run end.
    handle: Option<JoinHandle<RunOutcome>>,
}

/// Entry point for front ends: start a run in the background, then poll status and
/// result as often as needed.
pub struct SpeedTestEngine {
    transport: Arc<dyn Transport>,
    catalog: EndpointCatalog,
    store: Arc<ResultStore>,
    active: Mutex<Option<ActiveRun>>,
}

impl SpeedTestEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        catalog: EndpointCatalog,
        store: Arc<ResultStore>,
    ) -> Self {
        Self {
            transport,
            catalog,
            store,
            active: Mutex::new(None),
        }
    }

    /// HTTP transport over the process-wide store.
    pub fn http(catalog: EndpointCatalog) -> anyhow::Result<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::new(Arc::new(transport), catalog, ResultStore::global()))
    }

    pub fn start_measurement(&self, config: MeasurementConfig) -> Result<(), MeasurementError> {
        self.start(config, None)
    }

    pub fn start_measurement_with_progress(
        &self,
        config: MeasurementConfig,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Result<(), MeasurementError> {
        self.start(config, Some(progress))
    }

    /// Must be called from within a tokio runtime.
    fn start(
        &self,
        config: MeasurementConfig,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<(), MeasurementError> {
        config.validate()?;

        // Held until the new run is recorded, so a run that finishes instantly can
        // never be overwritten by an older one.
        let mut active = self.active.lock();
        let guard = self.store.begin()?;

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let orchestrator =
            Orchestrator::new(self.transport.clone(), config).with_progress(progress);
        let catalog = self.catalog.clone();
        let token = cancel.clone();
        let finished = done.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _finished = finished;
            orchestrator.run(&catalog, guard, &token).await
        });

        *active = Some(ActiveRun {
            cancel,
            done,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Requests cancellation of the active run, if any. Returns whether one was active.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(run) if !run.done.is_cancelled() => {
                run.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Waits for the most recently started run. `None` if there is nothing to wait for
    /// or another caller already collected its outcome.
    ///
    /// The run stays cancellable while this is pending, and dropping the future
    /// leaves the outcome for the next caller.
    pub async fn wait(&self) -> Option<RunOutcome> {
        let done = self.active.lock().as_ref()?.done.clone();
        done.cancelled().await;

        let handle = self.active.lock().as_mut()?.handle.take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!("measurement task ended abnormally: {}", e);
                Some(Err(MeasurementError::Cancelled))
            }
        }
    }

    pub fn query_status(&self) -> MeasurementStatus {
        self.store.status()
    }

    pub fn query_result(&self) -> Option<Arc<MeasurementResult>> {
        self.store.current()
    }

    pub fn report(&self) -> Option<MeasurementReport> {
        self.query_result().map(|result| MeasurementReport::from(result.as_ref()))
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }
}
