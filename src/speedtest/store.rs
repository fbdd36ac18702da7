use super::{MeasurementResult, MeasurementStatus};
use crate::error::MeasurementError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static GLOBAL_STORE: OnceLock<Arc<ResultStore>> = OnceLock::new();

struct Snapshot {
    status: MeasurementStatus,
    result: Option<Arc<MeasurementResult>>,
}

/// Latest measurement outcome and status, shared between the single running
/// measurement and any number of readers.
///
/// The previous result stays visible while a new run is in flight and is only
/// replaced when that run completes.
pub struct ResultStore {
    snapshot: RwLock<Snapshot>,
    running: AtomicBool,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Snapshot {
                status: MeasurementStatus::Idle,
                result: None,
            }),
            running: AtomicBool::new(false),
        }
    }

    /// The process-wide store, created empty on first use.
    pub fn global() -> Arc<ResultStore> {
        GLOBAL_STORE.get_or_init(|| Arc::new(ResultStore::new())).clone()
    }

    /// Claims the single run slot. The slot is released when the guard drops.
    pub fn begin(self: &Arc<Self>) -> Result<RunGuard, MeasurementError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MeasurementError::MeasurementInProgress);
        }
        self.snapshot.write().status = MeasurementStatus::Selecting;
        Ok(RunGuard {
            store: self.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> MeasurementStatus {
        self.snapshot.read().status.clone()
    }

    pub fn current(&self) -> Option<Arc<MeasurementResult>> {
        self.snapshot.read().result.clone()
    }

    /// Drops the stored result and returns to `Idle`. Refused while a run is active.
    pub fn clear(&self) -> Result<(), MeasurementError> {
        if self.is_running() {
            return Err(MeasurementError::MeasurementInProgress);
        }
        let mut snapshot = self.snapshot.write();
        snapshot.status = MeasurementStatus::Idle;
        snapshot.result = None;
        Ok(())
    }
}

/// Write access for the run holding the slot.
pub struct RunGuard {
    store: Arc<ResultStore>,
}

impl RunGuard {
    pub fn set_status(&self, status: MeasurementStatus) {
        self.store.snapshot.write().status = status;
    }

    /// Replaces the result and marks the run complete in one step.
    pub fn publish(&self, result: MeasurementResult) -> Arc<MeasurementResult> {
        let result = Arc::new(result);
        let mut snapshot = self.store.snapshot.write();
        snapshot.result = Some(result.clone());
        snapshot.status = MeasurementStatus::Complete;
        result
    }

    pub fn fail(&self, reason: MeasurementError) {
        self.set_status(MeasurementStatus::Failed(reason));
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        // A run that ends without publishing or failing was abandoned mid-flight.
        {
            let mut snapshot = self.store.snapshot.write();
            if snapshot.status.is_running() {
                snapshot.status = MeasurementStatus::Failed(MeasurementError::Cancelled);
            }
        }
        self.store.running.store(false, Ordering::Release);
    }
}
