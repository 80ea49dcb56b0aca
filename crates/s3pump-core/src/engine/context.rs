//! Context shared by the coordinator and the workers of one job

use crate::engine::retry::RetryPolicy;
use crate::engine::shared::ErrorCell;
use crate::error::TransferError;
use crate::store::ObjectStore;
use parking_lot::Mutex;
use s3pump_types::{ObjectLocation, PartDescriptor, TransferEvent, TransferState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct JobContext {
    pub store: Arc<dyn ObjectStore>,
    pub location: ObjectLocation,
    pub policy: RetryPolicy,
    /// Broadcast to every worker once the job has failed
    pub cancel: CancellationToken,
    pub errors: ErrorCell,
    pub transferred: Arc<AtomicU64>,
    pub events: broadcast::Sender<TransferEvent>,
    state: Mutex<TransferState>,
}

impl JobContext {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        location: ObjectLocation,
        policy: RetryPolicy,
        events: broadcast::Sender<TransferEvent>,
    ) -> Self {
        Self {
            store,
            location,
            policy,
            cancel: CancellationToken::new(),
            errors: ErrorCell::new(),
            transferred: Arc::new(AtomicU64::new(0)),
            events,
            state: Mutex::new(TransferState::Partitioning),
        }
    }

    pub fn transition(&self, state: TransferState) {
        let mut current = self.state.lock();
        if current.is_terminal() || *current == state {
            return;
        }
        info!("Transfer {} {:?} -> {:?}", self.location, *current, state);
        *current = state;
        drop(current);
        let _ = self.events.send(TransferEvent::StateChanged { state });
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Record a finished part
    pub fn part_done(&self, part: &PartDescriptor) {
        self.transferred.fetch_add(part.length, Ordering::AcqRel);
        debug!("Part {} complete ({} bytes)", part.index, part.length);
        let _ = self.events.send(TransferEvent::PartCompleted {
            index: part.index,
            bytes: part.length,
        });
    }

    /// Record a fatal worker error and tell every other worker to stop.
    /// Only the first error is kept.
    pub fn fail(&self, error: TransferError) {
        if matches!(error, TransferError::Cancelled) {
            return;
        }
        self.errors.set(error);
        self.cancel.cancel();
    }

    /// Wait for every worker. Once the job has failed, remaining workers get
    /// `grace` to stop at their next checkpoint before they are aborted.
    pub async fn join_workers(&self, workers: &mut JoinSet<Result<(), TransferError>>, grace: Duration) {
        while !self.cancel.is_cancelled() {
            match workers.join_next().await {
                Some(result) => self.record_exit(result),
                None => return,
            }
        }

        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = workers.join_next().await {
                self.record_exit(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} worker(s) still running {:?} after failure, aborting them",
                workers.len(),
                grace
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
    }

    fn record_exit(&self, result: Result<Result<(), TransferError>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(e),
            Err(e) if e.is_cancelled() => {}
            Err(e) => self.fail(TransferError::WorkerPanicked(e.to_string())),
        }
    }
}
