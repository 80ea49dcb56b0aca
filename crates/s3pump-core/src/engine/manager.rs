//! Transfer manager - entry point for running transfer jobs
//!
//! Owns the store, the validated configuration and the event channel, and
//! times each job.

use crate::engine::context::JobContext;
use crate::engine::retry::RetryPolicy;
use crate::engine::{DownloadTask, UploadTask};
use crate::error::TransferError;
use crate::store::ObjectStore;
use chrono::Utc;
use s3pump_types::{
    ObjectLocation, TransferConfig, TransferDirection, TransferEvent, TransferOutcome, MAX_WORKERS,
    MIN_WORKERS,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::info;

/// Runs downloads and uploads against one store
pub struct TransferManager {
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    event_tx: broadcast::Sender<TransferEvent>,
}

impl TransferManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Result<Self, TransferError> {
        validate_config(&config)?;
        let (event_tx, _) = broadcast::channel(1000);
        Ok(Self {
            store,
            config,
            event_tx,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Subscribe to job events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    /// Download `location` into the file at `destination`
    pub async fn download(
        &self,
        location: &ObjectLocation,
        destination: &Path,
    ) -> Result<TransferOutcome, TransferError> {
        let started_at = Utc::now();
        let stopwatch = Instant::now();

        let task = DownloadTask::new(
            self.job_context(location),
            destination.to_path_buf(),
            self.config.part_size,
            self.config.workers,
            self.config.shutdown_grace,
        );
        let summary = task.run().await?;

        let outcome = TransferOutcome {
            direction: TransferDirection::Download,
            location: location.clone(),
            bytes: summary.bytes,
            parts: summary.parts,
            started_at,
            elapsed: stopwatch.elapsed(),
        };
        info!("Downloaded {} bytes in {:?}", outcome.bytes, outcome.elapsed);
        Ok(outcome)
    }

    /// Upload the file at `source` to `location` as a multipart upload
    pub async fn upload(
        &self,
        source: &Path,
        location: &ObjectLocation,
        encrypt: bool,
    ) -> Result<TransferOutcome, TransferError> {
        let started_at = Utc::now();
        let stopwatch = Instant::now();

        let task = UploadTask::new(
            self.job_context(location),
            source.to_path_buf(),
            encrypt,
            self.config.part_size,
            self.config.workers,
            self.config.shutdown_grace,
        );
        let summary = task.run().await?;

        let outcome = TransferOutcome {
            direction: TransferDirection::Upload,
            location: location.clone(),
            bytes: summary.bytes,
            parts: summary.parts,
            started_at,
            elapsed: stopwatch.elapsed(),
        };
        info!("Uploaded {} bytes in {:?}", outcome.bytes, outcome.elapsed);
        Ok(outcome)
    }

    fn job_context(&self, location: &ObjectLocation) -> JobContext {
        JobContext::new(
            self.store.clone(),
            location.clone(),
            RetryPolicy::from_config(&self.config),
            self.event_tx.clone(),
        )
    }
}

/// Reject settings the engine cannot run with
pub fn validate_config(config: &TransferConfig) -> Result<(), TransferError> {
    if !(MIN_WORKERS..=MAX_WORKERS).contains(&config.workers) {
        return Err(TransferError::InvalidConfig(format!(
            "worker count {} is outside {}..={}",
            config.workers, MIN_WORKERS, MAX_WORKERS
        )));
    }
    if config.retry_count == 0 {
        return Err(TransferError::InvalidConfig(
            "retry count must be at least 1".into(),
        ));
    }
    if config.part_size == 0 {
        return Err(TransferError::InvalidConfig("part size must be positive".into()));
    }
    if config.timeout.is_zero() {
        return Err(TransferError::InvalidConfig("timeout must be positive".into()));
    }
    Ok(())
}
