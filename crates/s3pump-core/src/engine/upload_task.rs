//! Upload task - coordinates the multipart-upload workers of one upload
//!
//! All parts go into one shared queue and a fixed set of workers pull from it
//! until it is empty. Part tokens are collected in completion order and sorted
//! by part index before the completion call. If any part fails for good, or
//! completion itself fails, the multipart upload is aborted so nothing is left
//! behind on the store.

use crate::engine::context::JobContext;
use crate::engine::download_task::JobSummary;
use crate::engine::files::SourceFile;
use crate::engine::partitioner::partition;
use crate::engine::progress::ProgressReporter;
use crate::engine::retry::{part_failure, with_retry};
use crate::engine::shared::{ResultCollector, WorkQueue};
use crate::error::TransferError;
use s3pump_types::{
    CompletedPart, PartDescriptor, TransferDirection, TransferEvent, TransferState, MAX_UPLOAD_PARTS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One upload from a local file into the store
pub struct UploadTask {
    ctx: Arc<JobContext>,
    source: PathBuf,
    encrypt: bool,
    part_size: u64,
    workers: usize,
    shutdown_grace: Duration,
}

impl UploadTask {
    pub(crate) fn new(
        ctx: JobContext,
        source: PathBuf,
        encrypt: bool,
        part_size: u64,
        workers: usize,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(ctx),
            source,
            encrypt,
            part_size,
            workers,
            shutdown_grace,
        }
    }

    /// Run the upload to completion or failure
    pub async fn run(self) -> Result<JobSummary, TransferError> {
        let ctx = self.ctx.clone();
        info!(
            "Starting upload of {:?} to {} with {} worker(s)",
            self.source, ctx.location, self.workers
        );

        let parts = match self.plan().await {
            Ok(parts) => parts,
            Err(e) => {
                ctx.transition(TransferState::Failed);
                return Err(e);
            }
        };
        let total_size: u64 = parts.iter().map(|p| p.length).sum();

        let upload_id = match ctx
            .store
            .create_multipart_upload(&ctx.location, self.encrypt)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                ctx.transition(TransferState::Failed);
                return Err(e.into());
            }
        };
        info!("Multipart upload {} started for {}", upload_id, ctx.location);

        ctx.transition(TransferState::Running);
        let _ = ctx.events.send(TransferEvent::Started {
            direction: TransferDirection::Upload,
            total_bytes: total_size,
            parts: parts.len(),
            workers: self.workers,
        });

        let reporter = ProgressReporter::spawn(ctx.transferred.clone(), total_size, ctx.events.clone());

        let expected_parts = parts.len();
        let queue = Arc::new(WorkQueue::new(parts));
        let results = Arc::new(ResultCollector::new());
        let upload_id: Arc<str> = Arc::from(upload_id);

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let ctx = ctx.clone();
            let queue = queue.clone();
            let results = results.clone();
            let upload_id = upload_id.clone();
            let source = self.source.clone();
            workers.spawn(async move {
                upload_worker(worker_id, ctx, source, upload_id, queue, results).await
            });
        }

        ctx.join_workers(&mut workers, self.shutdown_grace).await;
        reporter.stop().await;

        let failure = ctx.errors.take().or_else(|| {
            (results.len() != expected_parts).then(|| TransferError::MissingParts {
                uploaded: results.len(),
                expected: expected_parts,
            })
        });
        if let Some(e) = failure {
            error!("Upload to {} failed: {}", ctx.location, e);
            self.abort(&upload_id).await;
            ctx.transition(TransferState::Failed);
            return Err(e);
        }

        let completed = results.sorted();
        if let Err(source) = ctx
            .store
            .complete_multipart_upload(&ctx.location, &upload_id, &completed)
            .await
        {
            error!("Completing upload {} failed: {}", upload_id, source);
            self.abort(&upload_id).await;
            ctx.transition(TransferState::Failed);
            return Err(TransferError::Finalize {
                upload_id: upload_id.to_string(),
                source,
            });
        }

        ctx.transition(TransferState::Succeeded);
        info!(
            "Upload to {} complete ({} bytes in {} part(s))",
            ctx.location, total_size, expected_parts
        );
        Ok(JobSummary {
            bytes: ctx.transferred(),
            parts: expected_parts,
        })
    }

    /// Parts of the source file. An empty file still needs one (empty) part,
    /// otherwise the multipart upload cannot be completed.
    async fn plan(&self) -> Result<Vec<PartDescriptor>, TransferError> {
        let size = tokio::fs::metadata(&self.source).await?.len();
        let mut parts = partition(size, self.part_size)?;
        if parts.len() > MAX_UPLOAD_PARTS as usize {
            return Err(TransferError::Partition(format!(
                "{} bytes in parts of {} bytes needs {} parts, more than the {} a multipart upload allows",
                size,
                self.part_size,
                parts.len(),
                MAX_UPLOAD_PARTS
            )));
        }
        if parts.is_empty() {
            parts.push(PartDescriptor::new(0, 0, 0));
        }
        Ok(parts)
    }

    async fn abort(&self, upload_id: &str) {
        match self
            .ctx
            .store
            .abort_multipart_upload(&self.ctx.location, upload_id)
            .await
        {
            Ok(()) => info!("Aborted multipart upload {}", upload_id),
            Err(e) => warn!("Failed to abort multipart upload {}: {}", upload_id, e),
        }
    }
}

/// Pull parts off the queue until it is empty or the job is cancelled
async fn upload_worker(
    worker_id: usize,
    ctx: Arc<JobContext>,
    source: PathBuf,
    upload_id: Arc<str>,
    queue: Arc<WorkQueue>,
    results: Arc<ResultCollector>,
) -> Result<(), TransferError> {
    let file = SourceFile::open(&source).await?;
    let mut uploaded = 0usize;

    loop {
        if ctx.cancel.is_cancelled() {
            debug!("Upload worker {} stopping, job cancelled", worker_id);
            return Err(TransferError::Cancelled);
        }
        let Some(part) = queue.pop() else {
            break;
        };

        let body = file
            .part_body(&part)
            .await
            .map_err(|e| part_failure(&part, 1, e))?;

        let store = ctx.store.as_ref();
        let location = &ctx.location;
        let upload_id: &str = &upload_id;
        let body = &body;
        let part_number = part.part_number();
        let token = with_retry(&ctx.policy, &part, &ctx.cancel, &ctx.events, move || async move {
            store
                .upload_part(location, upload_id, part_number, body)
                .await
                .map_err(TransferError::from)
        })
        .await?;

        results.push(CompletedPart {
            index: part.index,
            token,
        });
        ctx.part_done(&part);
        uploaded += 1;
    }

    debug!("Upload worker {} finished after {} part(s)", worker_id, uploaded);
    Ok(())
}
