//! Download task - coordinates the ranged-GET workers of one download
//!
//! The object is split into parts and the parts are dealt round-robin to a
//! fixed set of workers before any I/O begins. Each worker fetches its parts
//! in order, buffers a whole part in memory and writes it at its offset in the
//! pre-sized destination file. The first fatal error stops every worker and
//! the partial file is deleted.

use crate::engine::context::JobContext;
use crate::engine::files::{OutputFile, PartWriter};
use crate::engine::partitioner::{assign_round_robin, partition};
use crate::engine::progress::ProgressReporter;
use crate::engine::retry::{part_failure, with_retry};
use crate::error::{StoreError, TransferError};
use crate::store::ObjectStore;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use s3pump_types::{ObjectLocation, PartDescriptor, TransferDirection, TransferEvent, TransferState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Bytes and part count of a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    pub bytes: u64,
    pub parts: usize,
}

/// One download from the store into a local file
pub struct DownloadTask {
    ctx: Arc<JobContext>,
    destination: PathBuf,
    part_size: u64,
    workers: usize,
    shutdown_grace: Duration,
}

impl DownloadTask {
    pub(crate) fn new(
        ctx: JobContext,
        destination: PathBuf,
        part_size: u64,
        workers: usize,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(ctx),
            destination,
            part_size,
            workers,
            shutdown_grace,
        }
    }

    /// Run the download to completion or failure
    pub async fn run(self) -> Result<JobSummary, TransferError> {
        let ctx = self.ctx.clone();
        info!(
            "Starting download of {} to {:?} with {} worker(s)",
            ctx.location, self.destination, self.workers
        );

        let total_size = match ctx.store.head_object(&ctx.location).await {
            Ok(size) => size,
            // A negative or absent size cannot be partitioned
            Err(e @ (StoreError::InvalidSize(_) | StoreError::MissingField(_))) => {
                ctx.transition(TransferState::Failed);
                return Err(TransferError::Partition(format!(
                    "unreadable size for {}: {}",
                    ctx.location, e
                )));
            }
            Err(e) => {
                ctx.transition(TransferState::Failed);
                return Err(e.into());
            }
        };

        let parts = match partition(total_size, self.part_size) {
            Ok(parts) => parts,
            Err(e) => {
                ctx.transition(TransferState::Failed);
                return Err(e);
            }
        };

        let output = match OutputFile::create(&self.destination, total_size).await {
            Ok(output) => output,
            Err(e) => {
                ctx.transition(TransferState::Failed);
                return Err(e);
            }
        };

        ctx.transition(TransferState::Running);
        let _ = ctx.events.send(TransferEvent::Started {
            direction: TransferDirection::Download,
            total_bytes: total_size,
            parts: parts.len(),
            workers: self.workers,
        });

        let reporter = ProgressReporter::spawn(ctx.transferred.clone(), total_size, ctx.events.clone());

        let mut workers = JoinSet::new();
        for (worker_id, assigned) in assign_round_robin(&parts, self.workers).into_iter().enumerate() {
            if assigned.is_empty() {
                continue;
            }
            let ctx = ctx.clone();
            let output = output.clone();
            workers.spawn(async move { download_worker(worker_id, ctx, output, assigned).await });
        }

        ctx.join_workers(&mut workers, self.shutdown_grace).await;
        reporter.stop().await;

        let transferred = ctx.transferred();
        let failure = ctx.errors.take().or_else(|| {
            (transferred != total_size).then(|| TransferError::LengthMismatch {
                expected: total_size,
                received: transferred,
            })
        });

        if let Some(e) = failure {
            error!("Download of {} failed: {}", ctx.location, e);
            output.remove().await;
            ctx.transition(TransferState::Failed);
            return Err(e);
        }

        ctx.transition(TransferState::Succeeded);
        info!(
            "Download of {} complete ({} bytes in {} part(s))",
            ctx.location,
            transferred,
            parts.len()
        );
        Ok(JobSummary {
            bytes: transferred,
            parts: parts.len(),
        })
    }
}

/// Fetch and write the parts assigned to one worker, strictly in order
async fn download_worker(
    worker_id: usize,
    ctx: Arc<JobContext>,
    output: OutputFile,
    parts: Vec<PartDescriptor>,
) -> Result<(), TransferError> {
    debug!("Download worker {} starting with {} part(s)", worker_id, parts.len());
    let mut writer: PartWriter = output.writer().await?;

    for part in &parts {
        if ctx.cancel.is_cancelled() {
            debug!("Download worker {} stopping, job cancelled", worker_id);
            return Err(TransferError::Cancelled);
        }

        let data = with_retry(&ctx.policy, part, &ctx.cancel, &ctx.events, || {
            fetch_part(ctx.store.as_ref(), &ctx.location, part)
        })
        .await?;

        writer
            .write_part(part, &data)
            .await
            .map_err(|e| part_failure(part, 1, e))?;
        ctx.part_done(part);
    }

    writer.sync().await?;
    debug!("Download worker {} finished", worker_id);
    Ok(())
}

/// One attempt at a part: GET its range and drain the whole body.
/// A body that ends early (or runs long) is an error, never a silent
/// truncation.
async fn fetch_part(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    part: &PartDescriptor,
) -> Result<Bytes, TransferError> {
    let mut body = store.get_object_range(location, part.start, part.end()).await?;

    let mut buffer = BytesMut::with_capacity(part.length as usize);
    while let Some(chunk) = body.try_next().await? {
        buffer.extend_from_slice(&chunk);
        if buffer.len() as u64 > part.length {
            break;
        }
    }

    if buffer.len() as u64 != part.length {
        return Err(TransferError::LengthMismatch {
            expected: part.length,
            received: buffer.len() as u64,
        });
    }
    Ok(buffer.freeze())
}
