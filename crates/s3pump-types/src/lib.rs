//! Shared types for s3pump
//!
//! This crate contains the data structures shared between the transfer
//! engine and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Limits & Defaults
// ============================================================================

pub const MIB: u64 = 1024 * 1024;

/// Every non-final multipart part must be at least this large
pub const MIN_PART_SIZE_MIB: u64 = 5;
pub const MAX_DOWNLOAD_PART_SIZE_MIB: u64 = 100;
pub const MAX_UPLOAD_PART_SIZE_MIB: u64 = 5000;

/// Highest part number a multipart upload accepts
pub const MAX_UPLOAD_PARTS: u32 = 10_000;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 64;

pub const DEFAULT_REGION: &str = "ap-northeast-1";
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Configuration
// ============================================================================

/// Which way bytes flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Download,
    Upload,
}

impl TransferDirection {
    /// Largest nominal part size accepted for this direction, in MiB
    pub fn max_part_size_mib(self) -> u64 {
        match self {
            TransferDirection::Download => MAX_DOWNLOAD_PART_SIZE_MIB,
            TransferDirection::Upload => MAX_UPLOAD_PART_SIZE_MIB,
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Download => write!(f, "download"),
            TransferDirection::Upload => write!(f, "upload"),
        }
    }
}

/// Settings for one transfer job. Never mutated once the job starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub region: String,
    /// Optional S3-compatible endpoint (MinIO, localstack, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Number of concurrent workers
    pub workers: usize,
    /// Attempts per part, including the first one
    pub retry_count: u32,
    /// Fixed delay between two attempts of the same part
    pub retry_interval: Duration,
    /// Timeout applied to every single request
    pub timeout: Duration,
    /// Nominal part size in bytes
    pub part_size: u64,
    /// How long the coordinator waits for workers to stop after a failure
    /// before aborting them
    pub shutdown_grace: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            workers: DEFAULT_WORKERS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            part_size: MIN_PART_SIZE_MIB * MIB,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl TransferConfig {
    /// Config for a download with the part size (MiB) and worker count
    /// clamped to the download bounds
    pub fn for_download(part_size_mib: u64, workers: usize) -> Self {
        Self::clamped(TransferDirection::Download, part_size_mib, workers)
    }

    /// Config for an upload with the part size (MiB) and worker count
    /// clamped to the upload bounds
    pub fn for_upload(part_size_mib: u64, workers: usize) -> Self {
        Self::clamped(TransferDirection::Upload, part_size_mib, workers)
    }

    fn clamped(direction: TransferDirection, part_size_mib: u64, workers: usize) -> Self {
        Self {
            workers: clamp_workers(workers),
            part_size: clamp_part_size_mib(direction, part_size_mib) * MIB,
            ..Default::default()
        }
    }
}

/// Clamp a part size given in MiB to the bounds for `direction`
pub fn clamp_part_size_mib(direction: TransferDirection, part_size_mib: u64) -> u64 {
    part_size_mib.clamp(MIN_PART_SIZE_MIB, direction.max_part_size_mib())
}

/// Clamp a worker count to 1..=64
pub fn clamp_workers(workers: usize) -> usize {
    workers.clamp(MIN_WORKERS, MAX_WORKERS)
}

// ============================================================================
// Object & Part Types
// ============================================================================

/// Bucket and key of a remote object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// A contiguous byte range of an object, transferred on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// Zero-based sequence index
    pub index: u32,
    pub start: u64,
    pub length: u64,
}

impl PartDescriptor {
    pub fn new(index: u32, start: u64, length: u64) -> Self {
        Self {
            index,
            start,
            length,
        }
    }

    /// Inclusive end offset. Equals `start` for a zero-length part.
    pub fn end(&self) -> u64 {
        (self.start + self.length).saturating_sub(1).max(self.start)
    }

    /// One past the last byte
    pub fn end_exclusive(&self) -> u64 {
        self.start + self.length
    }

    /// Multipart part numbers start at 1
    pub fn part_number(&self) -> u32 {
        self.index + 1
    }
}

/// A part accepted by the store during a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub index: u32,
    /// Opaque per-part identifier (ETag) returned by the store
    pub token: String,
}

impl CompletedPart {
    pub fn part_number(&self) -> u32 {
        self.index + 1
    }
}

// ============================================================================
// Job State & Results
// ============================================================================

/// Lifecycle of one transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Partitioning,
    Running,
    Succeeded,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Succeeded | TransferState::Failed)
    }
}

/// Result of a successful transfer job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub direction: TransferDirection,
    pub location: ObjectLocation,
    /// Total bytes moved, equals the object size
    pub bytes: u64,
    pub parts: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl TransferOutcome {
    /// Average rate in bits per second
    pub fn bits_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 * 8.0 / secs
        } else {
            0.0
        }
    }

    /// Average rate in Mbit (2^20 bits) per second
    pub fn megabits_per_second(&self) -> f64 {
        self.bits_per_second() / MIB as f64
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events published by the engine while a job runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    Started {
        direction: TransferDirection,
        total_bytes: u64,
        parts: usize,
        workers: usize,
    },
    PartRetrying {
        index: u32,
        attempt: u32,
        error: String,
    },
    PartCompleted {
        index: u32,
        bytes: u64,
    },
    Progress {
        transferred: u64,
        total: u64,
        /// Smoothed bytes per second
        speed: u64,
    },
    StateChanged {
        state: TransferState,
    },
}
