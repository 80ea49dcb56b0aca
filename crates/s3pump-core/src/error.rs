//! Error types for s3pump core

use std::time::Duration;
use thiserror::Error;

/// Errors reported by an object store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Service { operation: &'static str, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Store reported an invalid object size: {0}")]
    InvalidSize(i64),

    #[error("Store response is missing {0}")]
    MissingField(&'static str),

    #[error("Body stream error: {0}")]
    Stream(String),

    #[error("Invalid multipart upload: {0}")]
    InvalidUpload(String),

    /// The service refused the request (4xx); sending it again will not help
    #[error("{operation} rejected with status {status}: {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("Cannot read part source: {0}")]
    Source(String),
}

impl StoreError {
    pub fn service(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Service {
            operation,
            message: message.into(),
        }
    }

    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Service { .. } | StoreError::Stream(_) | StoreError::Source(_)
        )
    }
}

/// Errors that can occur while running a transfer job
#[derive(Debug, Error)]
pub enum TransferError {
    /// A part failed on every attempt. Terminal for the whole job.
    #[error("Part {index} (bytes {start}-{end}) failed after {attempts} attempt(s): {source}")]
    Part {
        index: u32,
        start: u64,
        end: u64,
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },

    #[error("Length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cannot partition object: {0}")]
    Partition(String),

    #[error("Completing upload {upload_id} failed: {source}")]
    Finalize {
        upload_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Only {uploaded} of {expected} parts were uploaded")]
    MissingParts { uploaded: usize, expected: usize },

    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

impl TransferError {
    /// Check if a single-part attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Store(e) => e.is_retryable(),
            TransferError::LengthMismatch { .. } | TransferError::Timeout(_) | TransferError::Io(_) => {
                true
            }
            _ => false,
        }
    }

    /// Index of the failed part, if the error is tied to one
    pub fn part_index(&self) -> Option<u32> {
        match self {
            TransferError::Part { index, .. } => Some(*index),
            _ => None,
        }
    }
}

// Allow converting to String for CLI reporting
impl From<TransferError> for String {
    fn from(error: TransferError) -> Self {
        error.to_string()
    }
}
