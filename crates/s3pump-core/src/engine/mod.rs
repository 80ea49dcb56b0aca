//! Transfer Engine - the heart of s3pump
//!
//! Splits an object into parts and moves them over a fixed pool of workers:
//! - Deterministic partitioning
//! - Per-part retry with a fixed delay
//! - Lock-free positional writes for downloads
//! - Shared pull queue and token collector for uploads
//! - First-error-wins failure with cooperative cancellation and cleanup

mod context;
mod download_task;
mod files;
mod manager;
mod partitioner;
mod progress;
mod retry;
mod shared;
mod upload_task;

pub use download_task::*;
pub use files::*;
pub use manager::*;
pub use partitioner::*;
pub use retry::{with_retry, RetryPolicy};
pub use shared::*;
pub use upload_task::*;
