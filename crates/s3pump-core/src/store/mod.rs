//! Object store capability used by the transfer engine
//!
//! The engine only needs six operations from a store. Backends:
//! - [`MemoryStore`]: in-process, for tests and dry runs
//! - [`S3Store`]: AWS S3 and S3-compatible services

mod memory;
mod s3;

pub use memory::*;
pub use s3::*;

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use s3pump_types::{CompletedPart, ObjectLocation};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Body of a ranged GET, delivered in chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// Byte range of a local file sent as one upload part.
///
/// Backends read the range themselves on every attempt, so the engine never
/// holds a whole part in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartBody {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

impl PartBody {
    pub fn new(path: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            length,
        }
    }

    /// Read the whole range. A file that ends inside the range is an error.
    pub async fn read_to_bytes(&self) -> Result<Bytes, StoreError> {
        let source = |e: std::io::Error| StoreError::Source(format!("{:?}: {}", self.path, e));

        let mut file = tokio::fs::File::open(&self.path).await.map_err(source)?;
        file.seek(SeekFrom::Start(self.offset)).await.map_err(source)?;

        let mut buffer = Vec::new();
        file.take(self.length)
            .read_to_end(&mut buffer)
            .await
            .map_err(source)?;

        if buffer.len() as u64 != self.length {
            return Err(StoreError::Source(format!(
                "{:?} ended after {} of {} bytes at offset {}",
                self.path,
                buffer.len(),
                self.length,
                self.offset
            )));
        }
        Ok(Bytes::from(buffer))
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Size of the object in bytes
    async fn head_object(&self, location: &ObjectLocation) -> Result<u64, StoreError>;

    /// Bytes `start..=end` of the object
    async fn get_object_range(
        &self,
        location: &ObjectLocation,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StoreError>;

    /// Begin a multipart upload and return its upload id
    async fn create_multipart_upload(
        &self,
        location: &ObjectLocation,
        encrypt: bool,
    ) -> Result<String, StoreError>;

    /// Upload one part (`part_number` starts at 1) read from `body` and
    /// return its token
    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        part_number: u32,
        body: &PartBody,
    ) -> Result<String, StoreError>;

    /// Assemble the object from `parts`, which must be in ascending order
    async fn complete_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError>;

    /// Discard a multipart upload and everything uploaded for it
    async fn abort_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
    ) -> Result<(), StoreError>;
}
