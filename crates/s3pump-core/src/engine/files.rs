//! Local file access for the transfer workers
//!
//! The download destination is created and sized to the full object length
//! once, before any worker starts. Each worker then opens its own handle and
//! writes its parts at their offsets. Part ranges never overlap, so the
//! handles need no lock between them.

use crate::error::TransferError;
use crate::store::PartBody;
use s3pump_types::PartDescriptor;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

/// Destination file of a download
#[derive(Debug, Clone)]
pub struct OutputFile {
    path: PathBuf,
    size: u64,
}

impl OutputFile {
    /// Create (or truncate) `path` and size it to `size` bytes
    pub async fn create(path: &Path, size: u64) -> Result<Self, TransferError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        file.set_len(size).await?;
        file.sync_all().await?;

        info!("Pre-allocated {:?} ({} bytes)", path, size);
        Ok(Self {
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Open an independent write handle for one worker
    pub async fn writer(&self) -> Result<PartWriter, TransferError> {
        let file = OpenOptions::new().write(true).open(&self.path).await?;
        Ok(PartWriter {
            file,
            size: self.size,
        })
    }

    /// Delete the file after a failed job
    pub async fn remove(self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!("Removed partial file {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial file {:?}: {}", self.path, e),
        }
    }
}

/// A worker's own handle into the destination file
#[derive(Debug)]
pub struct PartWriter {
    file: File,
    size: u64,
}

impl PartWriter {
    /// Write a fully buffered part at its offset
    pub async fn write_part(&mut self, part: &PartDescriptor, data: &[u8]) -> Result<(), TransferError> {
        if data.len() as u64 != part.length {
            return Err(TransferError::LengthMismatch {
                expected: part.length,
                received: data.len() as u64,
            });
        }
        if part.end_exclusive() > self.size {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "part {} ends at {} past the file size {}",
                    part.index,
                    part.end_exclusive(),
                    self.size
                ),
            )));
        }

        self.file.seek(SeekFrom::Start(part.start)).await?;
        self.file.write_all(data).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Flush the worker's writes to disk
    pub async fn sync(&mut self) -> Result<(), TransferError> {
        self.file.sync_data().await?;
        Ok(())
    }
}

/// Source file of an upload
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
}

impl SourceFile {
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        File::open(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Body for `part`. The file must still cover the whole range: a source
    /// that shrank since planning is reported, never sent short.
    pub async fn part_body(&self, part: &PartDescriptor) -> Result<PartBody, TransferError> {
        let size = tokio::fs::metadata(&self.path).await?.len();
        if size < part.end_exclusive() {
            return Err(TransferError::LengthMismatch {
                expected: part.length,
                received: size.saturating_sub(part.start),
            });
        }
        Ok(PartBody::new(&self.path, part.start, part.length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_positional_writes_from_separate_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");
        let output = OutputFile::create(&path, 10).await.unwrap();
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 10);

        let mut second = output.writer().await.unwrap();
        let mut first = output.writer().await.unwrap();
        second.write_part(&PartDescriptor::new(1, 5, 5), b"56789").await.unwrap();
        first.write_part(&PartDescriptor::new(0, 0, 5), b"01234").await.unwrap();
        first.sync().await.unwrap();
        second.sync().await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_write_rejects_bad_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputFile::create(&dir.path().join("out.bin"), 8).await.unwrap();
        let mut writer = output.writer().await.unwrap();

        let short = writer.write_part(&PartDescriptor::new(0, 0, 4), b"ab").await;
        assert!(matches!(short, Err(TransferError::LengthMismatch { expected: 4, received: 2 })));

        let past_end = writer.write_part(&PartDescriptor::new(1, 6, 4), b"abcd").await;
        assert!(matches!(past_end, Err(TransferError::Io(_))));
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let output = OutputFile::create(&path, 4).await.unwrap();
        output.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_part_body_detects_truncated_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        tokio::fs::write(&path, b"abcdefgh").await.unwrap();

        let source = SourceFile::open(&path).await.unwrap();
        let body = source.part_body(&PartDescriptor::new(1, 4, 4)).await.unwrap();
        assert_eq!(body, PartBody::new(&path, 4, 4));
        assert_eq!(body.read_to_bytes().await.unwrap(), &b"efgh"[..]);

        let result = source.part_body(&PartDescriptor::new(2, 6, 4)).await;
        assert!(matches!(result, Err(TransferError::LengthMismatch { expected: 4, received: 2 })));
    }
}
