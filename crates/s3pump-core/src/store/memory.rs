//! In-memory object store
//!
//! Keeps objects and open multipart uploads in process memory and enforces
//! the same completion rules as S3: tokens must match the uploaded parts and
//! be listed in strictly ascending part order.

use super::{ByteStream, ObjectStore, PartBody};
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream;
use parking_lot::Mutex;
use s3pump_types::{CompletedPart, ObjectLocation, MAX_UPLOAD_PARTS};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Largest chunk a ranged GET body is split into
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Number of calls made per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub head: u64,
    pub get: u64,
    pub create: u64,
    pub upload_part: u64,
    pub complete: u64,
    pub abort: u64,
}

struct PendingUpload {
    location: ObjectLocation,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct Counters {
    head: AtomicU64,
    get: AtomicU64,
    create: AtomicU64,
    upload_part: AtomicU64,
    complete: AtomicU64,
    abort: AtomicU64,
}

/// Object store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectLocation, Bytes>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    /// Minimum size of every non-final part at completion (0 = no check)
    min_part_size: u64,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject completions whose non-final parts are smaller than `bytes`
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    /// Store an object directly, bypassing the multipart protocol
    pub fn put_object(&self, location: ObjectLocation, data: impl Into<Bytes>) {
        self.objects.lock().insert(location, data.into());
    }

    pub fn object(&self, location: &ObjectLocation) -> Option<Bytes> {
        self.objects.lock().get(location).cloned()
    }

    /// Number of multipart uploads begun but neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            head: c.head.load(Ordering::Acquire),
            get: c.get.load(Ordering::Acquire),
            create: c.create.load(Ordering::Acquire),
            upload_part: c.upload_part.load(Ordering::Acquire),
            complete: c.complete.load(Ordering::Acquire),
            abort: c.abort.load(Ordering::Acquire),
        }
    }

    fn not_found(location: &ObjectLocation) -> StoreError {
        StoreError::NotFound(location.to_string())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(&self, location: &ObjectLocation) -> Result<u64, StoreError> {
        self.counters.head.fetch_add(1, Ordering::AcqRel);
        self.objects
            .lock()
            .get(location)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Self::not_found(location))
    }

    async fn get_object_range(
        &self,
        location: &ObjectLocation,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StoreError> {
        self.counters.get.fetch_add(1, Ordering::AcqRel);
        let data = self.object(location).ok_or_else(|| Self::not_found(location))?;

        let len = data.len() as u64;
        if start >= len || end < start {
            return Err(StoreError::service(
                "GetObject",
                format!("InvalidRange: bytes={}-{} of {}", start, end, len),
            ));
        }
        // Like S3, an end past the object is cut at the last byte
        let end_exclusive = (end + 1).min(len);
        let body = data.slice(start as usize..end_exclusive as usize);

        let chunks: Vec<Result<Bytes, StoreError>> = body
            .chunks(STREAM_CHUNK_SIZE)
            .map(|chunk| Ok(body.slice_ref(chunk)))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn create_multipart_upload(
        &self,
        location: &ObjectLocation,
        _encrypt: bool,
    ) -> Result<String, StoreError> {
        self.counters.create.fetch_add(1, Ordering::AcqRel);
        let upload_id = Uuid::new_v4().simple().to_string();
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                location: location.clone(),
                parts: BTreeMap::new(),
            },
        );
        debug!("Created multipart upload {} for {}", upload_id, location);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        part_number: u32,
        body: &PartBody,
    ) -> Result<String, StoreError> {
        self.counters.upload_part.fetch_add(1, Ordering::AcqRel);
        if part_number == 0 || part_number > MAX_UPLOAD_PARTS {
            return Err(StoreError::InvalidUpload(format!(
                "part number {} out of range",
                part_number
            )));
        }
        let body = body.read_to_bytes().await?;

        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| &u.location == location)
            .ok_or_else(|| StoreError::InvalidUpload(format!("no such upload {}", upload_id)))?;

        let token = format!("\"{}\"", Uuid::new_v4().simple());
        upload.parts.insert(part_number, (token.clone(), body));
        Ok(token)
    }

    async fn complete_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        self.counters.complete.fetch_add(1, Ordering::AcqRel);
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get(upload_id)
            .filter(|u| &u.location == location)
            .ok_or_else(|| StoreError::InvalidUpload(format!("no such upload {}", upload_id)))?;

        if parts.is_empty() {
            return Err(StoreError::InvalidUpload("no parts to complete".into()));
        }
        if parts
            .windows(2)
            .any(|w| w[0].part_number() >= w[1].part_number())
        {
            return Err(StoreError::InvalidUpload(
                "parts must be listed in ascending order".into(),
            ));
        }

        let mut assembled = BytesMut::new();
        for (i, part) in parts.iter().enumerate() {
            let (token, data) = upload.parts.get(&part.part_number()).ok_or_else(|| {
                StoreError::InvalidUpload(format!("part {} was never uploaded", part.part_number()))
            })?;
            if token != &part.token {
                return Err(StoreError::InvalidUpload(format!(
                    "token mismatch for part {}",
                    part.part_number()
                )));
            }
            let is_last = i + 1 == parts.len();
            if !is_last && (data.len() as u64) < self.min_part_size {
                return Err(StoreError::InvalidUpload(format!(
                    "part {} is smaller than the minimum part size",
                    part.part_number()
                )));
            }
            assembled.extend_from_slice(data);
        }

        uploads.remove(upload_id);
        drop(uploads);

        self.objects
            .lock()
            .insert(location.clone(), assembled.freeze());
        debug!("Completed multipart upload {} for {}", upload_id, location);
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.counters.abort.fetch_add(1, Ordering::AcqRel);
        let mut uploads = self.uploads.lock();
        match uploads.get(upload_id) {
            Some(upload) if &upload.location == location => {
                uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StoreError::InvalidUpload(format!("no such upload {}", upload_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn location() -> ObjectLocation {
        ObjectLocation::new("bucket", "object")
    }

    fn source(dir: &tempfile::TempDir, data: &[u8]) -> PartBody {
        let path = dir.path().join(format!("{}.part", Uuid::new_v4().simple()));
        std::fs::write(&path, data).unwrap();
        PartBody::new(path, 0, data.len() as u64)
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let store = MemoryStore::new();
        store.put_object(location(), (0..=255u8).collect::<Vec<_>>());

        let body: Vec<Bytes> = store
            .get_object_range(&location(), 10, 19)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let body: Vec<u8> = body.concat();
        assert_eq!(body, (10..20u8).collect::<Vec<_>>());

        assert!(store.get_object_range(&location(), 256, 300).await.is_err());
        assert_eq!(store.stats().get, 2);
    }

    #[tokio::test]
    async fn test_multipart_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let id = store.create_multipart_upload(&location(), false).await.unwrap();
        let t2 = store
            .upload_part(&location(), &id, 2, &source(&dir, b"world"))
            .await
            .unwrap();
        let t1 = store
            .upload_part(&location(), &id, 1, &source(&dir, b"hello "))
            .await
            .unwrap();

        // Out of order listing is rejected
        let unordered = [
            CompletedPart { index: 1, token: t2.clone() },
            CompletedPart { index: 0, token: t1.clone() },
        ];
        assert!(store
            .complete_multipart_upload(&location(), &id, &unordered)
            .await
            .is_err());

        let ordered = [
            CompletedPart { index: 0, token: t1 },
            CompletedPart { index: 1, token: t2 },
        ];
        store
            .complete_multipart_upload(&location(), &id, &ordered)
            .await
            .unwrap();
        assert_eq!(store.object(&location()).unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_abort_discards_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let id = store.create_multipart_upload(&location(), true).await.unwrap();
        store
            .upload_part(&location(), &id, 1, &source(&dir, b"data"))
            .await
            .unwrap();
        assert_eq!(store.open_uploads(), 1);

        store.abort_multipart_upload(&location(), &id).await.unwrap();
        assert_eq!(store.open_uploads(), 0);
        assert!(store.object(&location()).is_none());
        assert!(store.abort_multipart_upload(&location(), &id).await.is_err());
    }

    #[tokio::test]
    async fn test_min_part_size_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new().with_min_part_size(4);
        let id = store.create_multipart_upload(&location(), false).await.unwrap();
        let t1 = store
            .upload_part(&location(), &id, 1, &source(&dir, b"ab"))
            .await
            .unwrap();
        let t2 = store
            .upload_part(&location(), &id, 2, &source(&dir, b"cd"))
            .await
            .unwrap();
        let parts = [
            CompletedPart { index: 0, token: t1 },
            CompletedPart { index: 1, token: t2 },
        ];
        assert!(store
            .complete_multipart_upload(&location(), &id, &parts)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_part_reads_exact_file_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let store = MemoryStore::new();
        let id = store.create_multipart_upload(&location(), false).await.unwrap();
        let token = store
            .upload_part(&location(), &id, 1, &PartBody::new(&path, 2, 4))
            .await
            .unwrap();
        let parts = [CompletedPart { index: 0, token }];
        store
            .complete_multipart_upload(&location(), &id, &parts)
            .await
            .unwrap();
        assert_eq!(store.object(&location()).unwrap(), Bytes::from_static(b"cdef"));

        // A range running past the end of the file is never sent short
        let id = store.create_multipart_upload(&location(), false).await.unwrap();
        let short = store
            .upload_part(&location(), &id, 1, &PartBody::new(&path, 6, 4))
            .await;
        assert!(matches!(short, Err(StoreError::Source(_))));
    }
}
