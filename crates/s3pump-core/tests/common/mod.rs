//! Shared fixtures for the transfer tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use s3pump_core::store::{ByteStream, MemoryStore, ObjectStore, PartBody};
use s3pump_core::StoreError;
use s3pump_types::{CompletedPart, ObjectLocation, TransferConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const KIB: u64 = 1024;

/// Failures that never run out
pub const ALWAYS: u32 = u32::MAX;

/// Deterministic, non-repeating-per-part payload
pub fn payload(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn location() -> ObjectLocation {
    ObjectLocation::new("bucket", "data/object.bin")
}

pub fn config(part_size: u64, workers: usize) -> TransferConfig {
    TransferConfig {
        workers,
        part_size,
        retry_count: 3,
        retry_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_secs(2),
        ..Default::default()
    }
}

/// How HEAD misreports the object size
#[derive(Debug, Clone, Copy)]
pub enum SizeFault {
    Missing,
    Negative(i64),
}

/// In-memory store with scripted failures and delays.
///
/// GET faults are keyed by the range start, upload faults by part number.
/// A truncated GET ends one byte early without any error.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    size_fault: Mutex<Option<SizeFault>>,
    get_failures: Mutex<HashMap<u64, u32>>,
    get_truncations: Mutex<HashMap<u64, u32>>,
    get_delays: Mutex<HashMap<u64, Duration>>,
    upload_failures: Mutex<HashMap<u32, u32>>,
    upload_delays: Mutex<HashMap<u32, Duration>>,
    fail_complete: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapping(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_get(self, start: u64, times: u32) -> Self {
        self.get_failures.lock().insert(start, times);
        self
    }

    pub fn truncate_get(self, start: u64, times: u32) -> Self {
        self.get_truncations.lock().insert(start, times);
        self
    }

    pub fn misreport_size(self, fault: SizeFault) -> Self {
        *self.size_fault.lock() = Some(fault);
        self
    }

    pub fn delay_get(self, start: u64, delay: Duration) -> Self {
        self.get_delays.lock().insert(start, delay);
        self
    }

    pub fn fail_upload(self, part_number: u32, times: u32) -> Self {
        self.upload_failures.lock().insert(part_number, times);
        self
    }

    pub fn delay_upload(self, part_number: u32, delay: Duration) -> Self {
        self.upload_delays.lock().insert(part_number, delay);
        self
    }

    pub fn fail_complete(self) -> Self {
        self.fail_complete.store(true, Ordering::SeqCst);
        self
    }

    fn take_failure<K: std::hash::Hash + Eq>(map: &Mutex<HashMap<K, u32>>, key: &K) -> bool {
        let mut map = map.lock();
        match map.get_mut(key) {
            Some(left) if *left > 0 => {
                if *left != ALWAYS {
                    *left -= 1;
                }
                true
            }
            _ => false,
        }
    }

    fn delay<K: std::hash::Hash + Eq>(map: &Mutex<HashMap<K, Duration>>, key: &K) -> Option<Duration> {
        map.lock().get(key).copied()
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn head_object(&self, location: &ObjectLocation) -> Result<u64, StoreError> {
        match *self.size_fault.lock() {
            Some(SizeFault::Missing) => return Err(StoreError::MissingField("Content-Length")),
            Some(SizeFault::Negative(size)) => return Err(StoreError::InvalidSize(size)),
            None => {}
        }
        self.inner.head_object(location).await
    }

    async fn get_object_range(
        &self,
        location: &ObjectLocation,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StoreError> {
        if let Some(delay) = Self::delay(&self.get_delays, &start) {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.get_failures, &start) {
            return Err(StoreError::service("GetObject", "injected failure"));
        }
        if end > start && Self::take_failure(&self.get_truncations, &start) {
            return self.inner.get_object_range(location, start, end - 1).await;
        }
        self.inner.get_object_range(location, start, end).await
    }

    async fn create_multipart_upload(
        &self,
        location: &ObjectLocation,
        encrypt: bool,
    ) -> Result<String, StoreError> {
        self.inner.create_multipart_upload(location, encrypt).await
    }

    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        part_number: u32,
        body: &PartBody,
    ) -> Result<String, StoreError> {
        if let Some(delay) = Self::delay(&self.upload_delays, &part_number) {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.upload_failures, &part_number) {
            return Err(StoreError::service("UploadPart", "injected failure"));
        }
        self.inner
            .upload_part(location, upload_id, part_number, body)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidUpload("injected completion failure".into()));
        }
        self.inner
            .complete_multipart_upload(location, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.inner.abort_multipart_upload(location, upload_id).await
    }
}
