//! State shared between the workers of one job
//!
//! Every lock here is held for a single push, pop or store, never across a
//! network call.

use crate::error::TransferError;
use parking_lot::Mutex;
use s3pump_types::{CompletedPart, PartDescriptor};
use std::collections::VecDeque;

/// Holds the first fatal error of a job. Later errors are dropped so the
/// reported error does not depend on scheduling.
#[derive(Debug, Default)]
pub struct ErrorCell {
    slot: Mutex<Option<TransferError>>,
}

impl ErrorCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `error` unless one is already held. Returns true if it was stored.
    pub fn set(&self, error: TransferError) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        true
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn take(&self) -> Option<TransferError> {
        self.slot.lock().take()
    }
}

/// FIFO of parts that idle workers pull from
#[derive(Debug, Default)]
pub struct WorkQueue {
    parts: Mutex<VecDeque<PartDescriptor>>,
}

impl WorkQueue {
    pub fn new(parts: impl IntoIterator<Item = PartDescriptor>) -> Self {
        Self {
            parts: Mutex::new(parts.into_iter().collect()),
        }
    }

    /// Next part, or `None` once the queue is drained
    pub fn pop(&self) -> Option<PartDescriptor> {
        self.parts.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.parts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.lock().is_empty()
    }
}

/// Collects part tokens in completion order
#[derive(Debug, Default)]
pub struct ResultCollector {
    parts: Mutex<Vec<CompletedPart>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, part: CompletedPart) {
        self.parts.lock().push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.lock().is_empty()
    }

    /// Collected parts in ascending index order, as the completion call needs
    pub fn sorted(&self) -> Vec<CompletedPart> {
        let mut parts = self.parts.lock().clone();
        parts.sort_by_key(|p| p.index);
        parts
    }
}
