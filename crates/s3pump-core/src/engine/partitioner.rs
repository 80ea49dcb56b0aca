//! Splits an object into parts and spreads them over workers
//!
//! Pure and deterministic: the same inputs always give the same parts, which
//! lets the upload coordinator rebuild part order from indices alone.

use crate::error::TransferError;
use s3pump_types::PartDescriptor;

/// Split `[0, total_size)` into contiguous parts of `part_size` bytes.
/// The last part holds the remainder. An empty object yields no parts.
pub fn partition(total_size: u64, part_size: u64) -> Result<Vec<PartDescriptor>, TransferError> {
    if part_size == 0 {
        return Err(TransferError::Partition("part size must be positive".into()));
    }

    let count = total_size.div_ceil(part_size);
    if count > u32::MAX as u64 {
        return Err(TransferError::Partition(format!(
            "{} bytes in parts of {} bytes gives too many parts",
            total_size, part_size
        )));
    }

    let mut parts = Vec::with_capacity(count as usize);
    let mut position = 0u64;
    let mut index = 0u32;
    while position < total_size {
        let length = part_size.min(total_size - position);
        parts.push(PartDescriptor::new(index, position, length));
        position += length;
        index += 1;
    }

    Ok(parts)
}

/// Static round-robin assignment: part `i` goes to worker `i % workers`.
/// Each worker keeps its parts in ascending order.
pub fn assign_round_robin(parts: &[PartDescriptor], workers: usize) -> Vec<Vec<PartDescriptor>> {
    let workers = workers.max(1);
    let mut assignments = vec![Vec::new(); workers];
    for (i, part) in parts.iter().enumerate() {
        assignments[i % workers].push(*part);
    }
    assignments
}
