//! Per-part retry with a fixed delay between attempts

use crate::error::TransferError;
use s3pump_types::{PartDescriptor, TransferConfig, TransferEvent};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// How often and how patiently a single part is attempted
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Constant sleep between two attempts
    pub interval: Duration,
    /// Deadline for each attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            attempts: config.retry_count.max(1),
            interval: config.retry_interval,
            timeout: config.timeout,
        }
    }
}

/// Run `attempt` for `part` until it succeeds or the attempts run out.
///
/// Transient errors are absorbed here. Once the attempts are exhausted, or an
/// error is not retryable, the last error is returned wrapped in
/// [`TransferError::Part`] with the part's index and byte range. Cancellation
/// is checked before every attempt and during the sleep between attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    part: &PartDescriptor,
    cancel: &CancellationToken,
    events: &broadcast::Sender<TransferEvent>,
    mut attempt: F,
) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let attempts = policy.attempts.max(1);
    let mut made = 0;
    let mut last_error = None;

    while made < attempts {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        made += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = tokio::time::timeout(policy.timeout, attempt()) => {
                result.unwrap_or(Err(TransferError::Timeout(policy.timeout)))
            }
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            last_error = Some(err);
            break;
        }

        if made < attempts {
            warn!(
                "Part {} failed (attempt {}/{}): {}. Retrying in {:?}",
                part.index, made, attempts, err, policy.interval
            );
            let _ = events.send(TransferEvent::PartRetrying {
                index: part.index,
                attempt: made,
                error: err.to_string(),
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
        last_error = Some(err);
    }

    Err(part_failure(
        part,
        made,
        last_error.unwrap_or(TransferError::Cancelled),
    ))
}

/// Tag `source` with the part it killed
pub(crate) fn part_failure(part: &PartDescriptor, attempts: u32, source: TransferError) -> TransferError {
    error!(
        "Part {} (bytes {}-{}) failed after {} attempt(s): {}",
        part.index,
        part.start,
        part.end(),
        attempts,
        source
    );
    TransferError::Part {
        index: part.index,
        start: part.start,
        end: part.end(),
        attempts,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn policy(attempts: u32, interval_ms: u64) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_secs(5),
        }
    }

    fn transient() -> TransferError {
        TransferError::Store(StoreError::service("UploadPart", "SlowDown"))
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let (tx, mut rx) = broadcast::channel(16);
        let calls = &AtomicU32::new(0);
        let part = PartDescriptor::new(7, 70, 10);

        let start = Instant::now();
        let result = with_retry(&policy(3, 30), &part, &CancellationToken::new(), &tx, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok("token")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "token");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert!(matches!(rx.try_recv(), Ok(TransferEvent::PartRetrying { index: 7, attempt: 1, .. })));
        assert!(matches!(rx.try_recv(), Ok(TransferEvent::PartRetrying { index: 7, attempt: 2, .. })));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_fatal() {
        let (tx, _rx) = broadcast::channel(16);
        let calls = &AtomicU32::new(0);
        let part = PartDescriptor::new(2, 20, 10);

        let result: Result<(), _> = with_retry(&policy(3, 1), &part, &CancellationToken::new(), &tx, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(TransferError::Part { index, start, end, attempts, .. }) => {
                assert_eq!((index, start, end, attempts), (2, 20, 29, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let (tx, _rx) = broadcast::channel(16);
        let calls = &AtomicU32::new(0);
        let part = PartDescriptor::new(0, 0, 1);

        let result: Result<(), _> = with_retry(&policy(5, 1), &part, &CancellationToken::new(), &tx, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TransferError::Store(StoreError::NotFound("b/k".into())))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(TransferError::Part { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let (tx, _rx) = broadcast::channel(16);
        let part = PartDescriptor::new(0, 0, 1);
        let policy = RetryPolicy {
            attempts: 2,
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        };

        let result: Result<(), _> = with_retry(&policy, &part, &CancellationToken::new(), &tx, move || async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        match result {
            Err(TransferError::Part { attempts, source, .. }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, TransferError::Timeout(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_retry_sleep() {
        let (tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let part = PartDescriptor::new(0, 0, 1);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: Result<(), _> = with_retry(&policy(3, 10_000), &part, &cancel, &tx, move || async move {
            Err(transient())
        })
        .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
