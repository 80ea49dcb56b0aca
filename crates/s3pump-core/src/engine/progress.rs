//! Periodic progress reporting for a running job

use s3pump_types::TransferEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Lower alpha = smoother speed display
const SPEED_ALPHA: f64 = 0.15;

/// Number of samples kept in the sliding window (5 seconds)
const SPEED_WINDOW: usize = 10;

/// Background task publishing `TransferEvent::Progress` until stopped
pub(crate) struct ProgressReporter {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(
        transferred: Arc<AtomicU64>,
        total: u64,
        events: broadcast::Sender<TransferEvent>,
    ) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let mut speed = SpeedMeter::new(transferred.load(Ordering::Acquire));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(REPORT_INTERVAL) => {}
                }

                let now = transferred.load(Ordering::Acquire);
                let _ = events.send(TransferEvent::Progress {
                    transferred: now,
                    total,
                    speed: speed.sample(now),
                });
            }

            // Final snapshot so listeners always end on the real total
            let _ = events.send(TransferEvent::Progress {
                transferred: transferred.load(Ordering::Acquire),
                total,
                speed: 0,
            });
        });

        Self { stop, handle }
    }

    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// Sliding-window average smoothed with an exponential moving average
struct SpeedMeter {
    samples: Vec<f64>,
    smoothed: f64,
    last_bytes: u64,
    last_time: Instant,
}

impl SpeedMeter {
    fn new(bytes: u64) -> Self {
        Self {
            samples: Vec::with_capacity(SPEED_WINDOW),
            smoothed: 0.0,
            last_bytes: bytes,
            last_time: Instant::now(),
        }
    }

    fn sample(&mut self, bytes: u64) -> u64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        let instant = if elapsed > 0.0 {
            bytes.saturating_sub(self.last_bytes) as f64 / elapsed
        } else {
            0.0
        };

        self.samples.push(instant);
        if self.samples.len() > SPEED_WINDOW {
            self.samples.remove(0);
        }
        let window_avg = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        self.smoothed = SPEED_ALPHA * window_avg + (1.0 - SPEED_ALPHA) * self.smoothed;

        self.last_bytes = bytes;
        self.last_time = now;
        self.smoothed as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reporter_emits_final_snapshot() {
        let (tx, mut rx) = broadcast::channel(64);
        let transferred = Arc::new(AtomicU64::new(0));
        let reporter = ProgressReporter::spawn(transferred.clone(), 100, tx);

        transferred.store(100, Ordering::Release);
        reporter.stop().await;

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        match last {
            Some(TransferEvent::Progress { transferred, total, .. }) => {
                assert_eq!((transferred, total), (100, 100));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_speed_meter_rises_with_traffic() {
        let mut meter = SpeedMeter::new(0);
        std::thread::sleep(Duration::from_millis(10));
        assert!(meter.sample(1_000_000) > 0);
    }
}
