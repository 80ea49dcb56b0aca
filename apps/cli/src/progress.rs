//! Progress bar for a running transfer

use crate::output::format_bytes;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use s3pump_types::{TransferEvent, TransferState};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Drives one progress bar from the engine's event stream
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );

        Self { bar }
    }

    /// Follow `events` until the channel closes
    pub fn follow(self, mut events: broadcast::Receiver<TransferEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle_event(&event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
            if !self.bar.is_finished() {
                self.bar.finish_and_clear();
            }
        })
    }

    fn handle_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::Started {
                direction,
                total_bytes,
                parts,
                workers,
            } => {
                self.bar.set_length(*total_bytes);
                self.bar.set_message(format!(
                    "{} {} in {} part(s) on {} worker(s)",
                    direction,
                    format_bytes(*total_bytes),
                    parts,
                    workers
                ));
            }

            TransferEvent::Progress { transferred, .. } => {
                self.bar.set_position(*transferred);
            }

            TransferEvent::PartRetrying {
                index,
                attempt,
                error,
            } => {
                self.bar.println(format!(
                    "{} part {} attempt {} failed: {}",
                    style("↻").yellow(),
                    index,
                    attempt,
                    error
                ));
            }

            TransferEvent::StateChanged { state } => match state {
                TransferState::Succeeded => {
                    self.bar.finish_with_message(format!(
                        "{} Transfer complete",
                        style("✓").green().bold()
                    ));
                }
                TransferState::Failed => {
                    self.bar.abandon_with_message(format!(
                        "{} Transfer failed",
                        style("✗").red().bold()
                    ));
                }
                _ => {}
            },

            TransferEvent::PartCompleted { .. } => {}
        }
    }
}
