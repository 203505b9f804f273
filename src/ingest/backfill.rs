//! One-pass scan of the room history, triggered by `/parse`.

use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::{ItemOutcome, Pipeline, Source};
use crate::platform::{PlatformError, RoomId};

/// Tally of a finished backfill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Messages read from history, including unreadable ones.
    pub scanned: u64,
    /// Messages without text.
    pub empty: u64,
    /// Messages containing the keyword.
    pub matched: u64,
    /// Senders newly added to the audience.
    pub added: u64,
    /// Matched senders that were already in the audience.
    pub already_present: u64,
    /// Messages skipped after exhausting retries or failing to load.
    pub failed: u64,
}

impl BackfillReport {
    fn record(&mut self, outcome: &ItemOutcome) {
        self.scanned = self.scanned.saturating_add(1);
        match outcome {
            ItemOutcome::Empty => self.empty = self.empty.saturating_add(1),
            ItemOutcome::NoMatch => {}
            ItemOutcome::Added(_) => {
                self.matched = self.matched.saturating_add(1);
                self.added = self.added.saturating_add(1);
            }
            ItemOutcome::AlreadyPresent(_) => {
                self.matched = self.matched.saturating_add(1);
                self.already_present = self.already_present.saturating_add(1);
            }
            ItemOutcome::Failed => {
                self.matched = self.matched.saturating_add(1);
                self.failed = self.failed.saturating_add(1);
            }
        }
    }

    fn record_unreadable(&mut self) {
        self.scanned = self.scanned.saturating_add(1);
        self.failed = self.failed.saturating_add(1);
    }
}

/// Scan the whole room history once, oldest first where the platform allows.
///
/// Runs to completion: individual message failures are counted and skipped.
///
/// # Errors
///
/// Returns the platform error when the history cannot be opened at all.
pub async fn run_backfill(pipeline: &Pipeline, room: RoomId) -> Result<BackfillReport, PlatformError> {
    info!(room, "fetching room history");
    let mut history = pipeline.client().history(room).await?;
    let mut report = BackfillReport::default();

    while let Some(item) = history.next().await {
        match item {
            Ok(message) => {
                let outcome = pipeline.process(Source::Backfill, &message).await;
                report.record(&outcome);
            }
            Err(e) => {
                warn!(error = %e, "failed to read history message, skipping");
                report.record_unreadable();
            }
        }
    }

    info!(
        scanned = report.scanned,
        matched = report.matched,
        added = report.added,
        failed = report.failed,
        "backfill finished"
    );
    Ok(report)
}
