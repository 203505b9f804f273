//! Ingestion pipeline shared by the backfill scanner and the live listener.
//!
//! Both producers hand each message to [`Pipeline::process`], which numbers
//! it, runs the [`Matcher`] and, on a match, resolves the sender and offers
//! it to the [`AudienceStore`]. Resolution and persistence failures are
//! retried with a fixed delay; a message that still fails is logged and
//! skipped so the enclosing scan keeps going.

pub mod backfill;
pub mod live;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::audience::{AudienceError, AudienceStore};
use crate::matcher::Matcher;
use crate::platform::{ChatClient, ChatMessage, Identity, PlatformError};

pub use backfill::{run_backfill, BackfillReport};
pub use live::{handle_live_event, spawn_live_listener};

/// Retry settings for per-message processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    /// Total attempts per matched message.
    pub attempts: u32,
    /// Fixed wait between attempts.
    pub retry_delay: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Which producer a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Historical message read by `/parse`.
    Backfill,
    /// Newly posted message from the subscription.
    Live,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Backfill => "backfill",
            Self::Live => "live",
        })
    }
}

/// What happened to a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The message had no text.
    Empty,
    /// The text does not contain the keyword.
    NoMatch,
    /// The sender is new and was persisted.
    Added(Identity),
    /// The sender was already in the audience.
    AlreadyPresent(Identity),
    /// Every attempt failed; the message was skipped.
    Failed,
}

/// Failure of one processing attempt.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Sender lookup failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),
    /// Recording the sender failed.
    #[error(transparent)]
    Audience(#[from] AudienceError),
}

/// Match → resolve → record stage shared by both producers.
pub struct Pipeline {
    client: Arc<dyn ChatClient>,
    matcher: Matcher,
    audience: Arc<AudienceStore>,
    settings: IngestSettings,
    sequence: AtomicU64,
}

impl Pipeline {
    /// Assemble the pipeline.
    pub fn new(
        client: Arc<dyn ChatClient>,
        matcher: Matcher,
        audience: Arc<AudienceStore>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            client,
            matcher,
            audience,
            settings,
            sequence: AtomicU64::new(0),
        }
    }

    /// Platform client used for history and sender resolution.
    pub fn client(&self) -> &dyn ChatClient {
        self.client.as_ref()
    }

    /// Number of messages numbered so far across both producers.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Number, match and (on a match) record the sender of one message.
    pub async fn process(&self, source: Source, message: &ChatMessage) -> ItemOutcome {
        let seq = self.next_sequence();

        let Some(text) = message.text.as_deref().filter(|t| !t.is_empty()) else {
            info!(seq, %source, message_id = message.id, "no text in message, skipping");
            return ItemOutcome::Empty;
        };

        let matched = self.matcher.matches(Some(text));
        info!(
            seq,
            %source,
            message_id = message.id,
            sent_at = ?message.sent_at,
            text,
            matched,
            "message evaluated"
        );
        if !matched {
            return ItemOutcome::NoMatch;
        }

        self.record_sender(seq, message).await
    }

    async fn record_sender(&self, seq: u64, message: &ChatMessage) -> ItemOutcome {
        let attempts = self.settings.attempts.max(1);
        for attempt in 1..=attempts {
            match self.try_record(message).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    warn!(seq, attempt, error = %e, "failed to process message");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }
        error!(seq, attempts, message_id = message.id, "message left unprocessed after retries");
        ItemOutcome::Failed
    }

    async fn try_record(&self, message: &ChatMessage) -> Result<ItemOutcome, IngestError> {
        let identity = self.client.resolve_sender(message).await?;
        if self.audience.add(identity.id).await? {
            info!(recipient = %identity.id, user = %identity.label(), "new recipient found");
            Ok(ItemOutcome::Added(identity))
        } else {
            info!(recipient = %identity.id, user = %identity.label(), "recipient already recorded, skipping");
            Ok(ItemOutcome::AlreadyPresent(identity))
        }
    }
}
