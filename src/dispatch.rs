//! Paced outbound delivery to the collected audience.
//!
//! A run reloads the persisted audience, then walks it one recipient at a
//! time: deliver with exponential backoff, then wait the pacing delay before
//! the next recipient. Before each recipient the run checks that it still
//! owns the sending flag; `/stop` (or a newer `/start`) ends it there. A
//! send already in flight, including its retries, always completes first.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::audience::{AudienceStore, RecipientId};
use crate::control::{Controller, RunTicket};
use crate::platform::ChatClient;

/// Delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Text sent to every recipient.
    pub message: String,
    /// Wait between consecutive recipients.
    pub pacing_delay: Duration,
    /// Total delivery attempts per recipient.
    pub send_attempts: u32,
    /// First backoff wait; doubles after every failed attempt.
    pub backoff_base: Duration,
}

impl DispatchSettings {
    /// Settings with the default pacing (2s), attempts (3) and backoff base (1s).
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pacing_delay: Duration::from_secs(2),
            send_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Outcome of delivering to one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Who the message was for.
    pub recipient: RecipientId,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Whether any attempt succeeded.
    pub delivered: bool,
}

/// Totals for one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Recipients in the reloaded audience.
    pub recipients: usize,
    /// Recipients that received the message.
    pub delivered: usize,
    /// Recipients that exhausted every attempt.
    pub failed: usize,
    /// Send attempts made across all recipients.
    pub attempts: u64,
}

impl DispatchReport {
    fn record(&mut self, record: &DeliveryRecord) {
        if record.delivered {
            self.delivered = self.delivered.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
        self.attempts = self.attempts.saturating_add(u64::from(record.attempts));
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The ticket did not own the sending flag; nothing was sent.
    NotStarted,
    /// Every recipient was processed.
    Completed(DispatchReport),
    /// The run was stopped before reaching the end of the audience.
    Cancelled(DispatchReport),
}

/// Sends the outbound message to the audience.
pub struct Dispatcher {
    client: Arc<dyn ChatClient>,
    audience: Arc<AudienceStore>,
    controller: Arc<Controller>,
    settings: DispatchSettings,
}

impl Dispatcher {
    /// Assemble a dispatcher.
    pub fn new(
        client: Arc<dyn ChatClient>,
        audience: Arc<AudienceStore>,
        controller: Arc<Controller>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            client,
            audience,
            controller,
            settings,
        }
    }

    /// Run one dispatch pass for `ticket`.
    ///
    /// Releases the sending flag when the pass ends, unless a newer run has
    /// taken it over in the meantime.
    pub async fn run(&self, ticket: RunTicket) -> DispatchOutcome {
        if !self.controller.is_current(ticket) {
            warn!("dispatch requested without an active sending session, not started");
            return DispatchOutcome::NotStarted;
        }

        let recipients = self.audience.reload().await;
        let mut report = DispatchReport {
            recipients: recipients.len(),
            ..DispatchReport::default()
        };
        info!(recipients = report.recipients, "starting dispatch");

        let mut cancelled = false;
        let mut remaining = recipients.into_iter().peekable();
        while let Some(recipient) = remaining.next() {
            if !self.controller.is_current(ticket) {
                info!(recipient = %recipient, "dispatch stopped on request");
                cancelled = true;
                break;
            }

            let record = self
                .send_with_retry(recipient, &self.settings.message, self.settings.send_attempts)
                .await;
            report.record(&record);

            if remaining.peek().is_some() && self.controller.is_current(ticket) {
                tokio::select! {
                    () = tokio::time::sleep(self.settings.pacing_delay) => {}
                    () = self.controller.cancelled(ticket) => {}
                }
            }
        }

        self.controller.finish_run(ticket);
        info!(
            delivered = report.delivered,
            failed = report.failed,
            attempts = report.attempts,
            cancelled,
            "dispatch finished"
        );
        if cancelled {
            DispatchOutcome::Cancelled(report)
        } else {
            DispatchOutcome::Completed(report)
        }
    }

    /// Deliver `text` to one recipient with exponential backoff between attempts.
    ///
    /// Waits `backoff_base`, then twice that, and so on, between failed
    /// attempts. Exhaustion is logged and reported, never raised.
    pub async fn send_with_retry(
        &self,
        recipient: RecipientId,
        text: &str,
        attempts: u32,
    ) -> DeliveryRecord {
        let attempts = attempts.max(1);
        let mut delay = self.settings.backoff_base;

        for attempt in 1..=attempts {
            info!(recipient = %recipient, attempt, "sending message");
            match self.client.send_message(recipient, text).await {
                Ok(()) => {
                    info!(recipient = %recipient, attempt, "message delivered");
                    return DeliveryRecord {
                        recipient,
                        attempts: attempt,
                        delivered: true,
                    };
                }
                Err(e) => {
                    warn!(recipient = %recipient, attempt, error = %e, "delivery attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        error!(recipient = %recipient, attempts, "failed to deliver message after all attempts");
        DeliveryRecord {
            recipient,
            attempts,
            delivered: false,
        }
    }
}
