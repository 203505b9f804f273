//! Listener for newly posted room messages, gated by the scanning flag.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{info, trace};

use super::{ItemOutcome, Pipeline, Source};
use crate::control::Controller;
use crate::platform::{ChatMessage, LiveStream};

/// Process one live event, or drop it untouched when scanning is off.
///
/// Dropped events do not consume a sequence number.
pub async fn handle_live_event(
    pipeline: &Pipeline,
    controller: &Controller,
    message: &ChatMessage,
) -> Option<ItemOutcome> {
    if !controller.is_scanning() {
        trace!(message_id = message.id, "scanning inactive, dropping live message");
        return None;
    }
    Some(pipeline.process(Source::Live, message).await)
}

/// Consume the live stream for the rest of the process lifetime.
///
/// Each event is handled on its own task so a message stuck in retries does
/// not hold up the ones behind it.
pub fn spawn_live_listener(
    pipeline: Arc<Pipeline>,
    controller: Arc<Controller>,
    mut stream: LiveStream,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("live listener started");
        while let Some(message) = stream.next().await {
            if !controller.is_scanning() {
                trace!(message_id = message.id, "scanning inactive, dropping live message");
                continue;
            }
            let pipeline = Arc::clone(&pipeline);
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                handle_live_event(&pipeline, &controller, &message).await;
            });
        }
        info!("live message stream ended");
    })
}
