//! Chat-platform abstraction consumed by the ingestion pipeline and dispatcher.
//!
//! The core never talks to a concrete messenger. It needs exactly the
//! operations on [`ChatClient`]: connect, look up the watched room, read its
//! history once, subscribe to new messages, resolve who sent a message and
//! deliver a message to a recipient. [`telegram::TelegramClient`] is the
//! production binding; tests supply an in-memory fake.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_stream::Stream;

use crate::audience::RecipientId;

pub mod export;
pub mod telegram;

/// Identifier of the watched chat room.
pub type RoomId = i64;

/// Lazy, finite, non-restartable sequence of historical messages.
pub type HistoryStream = Pin<Box<dyn Stream<Item = Result<ChatMessage, PlatformError>> + Send>>;

/// Infinite stream of newly arriving room messages.
pub type LiveStream = Pin<Box<dyn Stream<Item = ChatMessage> + Send>>;

/// Room metadata returned by [`ChatClient::get_room`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Platform room identifier.
    pub id: RoomId,
    /// Human-readable title, when the room has one.
    pub title: Option<String>,
}

/// Raw sender reference carried by a message until it is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderHandle {
    /// Platform reference for the sender (e.g. `user12345` or a numeric id).
    pub reference: Option<String>,
    /// Display name, when known.
    pub display_name: Option<String>,
}

/// A single chat message as seen by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Platform message id within the room.
    pub id: i64,
    /// Message text; `None` for media-only or service messages.
    pub text: Option<String>,
    /// Unresolved sender reference.
    pub sender: SenderHandle,
    /// When the message was posted, if the platform reports it.
    pub sent_at: Option<DateTime<Utc>>,
}

/// Resolved identity of a message sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable recipient identifier.
    pub id: RecipientId,
    /// Username or display name for logs.
    pub username: Option<String>,
}

impl Identity {
    /// Label used in log lines: the username when known, otherwise the id.
    pub fn label(&self) -> String {
        match self.username {
            Some(ref name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

/// Errors surfaced by a [`ChatClient`].
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform session could not be established.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The configured room does not exist or is not accessible.
    #[error("room {room} not found: {detail}")]
    RoomNotFound {
        /// Room that was looked up.
        room: RoomId,
        /// Platform explanation.
        detail: String,
    },
    /// The sender of a message could not be resolved to an identity.
    #[error("sender resolution failed: {0}")]
    Resolution(String),
    /// A message could not be delivered to a recipient.
    #[error("delivery to {recipient} failed: {detail}")]
    Delivery {
        /// Intended recipient.
        recipient: RecipientId,
        /// Platform explanation.
        detail: String,
    },
    /// Room history cannot be read.
    #[error("history unavailable: {0}")]
    HistoryUnavailable(String),
    /// The live message stream was already handed out.
    #[error("live messages are already subscribed")]
    AlreadySubscribed,
}

/// Minimal chat-platform surface the core depends on.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Establish the platform session.
    async fn connect(&self) -> Result<(), PlatformError>;

    /// Look up the watched room.
    async fn get_room(&self, room: RoomId) -> Result<RoomInfo, PlatformError>;

    /// Open the room's message history for a single pass.
    async fn history(&self, room: RoomId) -> Result<HistoryStream, PlatformError>;

    /// Subscribe to new messages posted in the room.
    async fn subscribe(&self, room: RoomId) -> Result<LiveStream, PlatformError>;

    /// Resolve the sender of a message.
    async fn resolve_sender(&self, message: &ChatMessage) -> Result<Identity, PlatformError>;

    /// Deliver `text` to a recipient.
    async fn send_message(&self, recipient: RecipientId, text: &str) -> Result<(), PlatformError>;

    /// Tear the session down. Safe to call more than once.
    async fn disconnect(&self);
}

/// Parse a sender reference of the form `user<digits>` or plain `<digits>`.
///
/// Channel and chat references (`channel123`, `chat123`) are not users and
/// yield `None`.
pub fn parse_user_reference(reference: &str) -> Option<RecipientId> {
    let digits = reference.strip_prefix("user").unwrap_or(reference);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
