//! Telegram Bot API binding for [`ChatClient`], built on teloxide.
//!
//! One long-polling dispatcher serves two purposes: messages posted in the
//! watched room become live events, and slash commands sent by the operator
//! are forwarded to the command queue. History comes from a Desktop export
//! file because bots cannot page through past messages.

use std::path::PathBuf;

use async_trait::async_trait;
use teloxide::dispatching::{ShutdownToken, UpdateFilterExt};
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{
    export, parse_user_reference, ChatClient, ChatMessage, HistoryStream, Identity, LiveStream,
    PlatformError, RoomId, RoomInfo, SenderHandle,
};
use crate::audience::RecipientId;
use crate::commands::{CommandInput, Origin};

/// Buffer between the polling dispatcher and the live listener.
const LIVE_BUFFER: usize = 256;

/// Connection settings for [`TelegramClient`].
#[derive(Clone)]
pub struct TelegramSettings {
    /// Bot API token.
    pub bot_token: String,
    /// Telegram user allowed to issue commands by message; 0 disables this.
    pub operator_id: i64,
    /// Desktop export used as the room history.
    pub history_export: Option<PathBuf>,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"[REDACTED]")
            .field("operator_id", &self.operator_id)
            .field("history_export", &self.history_export)
            .finish()
    }
}

/// Dependencies injected into the teloxide message handler.
#[derive(Clone)]
struct Relay {
    room: RoomId,
    operator_id: i64,
    live: mpsc::Sender<ChatMessage>,
    commands: mpsc::Sender<CommandInput>,
}

/// [`ChatClient`] backed by a teloxide [`Bot`].
pub struct TelegramClient {
    bot: Bot,
    operator_id: i64,
    history_export: Option<PathBuf>,
    commands: mpsc::Sender<CommandInput>,
    polling: Mutex<Option<ShutdownToken>>,
}

impl TelegramClient {
    /// Create a client. Operator commands received by message are pushed into `commands`.
    pub fn new(settings: TelegramSettings, commands: mpsc::Sender<CommandInput>) -> Self {
        Self {
            bot: Bot::new(settings.bot_token),
            operator_id: settings.operator_id,
            history_export: settings.history_export,
            commands,
            polling: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn connect(&self) -> Result<(), PlatformError> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| PlatformError::Connection(e.to_string()))?;
        info!(bot = %me.username(), "connected to Telegram");
        Ok(())
    }

    async fn get_room(&self, room: RoomId) -> Result<RoomInfo, PlatformError> {
        match self.bot.get_chat(ChatId(room)).await {
            Ok(chat) => {
                let info = RoomInfo {
                    id: room,
                    title: chat.title().map(str::to_owned),
                };
                info!(room, title = info.title.as_deref().unwrap_or("<untitled>"), "room found");
                Ok(info)
            }
            Err(RequestError::Api(ApiError::ChatNotFound)) => Err(PlatformError::RoomNotFound {
                room,
                detail: "chat not found or bot is not a member".to_owned(),
            }),
            Err(e) => Err(PlatformError::Connection(e.to_string())),
        }
    }

    async fn history(&self, room: RoomId) -> Result<HistoryStream, PlatformError> {
        let Some(ref path) = self.history_export else {
            return Err(PlatformError::HistoryUnavailable(
                "no history export configured".to_owned(),
            ));
        };
        debug!(room, path = %path.display(), "opening history export");
        let messages = export::read_export(path).await?;
        Ok(Box::pin(tokio_stream::iter(messages.into_iter().map(Ok))))
    }

    async fn subscribe(&self, room: RoomId) -> Result<LiveStream, PlatformError> {
        let mut polling = self.polling.lock().await;
        if polling.is_some() {
            return Err(PlatformError::AlreadySubscribed);
        }

        let (live_tx, live_rx) = mpsc::channel(LIVE_BUFFER);
        let relay = Relay {
            room,
            operator_id: self.operator_id,
            live: live_tx,
            commands: self.commands.clone(),
        };

        let handler = Update::filter_message().endpoint(relay_message);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![relay])
            .default_handler(|update| async move {
                debug!(update = ?update.id, "ignoring non-message update");
            })
            .build();
        *polling = Some(dispatcher.shutdown_token());

        tokio::spawn(async move {
            info!("telegram polling started");
            dispatcher.dispatch().await;
            info!("telegram polling stopped");
        });

        Ok(Box::pin(ReceiverStream::new(live_rx)))
    }

    async fn resolve_sender(&self, message: &ChatMessage) -> Result<Identity, PlatformError> {
        resolve_handle(&message.sender)
    }

    async fn send_message(&self, recipient: RecipientId, text: &str) -> Result<(), PlatformError> {
        self.bot
            .send_message(ChatId(recipient.0), text)
            .await
            .map(|_| ())
            .map_err(|e| PlatformError::Delivery {
                recipient,
                detail: e.to_string(),
            })
    }

    async fn disconnect(&self) {
        let Some(token) = self.polling.lock().await.take() else {
            debug!("telegram polling never started");
            return;
        };
        match token.shutdown() {
            Ok(stopped) => {
                stopped.await;
                info!("disconnected from Telegram");
            }
            Err(_) => debug!("telegram polling was already idle"),
        };
    }
}

/// Resolve a sender handle to an identity.
///
/// # Errors
///
/// Returns [`PlatformError::Resolution`] when the message has no user sender.
pub fn resolve_handle(handle: &SenderHandle) -> Result<Identity, PlatformError> {
    let reference = handle
        .reference
        .as_deref()
        .ok_or_else(|| PlatformError::Resolution("message has no sender".to_owned()))?;
    let id = parse_user_reference(reference).ok_or_else(|| {
        PlatformError::Resolution(format!("sender {reference:?} is not a user"))
    })?;
    Ok(Identity {
        id,
        username: handle.display_name.clone(),
    })
}

/// Strip a `@botname` suffix from the command word: `/check@herald_bot` → `/check`.
pub fn strip_mention(text: &str) -> String {
    let text = text.trim();
    let (word, rest) = match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, Some(rest)),
        None => (text, None),
    };
    let word = word.split('@').next().unwrap_or(word);
    match rest {
        Some(rest) => format!("{word} {}", rest.trim()),
        None => word.to_owned(),
    }
}

async fn relay_message(msg: Message, relay: Relay) -> ResponseResult<()> {
    let sender_id = msg.from.as_ref().and_then(|user| i64::try_from(user.id.0).ok());
    let text = msg.text().map(str::to_owned);

    if let (Some(uid), Some(t)) = (sender_id, text.as_deref()) {
        if relay.operator_id != 0 && uid == relay.operator_id && t.starts_with('/') {
            let input = CommandInput {
                line: strip_mention(t),
                origin: Origin::Chat(msg.chat.id.0),
            };
            if relay.commands.send(input).await.is_err() {
                warn!("command queue closed, dropping operator command");
            }
            return Ok(());
        }
    }

    if msg.chat.id.0 != relay.room {
        return Ok(());
    }

    let message = ChatMessage {
        id: i64::from(msg.id.0),
        text,
        sender: SenderHandle {
            reference: sender_id.map(|id| id.to_string()),
            display_name: msg.from.as_ref().and_then(|user| user.username.clone()),
        },
        sent_at: Some(msg.date),
    };
    if relay.live.send(message).await.is_err() {
        debug!("live listener gone, dropping room message");
    }
    Ok(())
}
