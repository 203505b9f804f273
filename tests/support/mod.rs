//! Shared test doubles: an in-memory chat client and wiring helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use herald::audience::{AudienceStore, RecipientId};
use herald::control::Controller;
use herald::dispatch::{DispatchSettings, Dispatcher};
use herald::ingest::{IngestSettings, Pipeline};
use herald::matcher::{Matcher, DEFAULT_KEYWORD};
use herald::platform::{
    parse_user_reference, ChatClient, ChatMessage, HistoryStream, Identity, LiveStream,
    PlatformError, RoomId, RoomInfo, SenderHandle,
};

/// Room used by every test.
pub const ROOM: RoomId = -100_555;

type SendHook = Box<dyn Fn(RecipientId) + Send + Sync>;

/// In-memory [`ChatClient`] with failure injection.
#[derive(Default)]
pub struct FakeClient {
    history: Mutex<Option<Vec<Result<ChatMessage, PlatformError>>>>,
    live: Mutex<Option<mpsc::Receiver<ChatMessage>>>,
    resolve_failures: Mutex<HashMap<i64, u32>>,
    send_failures: Mutex<HashMap<RecipientId, u32>>,
    resolve_calls: AtomicUsize,
    send_calls: AtomicUsize,
    sent: Mutex<Vec<(RecipientId, String)>>,
    on_send: Mutex<Option<SendHook>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these messages as the room history.
    pub fn with_history(self, messages: Vec<ChatMessage>) -> Self {
        *self.history.lock().expect("lock") = Some(messages.into_iter().map(Ok).collect());
        self
    }

    /// Serve raw history items, including read errors.
    pub fn with_history_items(self, items: Vec<Result<ChatMessage, PlatformError>>) -> Self {
        *self.history.lock().expect("lock") = Some(items);
        self
    }

    /// Attach a live feed; returns the sending half.
    pub fn with_live_feed(self) -> (Self, mpsc::Sender<ChatMessage>) {
        let (tx, rx) = mpsc::channel(64);
        *self.live.lock().expect("lock") = Some(rx);
        (self, tx)
    }

    /// Fail sender resolution for message `id` the next `times` calls.
    pub fn fail_resolution(&self, id: i64, times: u32) {
        self.resolve_failures.lock().expect("lock").insert(id, times);
    }

    /// Fail delivery to `recipient` the next `times` calls (`u32::MAX` = always).
    pub fn fail_delivery(&self, recipient: RecipientId, times: u32) {
        self.send_failures
            .lock()
            .expect("lock")
            .insert(recipient, times);
    }

    /// Run `hook` after every send attempt.
    pub fn on_send(&self, hook: impl Fn(RecipientId) + Send + Sync + 'static) {
        *self.on_send.lock().expect("lock") = Some(Box::new(hook));
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Successfully delivered messages, in order.
    pub fn sent(&self) -> Vec<(RecipientId, String)> {
        self.sent.lock().expect("lock").clone()
    }

    fn take_failure<K: std::hash::Hash + Eq>(map: &Mutex<HashMap<K, u32>>, key: &K) -> bool {
        let mut map = map.lock().expect("lock");
        match map.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining = remaining.saturating_sub(1);
                }
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ChatClient for FakeClient {
    async fn connect(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn get_room(&self, room: RoomId) -> Result<RoomInfo, PlatformError> {
        if room == ROOM {
            Ok(RoomInfo {
                id: room,
                title: Some("test room".to_owned()),
            })
        } else {
            Err(PlatformError::RoomNotFound {
                room,
                detail: "unknown".to_owned(),
            })
        }
    }

    async fn history(&self, _room: RoomId) -> Result<HistoryStream, PlatformError> {
        let items = self
            .history
            .lock()
            .expect("lock")
            .take()
            .ok_or_else(|| PlatformError::HistoryUnavailable("no history".to_owned()))?;
        Ok(Box::pin(tokio_stream::iter(items)))
    }

    async fn subscribe(&self, _room: RoomId) -> Result<LiveStream, PlatformError> {
        let rx = self
            .live
            .lock()
            .expect("lock")
            .take()
            .ok_or(PlatformError::AlreadySubscribed)?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn resolve_sender(&self, message: &ChatMessage) -> Result<Identity, PlatformError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.resolve_failures, &message.id) {
            return Err(PlatformError::Resolution("injected failure".to_owned()));
        }
        let reference = message.sender.reference.as_deref().unwrap_or_default();
        let id = parse_user_reference(reference)
            .ok_or_else(|| PlatformError::Resolution(format!("not a user: {reference}")))?;
        Ok(Identity {
            id,
            username: message.sender.display_name.clone(),
        })
    }

    async fn send_message(&self, recipient: RecipientId, text: &str) -> Result<(), PlatformError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let failed = Self::take_failure(&self.send_failures, &recipient);
        if !failed {
            self.sent
                .lock()
                .expect("lock")
                .push((recipient, text.to_owned()));
        }
        if let Some(hook) = self.on_send.lock().expect("lock").as_ref() {
            hook(recipient);
        }
        if failed {
            return Err(PlatformError::Delivery {
                recipient,
                detail: "injected failure".to_owned(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// A text message from `user<sender>`.
pub fn message(id: i64, text: &str, sender: i64) -> ChatMessage {
    ChatMessage {
        id,
        text: Some(text.to_owned()),
        sender: SenderHandle {
            reference: Some(format!("user{sender}")),
            display_name: Some(format!("user-{sender}")),
        },
        sent_at: None,
    }
}

/// A message without text (media or service entry).
pub fn textless(id: i64, sender: i64) -> ChatMessage {
    ChatMessage {
        text: None,
        ..message(id, "", sender)
    }
}

pub fn keyword_text(suffix: &str) -> String {
    format!("please register {DEFAULT_KEYWORD}{suffix}")
}

pub fn default_ingest() -> IngestSettings {
    IngestSettings {
        attempts: 3,
        retry_delay: Duration::from_secs(1),
    }
}

pub fn default_dispatch() -> DispatchSettings {
    DispatchSettings::with_message("hello from herald")
}

/// Fully wired core over a fake client and a temp audience file.
pub struct Harness {
    pub client: Arc<FakeClient>,
    pub audience: Arc<AudienceStore>,
    pub controller: Arc<Controller>,
    pub pipeline: Arc<Pipeline>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub async fn new(client: FakeClient, audience_file: &Path) -> Self {
        let client = Arc::new(client);
        let dyn_client: Arc<dyn ChatClient> = client.clone();
        let audience = Arc::new(AudienceStore::open(audience_file).await);
        let controller = Arc::new(Controller::new());
        let matcher = Matcher::new(DEFAULT_KEYWORD).expect("default keyword is valid");
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&dyn_client),
            matcher,
            Arc::clone(&audience),
            default_ingest(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            dyn_client,
            Arc::clone(&audience),
            Arc::clone(&controller),
            default_dispatch(),
        ));
        Self {
            client,
            audience,
            controller,
            pipeline,
            dispatcher,
        }
    }
}

/// Read the persisted audience file as ids, ignoring blank lines.
pub fn persisted_ids(path: &Path) -> Vec<i64> {
    let contents = std::fs::read_to_string(path).unwrap_or_default();
    contents
        .split_whitespace()
        .map(|s| s.parse().expect("persisted ids are integers"))
        .collect()
}
