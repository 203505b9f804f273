//! Reader for Telegram Desktop chat-history exports (`result.json`).
//!
//! The Bot API cannot page through past messages, so the backfill reads the
//! JSON export an operator produces with "Export chat history". Messages are
//! yielded in export order, which is oldest first.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ChatMessage, PlatformError, SenderHandle};

/// Top-level export document.
#[derive(Debug, Deserialize)]
struct ExportDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

/// One entry of the `messages` array.
#[derive(Debug, Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    date_unixtime: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_id: Option<String>,
    #[serde(default)]
    text: Option<ExportText>,
}

/// `text` is either a plain string or a list of plain/entity fragments.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportText {
    Plain(String),
    Rich(Vec<TextFragment>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextFragment {
    Plain(String),
    Entity { text: String },
}

impl ExportText {
    fn flatten(self) -> String {
        match self {
            Self::Plain(s) => s,
            Self::Rich(fragments) => fragments
                .into_iter()
                .map(|f| match f {
                    TextFragment::Plain(s) | TextFragment::Entity { text: s } => s,
                })
                .collect(),
        }
    }
}

impl From<ExportMessage> for ChatMessage {
    fn from(raw: ExportMessage) -> Self {
        // Service entries (joins, pins, title changes) carry no user text.
        let text = if raw.kind == "message" {
            raw.text.map(ExportText::flatten).filter(|t| !t.is_empty())
        } else {
            None
        };
        let sent_at = raw
            .date_unixtime
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        ChatMessage {
            id: raw.id,
            text,
            sender: SenderHandle {
                reference: raw.from_id,
                display_name: raw.from,
            },
            sent_at,
        }
    }
}

/// Parse an export document into chat messages.
///
/// # Errors
///
/// Returns [`PlatformError::HistoryUnavailable`] when the JSON is malformed.
pub fn parse_export(json: &str) -> Result<Vec<ChatMessage>, PlatformError> {
    let doc: ExportDocument = serde_json::from_str(json)
        .map_err(|e| PlatformError::HistoryUnavailable(format!("malformed export: {e}")))?;
    debug!(
        name = doc.name.as_deref().unwrap_or("<unnamed>"),
        export_id = ?doc.id,
        messages = doc.messages.len(),
        "parsed history export"
    );
    Ok(doc.messages.into_iter().map(ChatMessage::from).collect())
}

/// Read and parse an export file.
///
/// # Errors
///
/// Returns [`PlatformError::HistoryUnavailable`] when the file cannot be read
/// or parsed.
pub async fn read_export(path: &Path) -> Result<Vec<ChatMessage>, PlatformError> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        PlatformError::HistoryUnavailable(format!(
            "cannot read export {}: {e}",
            path.display()
        ))
    })?;
    let messages = parse_export(&json)?;
    info!(path = %path.display(), messages = messages.len(), "history export loaded");
    Ok(messages)
}
