//! Durable, idempotent set of recipients collected from keyword matches.
//!
//! The [`AudienceStore`] is the only shared mutable state between the live
//! listener, the backfill scanner and the dispatcher. Every mutation runs
//! inside one async mutex critical section that covers the duplicate check,
//! the insert and the persist, so two concurrent `add` calls for the same
//! recipient can never both report "newly inserted".
//!
//! On disk the audience is one decimal identifier per line. Writes go to a
//! sibling temp file which is synced and then renamed over the target, so a
//! crash mid-write leaves either the old or the new list, never a truncated one.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Opaque identifier of a message sender, assigned by the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipientId(pub i64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecipientId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Errors produced by audience persistence.
#[derive(Debug, thiserror::Error)]
pub enum AudienceError {
    /// The persisted file exists but could not be read or parsed.
    #[error("failed to read audience file {path}: {detail}")]
    StorageRead {
        /// File that failed to load.
        path: PathBuf,
        /// What went wrong.
        detail: String,
    },
    /// The audience could not be written back to disk.
    #[error("failed to write audience file {path}: {source}")]
    StorageWrite {
        /// Target file.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
}

/// Persistent audience set with idempotent `add`.
#[derive(Debug)]
pub struct AudienceStore {
    path: PathBuf,
    members: Mutex<BTreeSet<RecipientId>>,
}

impl AudienceStore {
    /// Open the store backed by `path`, loading whatever is persisted there.
    ///
    /// A missing file yields an empty audience. A corrupt file is logged and
    /// also yields an empty audience; it is overwritten on the next mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let members = match load_from(&path).await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "audience storage unreadable, starting with an empty audience");
                BTreeSet::new()
            }
        };
        info!(path = %path.display(), recipients = members.len(), "audience loaded");
        Self {
            path,
            members: Mutex::new(members),
        }
    }

    /// Path of the persisted audience file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted audience without touching the in-memory set.
    ///
    /// # Errors
    ///
    /// Returns [`AudienceError::StorageRead`] when the file is unreadable or corrupt.
    pub async fn load(&self) -> Result<BTreeSet<RecipientId>, AudienceError> {
        load_from(&self.path).await
    }

    /// Replace the in-memory set with the persisted one and return a copy.
    ///
    /// If the file cannot be read the in-memory set is kept as is.
    pub async fn reload(&self) -> BTreeSet<RecipientId> {
        let mut members = self.members.lock().await;
        match load_from(&self.path).await {
            Ok(persisted) => *members = persisted,
            Err(e) => warn!(error = %e, "audience reload failed, keeping in-memory audience"),
        }
        members.clone()
    }

    /// Insert a recipient, persisting immediately when it is new.
    ///
    /// Returns `true` when the recipient was newly inserted and `false` when it
    /// was already present (nothing is written in that case). If the write
    /// fails the insert is rolled back so a later retry persists it again.
    ///
    /// # Errors
    ///
    /// Returns [`AudienceError::StorageWrite`] when persisting fails.
    pub async fn add(&self, id: RecipientId) -> Result<bool, AudienceError> {
        let mut members = self.members.lock().await;
        if !members.insert(id) {
            return Ok(false);
        }
        if let Err(e) = persist(&self.path, &members).await {
            members.remove(&id);
            return Err(e);
        }
        debug!(recipient = %id, total = members.len(), "audience persisted");
        Ok(true)
    }

    /// Empty the audience and persist the empty state.
    ///
    /// # Errors
    ///
    /// Returns [`AudienceError::StorageWrite`] when persisting fails; the
    /// in-memory set is left untouched in that case.
    pub async fn clear(&self) -> Result<(), AudienceError> {
        let mut members = self.members.lock().await;
        persist(&self.path, &BTreeSet::new()).await?;
        members.clear();
        info!(path = %self.path.display(), "audience cleared");
        Ok(())
    }

    /// Consistent copy of the current membership.
    pub async fn snapshot(&self) -> BTreeSet<RecipientId> {
        self.members.lock().await.clone()
    }

    /// Whether the recipient is currently a member.
    pub async fn contains(&self, id: RecipientId) -> bool {
        self.members.lock().await.contains(&id)
    }

    /// Number of recipients currently in memory.
    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Whether the in-memory audience is empty.
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }
}

/// Load an audience file. Missing file means an empty audience.
///
/// # Errors
///
/// Returns [`AudienceError::StorageRead`] on I/O failure or a non-integer token.
pub async fn load_from(path: &Path) -> Result<BTreeSet<RecipientId>, AudienceError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => {
            return Err(AudienceError::StorageRead {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };
    parse_members(&contents).map_err(|detail| AudienceError::StorageRead {
        path: path.to_path_buf(),
        detail,
    })
}

fn parse_members(contents: &str) -> Result<BTreeSet<RecipientId>, String> {
    contents
        .split_whitespace()
        .map(|token| {
            token
                .parse::<RecipientId>()
                .map_err(|e| format!("invalid recipient id {token:?}: {e}"))
        })
        .collect()
}

fn render_members(members: &BTreeSet<RecipientId>) -> String {
    members
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "audience".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn persist(path: &Path, members: &BTreeSet<RecipientId>) -> Result<(), AudienceError> {
    let write_err = |source| AudienceError::StorageWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
    file.write_all(render_members(members).as_bytes())
        .await
        .map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}
