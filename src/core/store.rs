//! Durable storage for conversations.
//!
//! The streaming session commits through [`ConversationStore`] only: the user
//! turn and an empty assistant placeholder are appended when a turn starts,
//! and the placeholder is patched with the final text exactly once when the
//! turn ends.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::message::{ChatTurn, Conversation};
use crate::utils::fs::write_atomic;

/// Fields of a stored turn to overwrite. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnPatch {
    pub content: Option<String>,
    pub thinking: Option<String>,
}

impl TurnPatch {
    pub fn final_text(content: impl Into<String>, thinking: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            thinking: Some(thinking.into()),
        }
    }

    /// Returns whether anything changed.
    pub fn apply(&self, turn: &mut ChatTurn) -> bool {
        let mut changed = false;
        if let Some(content) = &self.content {
            if turn.content != *content {
                turn.content = content.clone();
                changed = true;
            }
        }
        if let Some(thinking) = &self.thinking {
            if turn.thinking != *thinking {
                turn.thinking = thinking.clone();
                changed = true;
            }
        }
        changed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            turn_count: conversation.turns.len(),
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: io::Error },
    Serde { path: PathBuf, source: serde_json::Error },
    InvalidId(String),
    ConversationNotFound(String),
    TurnNotFound { conversation_id: String, turn_id: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, source } => {
                write!(f, "Failed to access {}: {source}", path.display())
            }
            StoreError::Serde { path, source } => {
                write!(f, "Failed to parse conversation at {}: {source}", path.display())
            }
            StoreError::InvalidId(id) => write!(f, "Invalid conversation id: {id}"),
            StoreError::ConversationNotFound(id) => write!(f, "Conversation not found: {id}"),
            StoreError::TurnNotFound {
                conversation_id,
                turn_id,
            } => write!(f, "Turn {turn_id} not found in conversation {conversation_id}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Serde { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Add `turn` to the conversation, creating the conversation if needed.
    /// A turn with an id that is already stored replaces the stored one.
    async fn append(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), StoreError>;

    /// Update a stored turn in place. Applying the same patch twice leaves the
    /// same result.
    async fn patch(
        &self,
        conversation_id: &str,
        turn_id: &str,
        patch: &TurnPatch,
    ) -> Result<(), StoreError>;

    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Most recently updated first.
    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError>;
}

fn apply_patch(
    conversation: &mut Conversation,
    turn_id: &str,
    patch: &TurnPatch,
) -> Result<bool, StoreError> {
    let conversation_id = conversation.id.clone();
    let turn = conversation
        .turn_mut(turn_id)
        .ok_or_else(|| StoreError::TurnNotFound {
            conversation_id,
            turn_id: turn_id.to_string(),
        })?;
    let changed = patch.apply(turn);
    if changed {
        conversation.updated_at = Utc::now();
    }
    Ok(changed)
}

fn sort_summaries(mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries
}

/// Keeps conversations in process memory. Used for `--no-save` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), StoreError> {
        let mut conversations = self.conversations.lock().await;
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::with_id(conversation_id))
            .upsert_turn(turn.clone());
        Ok(())
    }

    async fn patch(
        &self,
        conversation_id: &str,
        turn_id: &str,
        patch: &TurnPatch,
    ) -> Result<(), StoreError> {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))?;
        apply_patch(conversation, turn_id, patch)?;
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.lock().await.get(conversation_id).cloned())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let conversations = self.conversations.lock().await;
        Ok(sort_summaries(
            conversations.values().map(ConversationSummary::from).collect(),
        ))
    }
}

/// One pretty-printed JSON file per conversation, replaced atomically on
/// every write. Disk access runs on tokio's blocking pool.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !conversation_id.is_empty()
            && conversation_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(conversation_id.to_string()));
        }
        Ok(self.dir.join(format!("{conversation_id}.json")))
    }
}

async fn run_blocking<T, F>(path: &Path, task: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| StoreError::Io {
            path: path.to_path_buf(),
            source: io::Error::other(err),
        })?
}

fn read_conversation(path: &Path) -> Result<Option<Conversation>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        })
}

fn write_conversation(path: &Path, conversation: &Conversation) -> Result<(), StoreError> {
    let contents = serde_json::to_vec_pretty(conversation).map_err(|source| StoreError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &contents).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), turns = conversation.turns.len(), "Saved conversation");
    Ok(())
}

fn list_conversations(dir: &Path) -> Result<Vec<ConversationSummary>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut summaries = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match read_conversation(&path) {
            Ok(Some(conversation)) => summaries.push(ConversationSummary::from(&conversation)),
            Ok(None) => {}
            Err(err) => warn!("Skipping unreadable conversation: {err}"),
        }
    }
    Ok(sort_summaries(summaries))
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn append(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), StoreError> {
        let path = self.path_for(conversation_id)?;
        let conversation_id = conversation_id.to_string();
        let turn = turn.clone();
        let _guard = self.write_lock.lock().await;
        let target = path.clone();
        run_blocking(&path, move || {
            let mut conversation = read_conversation(&target)?
                .unwrap_or_else(|| Conversation::with_id(conversation_id));
            conversation.upsert_turn(turn);
            write_conversation(&target, &conversation)
        })
        .await
    }

    async fn patch(
        &self,
        conversation_id: &str,
        turn_id: &str,
        patch: &TurnPatch,
    ) -> Result<(), StoreError> {
        let path = self.path_for(conversation_id)?;
        let conversation_id = conversation_id.to_string();
        let turn_id = turn_id.to_string();
        let patch = patch.clone();
        let _guard = self.write_lock.lock().await;
        let target = path.clone();
        run_blocking(&path, move || {
            let mut conversation = read_conversation(&target)?
                .ok_or(StoreError::ConversationNotFound(conversation_id))?;
            if apply_patch(&mut conversation, &turn_id, &patch)? {
                write_conversation(&target, &conversation)?;
            }
            Ok(())
        })
        .await
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let path = self.path_for(conversation_id)?;
        let target = path.clone();
        run_blocking(&path, move || read_conversation(&target)).await
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let dir = self.dir.clone();
        run_blocking(&self.dir, move || list_conversations(&dir)).await
    }
}
