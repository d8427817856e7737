//! Conversation history - client-side persistence of chat sessions
//!
//! All conversations live in one JSON document with a schema version, so a
//! future layout change can be detected instead of misread.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::agent::{Message, Role};
use crate::error::Error;

/// Version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// One stored message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
}

impl ConversationRecord {
    /// Text of the first user message, for listings
    pub fn title(&self) -> &str {
        self.messages.iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(empty)")
    }
}

/// Prior turns sent along with a new message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<HistoryEntry> for Message {
    fn from(entry: HistoryEntry) -> Self {
        match entry.role {
            Role::System => Message::system(entry.content),
            Role::User => Message::user(entry.content),
            Role::Assistant => Message::assistant(entry.content),
            // a bare tool result has no call to answer; keep its text as context
            Role::Tool => Message::user(entry.content),
        }
    }
}

/// Keep only the last `depth` entries
pub fn trim_history<T>(mut entries: Vec<T>, depth: usize) -> Vec<T> {
    if entries.len() > depth {
        entries.drain(..entries.len() - depth);
    }
    entries
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    conversations: Vec<ConversationRecord>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            conversations: Vec::new(),
        }
    }
}

/// File-backed collection of conversations
pub struct ConversationStore {
    path: PathBuf,
    doc: StoreDocument,
}

impl ConversationStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let doc: StoreDocument = serde_json::from_str(&content)
                .map_err(|e| Error::Storage(format!("Unreadable history at {:?}: {}", path, e)))?;
            if doc.version != SCHEMA_VERSION {
                return Err(Error::Storage(format!(
                    "History at {:?} has schema version {}, expected {}",
                    path, doc.version, SCHEMA_VERSION
                )));
            }
            doc
        } else {
            StoreDocument::default()
        };

        debug!("Opened history with {} conversations", doc.conversations.len());
        Ok(Self { path, doc })
    }

    /// Fresh conversation id
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn get(&self, id: &str) -> Option<&ConversationRecord> {
        self.doc.conversations.iter().find(|c| c.id == id)
    }

    /// Append a turn, creating the conversation on first use
    pub fn append(&mut self, id: &str, role: Role, content: &str) {
        let now = Utc::now();
        let message = StoredMessage {
            role,
            content: content.to_string(),
            timestamp: now,
        };

        match self.doc.conversations.iter_mut().find(|c| c.id == id) {
            Some(record) => {
                record.messages.push(message);
                record.updated_at = now;
            }
            None => self.doc.conversations.push(ConversationRecord {
                id: id.to_string(),
                updated_at: now,
                messages: vec![message],
            }),
        }
    }

    /// The last `depth` turns of a conversation
    pub fn history(&self, id: &str, depth: usize) -> Vec<HistoryEntry> {
        let entries = self.get(id)
            .map(|c| c.messages.iter()
                .map(|m| HistoryEntry { role: m.role, content: m.content.clone() })
                .collect())
            .unwrap_or_default();
        trim_history(entries, depth)
    }

    /// Conversations, most recently updated first
    pub fn list(&self) -> Vec<&ConversationRecord> {
        let mut all: Vec<&ConversationRecord> = self.doc.conversations.iter().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    pub fn len(&self) -> usize {
        self.doc.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.conversations.is_empty()
    }

    /// Remove every conversation
    pub fn clear(&mut self) {
        self.doc.conversations.clear();
    }

    /// Write the store to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.doc)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::open(dir.path().join("none.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_append_save_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut store = ConversationStore::open(&path).unwrap();
        store.append("a", Role::User, "What is the capital of France?");
        store.append("a", Role::Assistant, "Paris.");
        store.save().unwrap();

        let reopened = ConversationStore::open(&path).unwrap();
        let record = reopened.get("a").unwrap();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.title(), "What is the capital of France?");

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, r#"{"version": 99, "conversations": []}"#).unwrap();

        assert!(matches!(ConversationStore::open(&path), Err(Error::Storage(_))));
    }

    #[test]
    fn test_history_depth() {
        let dir = tempdir().unwrap();
        let mut store = ConversationStore::open(dir.path().join("h.json")).unwrap();
        for i in 0..30 {
            store.append("a", Role::User, &format!("msg {i}"));
        }

        let history = store.history("a", 20);
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "msg 10");
        assert!(store.history("unknown", 20).is_empty());
    }

    #[test]
    fn test_list_and_clear() {
        let dir = tempdir().unwrap();
        let mut store = ConversationStore::open(dir.path().join("h.json")).unwrap();
        store.append("old", Role::User, "first");
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.append("new", Role::User, "second");
        store.append("new", Role::Assistant, "reply");

        let ids: Vec<&str> = store.list().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids[0], "new");

        store.clear();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_trim_history() {
        assert_eq!(trim_history(vec![1, 2, 3, 4], 2), vec![3, 4]);
        assert_eq!(trim_history(vec![1], 5), vec![1]);
        assert!(trim_history(vec![1, 2], 0).is_empty());
    }

    #[test]
    fn test_history_entry_into_message() {
        let msg: Message = HistoryEntry { role: Role::Assistant, content: "hi".into() }.into();
        assert_eq!(msg, Message::assistant("hi"));
    }
}
