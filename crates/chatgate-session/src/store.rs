//! Conversation storage.
//!
//! A [`ConversationStore`] is a keyed store of [`ConversationRecord`]s. Every
//! operation waits on the backend's [`ReadinessGate`] first, so callers never
//! see a half-provisioned table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use chatgate_core::ConversationRecord;

use crate::gate::{ProvisionError, ReadinessGate};

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Table not ready: {0}")]
    NotReady(#[from] ProvisionError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Corrupt record for session {session_id}: {message}")]
    Corrupt { session_id: String, message: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for chatgate_core::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotReady(e) => e.into(),
            StoreError::Io(e) => chatgate_core::Error::Io(e),
            other => chatgate_core::Error::Store(other.to_string()),
        }
    }
}

/// Keyed storage of conversation records.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert or replace the record stored under `session_id`.
    async fn put(&self, session_id: &str, record: &ConversationRecord) -> Result<()>;

    /// Fetch the record for `session_id`, if any.
    async fn get(&self, session_id: &str) -> Result<Option<ConversationRecord>>;

    /// Remove the record for `session_id`. Missing records are not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// The gate guarding this backend.
    fn gate(&self) -> &ReadinessGate;
}

/// In-process store, mostly for tests and one-shot CLI use.
pub struct MemoryConversationStore {
    records: RwLock<HashMap<String, ConversationRecord>>,
    gate: ReadinessGate,
    puts: AtomicUsize,
}

impl MemoryConversationStore {
    /// Create an empty store that is ready immediately.
    pub fn new() -> Self {
        Self::with_gate(ReadinessGate::ready())
    }

    /// Create an empty store behind a custom gate.
    pub fn with_gate(gate: ReadinessGate) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            gate,
            puts: AtomicUsize::new(0),
        }
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn put(&self, session_id: &str, record: &ConversationRecord) -> Result<()> {
        self.gate.await_ready().await?;

        let mut record = record.clone();
        record.session_id = session_id.to_string();
        self.records.write().insert(session_id.to_string(), record);
        self.puts.fetch_add(1, Ordering::SeqCst);

        debug!(session_id, "Stored conversation record");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<ConversationRecord>> {
        self.gate.await_ready().await?;
        Ok(self.records.read().get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.gate.await_ready().await?;
        self.records.write().remove(session_id);
        Ok(())
    }

    fn gate(&self) -> &ReadinessGate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_core::ChatMessage;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryConversationStore::new();
        assert!(store.get("abc").await.unwrap().is_none());

        let mut record = ConversationRecord::new("abc");
        record.push_turn(ChatMessage::user("hi"), ChatMessage::assistant("hello"));
        store.put("abc", &record).await.unwrap();

        let loaded = store.get("abc").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(store.put_count(), 1);

        store.delete("abc").await.unwrap();
        assert!(store.get("abc").await.unwrap().is_none());
        // Deleting again is fine
        store.delete("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_replaces_record() {
        let store = MemoryConversationStore::new();
        let mut record = ConversationRecord::new("s1");
        store.put("s1", &record).await.unwrap();

        record.total_tokens = 42;
        store.put("s1", &record).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("s1").await.unwrap().unwrap().total_tokens, 42);
    }

    #[tokio::test]
    async fn test_operations_fail_behind_failed_gate() {
        let gate = ReadinessGate::spawn("chat", async {
            Err(ProvisionError::Failed {
                table: "chat".to_string(),
                message: "no credentials".to_string(),
            })
        });
        let store = MemoryConversationStore::with_gate(gate);

        let err = store.get("abc").await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady(ProvisionError::Failed { .. })));

        let core: chatgate_core::Error = err.into();
        assert!(matches!(core, chatgate_core::Error::ProvisioningFailed { .. }));
        assert_eq!(store.put_count(), 0);
    }
}
