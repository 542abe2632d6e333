//! SQLite-backed conversation storage.
//!
//! One row per session. Messages are stored as a JSON array so a record is
//! always written and read as a unit.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use chatgate_core::config::{is_valid_table_name, StorageConfig};
use chatgate_core::{ChatMessage, ConversationRecord};

use crate::gate::{ProvisionOptions, ProvisionTarget, ReadinessGate, TableStatus};
use crate::store::{ConversationStore, Result, StoreError};

/// SQLite conversation store.
///
/// Construction starts provisioning on the current tokio runtime and
/// returns immediately; data operations wait until the table exists.
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
    gate: ReadinessGate,
}

impl SqliteConversationStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>, table: &str, options: ProvisionOptions) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::with_connection(conn, table, options)
    }

    /// Open the store described by the storage section of the configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(config.database_path(), &config.table, ProvisionOptions::from(config))
    }

    /// A private in-memory database.
    pub fn in_memory(table: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table, ProvisionOptions::default())
    }

    fn with_connection(conn: Connection, table: &str, options: ProvisionOptions) -> Result<Self> {
        if !is_valid_table_name(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }

        let conn = Arc::new(Mutex::new(conn));
        let target = Arc::new(SqliteTable {
            conn: conn.clone(),
            table: table.to_string(),
        });

        Ok(Self {
            conn,
            table: table.to_string(),
            gate: ReadinessGate::provision(target, options),
        })
    }

    /// Table holding the records.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn parse_datetime(session_id: &str, s: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                session_id: session_id.to_string(),
                message: format!("bad timestamp '{s}': {e}"),
            })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn put(&self, session_id: &str, record: &ConversationRecord) -> Result<()> {
        self.gate.await_ready().await?;

        let messages = serde_json::to_string(&record.messages)?;
        let conn = self.conn.lock();

        // `created` is owned by the first write
        conn.execute(
            &format!(
                r#"
                INSERT INTO {table} (session_id, created, last_update, total_tokens, messages)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(session_id) DO UPDATE SET
                    last_update = excluded.last_update,
                    total_tokens = excluded.total_tokens,
                    messages = excluded.messages
                "#,
                table = self.table
            ),
            params![
                session_id,
                Self::format_datetime(&record.created),
                record.last_update.as_ref().map(Self::format_datetime),
                i64::try_from(record.total_tokens).unwrap_or(i64::MAX),
                messages,
            ],
        )?;

        debug!(session_id, messages = record.messages.len(), "Stored conversation record");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<ConversationRecord>> {
        self.gate.await_ready().await?;

        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "SELECT created, last_update, total_tokens, messages FROM {} WHERE session_id = ?1",
                    self.table
                ),
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((created, last_update, total_tokens, messages)) = row else {
            return Ok(None);
        };

        let messages: Vec<ChatMessage> = serde_json::from_str(&messages)?;

        Ok(Some(ConversationRecord {
            session_id: session_id.to_string(),
            created: Self::parse_datetime(session_id, &created)?,
            last_update: last_update
                .map(|s| Self::parse_datetime(session_id, &s))
                .transpose()?,
            total_tokens: u64::try_from(total_tokens).unwrap_or_default(),
            messages,
        }))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.gate.await_ready().await?;

        let conn = self.conn.lock();
        conn.execute(
            &format!("DELETE FROM {} WHERE session_id = ?1", self.table),
            params![session_id],
        )?;
        Ok(())
    }

    fn gate(&self) -> &ReadinessGate {
        &self.gate
    }
}

/// Provisioning view of the records table.
struct SqliteTable {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteTable {
    fn table_exists(&self) -> rusqlite::Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn store_error(e: rusqlite::Error) -> chatgate_core::Error {
    chatgate_core::Error::Store(e.to_string())
}

#[async_trait]
impl ProvisionTarget for SqliteTable {
    fn table(&self) -> &str {
        &self.table
    }

    async fn exists(&self) -> chatgate_core::Result<bool> {
        self.table_exists().map_err(store_error)
    }

    async fn create(&self) -> chatgate_core::Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                session_id TEXT PRIMARY KEY NOT NULL,
                created TEXT NOT NULL,
                last_update TEXT,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                messages TEXT NOT NULL DEFAULT '[]'
            );
            "#,
            table = self.table
        ))
        .map_err(store_error)
    }

    async fn status(&self) -> chatgate_core::Result<TableStatus> {
        if self.table_exists().map_err(store_error)? {
            Ok(TableStatus::Active)
        } else {
            Ok(TableStatus::Creating)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_core::config::StorageBackend;
    use tempfile::TempDir;

    fn sample_record(session_id: &str) -> ConversationRecord {
        let mut record = ConversationRecord::new(session_id);
        let now = Utc::now();
        let mut user = ChatMessage::user("What is the capital of France?");
        user.finalize(18, now);
        let mut reply = ChatMessage::assistant("The capital of France is Paris.");
        reply.finalize(17, now);
        record.push_turn(user, reply);
        record.total_tokens = 35;
        record
    }

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("conversations.db");
        let store = SqliteConversationStore::open(&path, "chat", ProvisionOptions::default()).unwrap();

        let record = sample_record("s1");
        store.put("s1", &record).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages, record.messages);
        assert_eq!(loaded.total_tokens, 35);
        assert_eq!(loaded.created.timestamp(), record.created.timestamp());
        assert!(loaded.last_update.is_none());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_upsert_keeps_created() {
        let store = SqliteConversationStore::in_memory("chat").unwrap();
        let record = sample_record("s1");
        store.put("s1", &record).await.unwrap();

        let mut later = record.clone();
        later.created = record.created + chrono::Duration::hours(1);
        later.last_update = Some(later.created);
        later.total_tokens = 80;
        store.put("s1", &later).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.created.timestamp(), record.created.timestamp());
        assert!(loaded.last_update.is_some());
        assert_eq!(loaded.total_tokens, 80);
    }

    #[tokio::test]
    async fn test_missing_and_delete() {
        let store = SqliteConversationStore::in_memory("chat").unwrap();
        assert!(store.get("nope").await.unwrap().is_none());

        store.put("s1", &sample_record("s1")).await.unwrap();
        store.delete("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
        store.delete("s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_existing_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conversations.db");

        {
            let store = SqliteConversationStore::open(&path, "chat", ProvisionOptions::default()).unwrap();
            store.put("s1", &sample_record("s1")).await.unwrap();
        }

        let store = SqliteConversationStore::open(&path, "chat", ProvisionOptions::default()).unwrap();
        assert!(store.get("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_from_config_uses_storage_path() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: Some(temp_dir.path().join("chat.db")),
            table: "turns".to_string(),
            ..StorageConfig::default()
        };

        let store = SqliteConversationStore::from_config(&config).unwrap();
        assert_eq!(store.table(), "turns");
        store.put("s1", &sample_record("s1")).await.unwrap();
        assert!(temp_dir.path().join("chat.db").exists());
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let result = SqliteConversationStore::in_memory("chat; DROP TABLE x");
        assert!(matches!(result, Err(StoreError::InvalidTable(_))));
    }
}
