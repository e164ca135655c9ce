//! SQLite-backed local store
//!
//! Persists each project's chat record and active snapshot as JSON rows.
//! Writes replace the whole record, matching the key-value semantics of the
//! `LocalStore` contract.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use super::LocalStore;
use crate::models::{Message, Snapshot, StoredChat};

/// Local store on a SQLite database file
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("database connection lock poisoned".into()))
    }

    fn read_chat(&self, project_id: &str) -> StorageResult<Option<StoredChat>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT messages, url_id, description, timestamp, metadata FROM chats WHERE project_id = ?",
                params![project_id],
                |row| {
                    Ok(ChatRow {
                        messages: row.get(0)?,
                        url_id: row.get(1)?,
                        description: row.get(2)?,
                        timestamp: row.get(3)?,
                        metadata: row.get(4)?,
                    })
                },
            )
            .optional()?;

        row.map(|row| row.into_chat(project_id)).transpose()
    }

    fn write_chat(&self, project_id: &str, chat: &StoredChat) -> StorageResult<()> {
        let messages = serde_json::to_string(&chat.messages)?;
        let metadata = chat
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let timestamp = chat.timestamp.map(|t| t.timestamp_millis());

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO chats (project_id, messages, url_id, description, timestamp, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                project_id,
                messages,
                chat.url_id,
                chat.description,
                timestamp,
                metadata
            ],
        )?;
        debug!(
            "Stored {} messages for project {}",
            chat.messages.len(),
            project_id
        );
        Ok(())
    }

    fn read_snapshot(&self, project_id: &str) -> StorageResult<Option<Snapshot>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM snapshots WHERE project_id = ?",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|json| {
            serde_json::from_str(&json).map_err(|e| StorageError::CorruptRecord {
                project_id: project_id.to_string(),
                details: format!("snapshot: {}", e),
            })
        })
        .transpose()
    }

    fn write_snapshot(&self, project_id: &str, snapshot: &Snapshot) -> StorageResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let updated_at = snapshot.updated_at.unwrap_or_else(Utc::now).timestamp_millis();

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (project_id, chat_index, snapshot, updated_at)
             VALUES (?, ?, ?, ?)",
            params![project_id, snapshot.chat_index, json, updated_at],
        )?;
        Ok(())
    }

    fn delete(&self, project_id: &str) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chats WHERE project_id = ?", params![project_id])?;
        tx.execute(
            "DELETE FROM snapshots WHERE project_id = ?",
            params![project_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Ids of all projects with a stored chat, most recent first
    pub fn project_ids(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT project_id FROM chats ORDER BY timestamp DESC, project_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

/// Raw row from the chats table
struct ChatRow {
    messages: String,
    url_id: Option<String>,
    description: Option<String>,
    timestamp: Option<i64>,
    metadata: Option<String>,
}

impl ChatRow {
    fn into_chat(self, project_id: &str) -> StorageResult<StoredChat> {
        let corrupt = |what: &str, e: serde_json::Error| StorageError::CorruptRecord {
            project_id: project_id.to_string(),
            details: format!("{}: {}", what, e),
        };

        let messages: Vec<Message> =
            serde_json::from_str(&self.messages).map_err(|e| corrupt("messages", e))?;
        let metadata = self
            .metadata
            .map(|m| serde_json::from_str(&m).map_err(|e| corrupt("metadata", e)))
            .transpose()?;

        Ok(StoredChat {
            messages,
            url_id: self.url_id,
            description: self.description,
            timestamp: self.timestamp.and_then(DateTime::from_timestamp_millis),
            metadata,
        })
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get_messages(&self, project_id: &str) -> StorageResult<Option<StoredChat>> {
        self.read_chat(project_id)
    }

    async fn set_messages(&self, project_id: &str, chat: &StoredChat) -> StorageResult<()> {
        self.write_chat(project_id, chat)
    }

    async fn get_snapshot(&self, project_id: &str) -> StorageResult<Option<Snapshot>> {
        self.read_snapshot(project_id)
    }

    async fn set_snapshot(&self, project_id: &str, snapshot: &Snapshot) -> StorageResult<()> {
        self.write_snapshot(project_id, snapshot)
    }

    async fn delete_by_id(&self, project_id: &str) -> StorageResult<()> {
        self.delete(project_id)
    }
}
