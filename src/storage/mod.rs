//! Durable conversation storage
//!
//! SQLite-backed CRUD over conversation records. Records are whole-object:
//! `put` is a full replacement keyed by id, never a field merge, so callers
//! read-modify-write. A `put` against an id that no longer exists recovers
//! by inserting a fresh record under a new id rather than failing the write.

use crate::error::{EngineError, Result};
use crate::session::conversation::{now_millis, Conversation};
use anyhow::Context;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use uuid::Uuid;

pub mod types;
pub use types::{ConversationSummary, SortKey};

/// Storage backend for conversation records
pub struct ConversationStore {
    db_path: PathBuf,
}

impl ConversationStore {
    /// Create a new store in the user's data directory
    ///
    /// The database path can be overridden via the `PALAVER_DB` environment
    /// variable, which makes it easy to point tests at a temporary file.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("PALAVER_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("rs", "palaver", "palaver")
            .ok_or_else(|| EngineError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let db_path = data_dir.join("conversations.db");
        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Create a store backed by the given database path
    ///
    /// # Examples
    ///
    /// ```
    /// use palaver::storage::ConversationStore;
    ///
    /// let store = ConversationStore::new_with_path("/tmp/palaver_doc_test.db").unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| EngineError::Storage(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| EngineError::Storage(e.to_string()).into())
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                system_prompt TEXT NOT NULL DEFAULT '',
                persistent_memory JSON NOT NULL DEFAULT '{}',
                messages JSON NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Fetch a conversation by id
    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.open()?;

        let row = conn
            .query_row(
                "SELECT id, title, system_prompt, persistent_memory, messages,
                        created_at, updated_at
                 FROM conversations WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query conversation")
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        match row {
            Some((id, title, system_prompt, memory_json, messages_json, created_at, updated_at)) => {
                let persistent_memory = serde_json::from_str(&memory_json)
                    .context("Failed to deserialize persistent memory")
                    .map_err(|e| EngineError::Storage(e.to_string()))?;
                let messages = serde_json::from_str(&messages_json)
                    .context("Failed to deserialize messages")
                    .map_err(|e| EngineError::Storage(e.to_string()))?;

                Ok(Some(Conversation {
                    id: Some(id),
                    title,
                    system_prompt,
                    persistent_memory,
                    created_at,
                    updated_at,
                    messages,
                }))
            }
            None => Ok(None),
        }
    }

    /// Save a conversation: insert when the id is absent, full replacement
    /// otherwise.
    ///
    /// If the record's id points at a row that was deleted externally, the
    /// write is not failed; the conversation is inserted under a fresh id.
    /// The record is updated in place with the id actually written, the
    /// effective title, and the new update timestamp, and that id is also
    /// returned.
    pub fn put(&self, conversation: &mut Conversation) -> Result<String> {
        let mut conn = self.open()?;

        conversation.title = conversation.effective_title();
        conversation.updated_at = now_millis();

        let memory_json = serde_json::to_string(&conversation.persistent_memory)
            .context("Failed to serialize persistent memory")
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let messages_json = serde_json::to_string(&conversation.messages)
            .context("Failed to serialize messages")
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let existing = match &conversation.id {
            Some(id) => tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?",
                    params![id],
                    |_| Ok(true),
                )
                .optional()
                .context("Failed to check for existing conversation")
                .map_err(|e| EngineError::Storage(e.to_string()))?
                .unwrap_or(false),
            None => false,
        };

        let id = if existing {
            let id = conversation.id.clone().unwrap_or_default();
            tx.execute(
                "UPDATE conversations SET
                    title = ?, system_prompt = ?, persistent_memory = ?,
                    messages = ?, created_at = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    conversation.title,
                    conversation.system_prompt,
                    memory_json,
                    messages_json,
                    conversation.created_at,
                    conversation.updated_at,
                    id
                ],
            )
            .context("Failed to update conversation")
            .map_err(|e| EngineError::Storage(e.to_string()))?;
            id
        } else {
            // Fresh id on insert, including recovery from an externally
            // deleted row.
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO conversations
                    (id, title, system_prompt, persistent_memory, messages,
                     created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    conversation.title,
                    conversation.system_prompt,
                    memory_json,
                    messages_json,
                    conversation.created_at,
                    conversation.updated_at
                ],
            )
            .context("Failed to insert conversation")
            .map_err(|e| EngineError::Storage(e.to_string()))?;
            id
        };

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        conversation.id = Some(id.clone());
        Ok(id)
    }

    /// Delete a conversation; deleting a missing id is not an error
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM conversations WHERE id = ?", params![id])
            .context("Failed to delete conversation")
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List stored conversations, newest-first by the given key
    pub fn list(&self, sort_key: SortKey) -> Result<Vec<ConversationSummary>> {
        let conn = self.open()?;

        let query = match sort_key {
            SortKey::CreatedAt => {
                "SELECT id, title, created_at, updated_at, messages
                 FROM conversations ORDER BY created_at DESC"
            }
            SortKey::UpdatedAt => {
                "SELECT id, title, created_at, updated_at, messages
                 FROM conversations ORDER BY updated_at DESC"
            }
        };

        let mut stmt = conn
            .prepare(query)
            .context("Failed to prepare statement")
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let title: String = row.get(1)?;
                let created_at: i64 = row.get(2)?;
                let updated_at: i64 = row.get(3)?;
                let messages_json: String = row.get(4)?;

                let message_count =
                    if let Ok(val) = serde_json::from_str::<serde_json::Value>(&messages_json) {
                        val.as_array().map(|a| a.len()).unwrap_or(0)
                    } else {
                        0
                    };

                Ok(ConversationSummary {
                    id,
                    title,
                    created_at,
                    updated_at,
                    message_count,
                })
            })
            .context("Failed to query conversations")
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let mut summaries = Vec::new();
        for summary in rows.flatten() {
            summaries.push(summary);
        }

        Ok(summaries)
    }
}
