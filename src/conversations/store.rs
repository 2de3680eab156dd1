use super::types::{Conversation, MessageRole, StoredMessage};
use crate::error::StoreError;
use chrono::Utc;
use rusqlite::{Connection, Error as SqlError, OptionalExtension, params, types::Type};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 50;

pub trait ConversationStore: Send + Sync {
    fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError>;
    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;
    fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError>;
    fn rename_conversation(&self, id: &str, title: &str) -> Result<(), StoreError>;
    fn delete_conversation(&self, id: &str) -> Result<bool, StoreError>;

    fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<StoredMessage, StoreError>;
    fn update_message(&self, message_id: i64, content: &str) -> Result<bool, StoreError>;
    fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
    fn count_messages(&self, conversation_id: &str) -> Result<usize, StoreError>;
}

/// SQLite-backed conversation store. Single connection behind a mutex; the
/// store is the only writer of its own database.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS conversations (
                 id TEXT PRIMARY KEY,
                 title TEXT NOT NULL,
                 custom_title INTEGER NOT NULL DEFAULT 0,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS messages (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 conversation_id TEXT NOT NULL
                     REFERENCES conversations(id) ON DELETE CASCADE,
                 role TEXT NOT NULL,
                 content TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 metadata TEXT
             );

             CREATE INDEX IF NOT EXISTS idx_messages_conversation
                 ON messages(conversation_id, id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(super) fn lock_connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|error| StoreError::StorageUnavailable(format!("lock error: {error}")))
    }

    pub(super) fn role_to_str(role: MessageRole) -> &'static str {
        match role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub(super) fn str_to_role(value: &str, column_index: usize) -> rusqlite::Result<MessageRole> {
        match value {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(SqlError::FromSqlConversionFailure(
                column_index,
                Type::Text,
                format!("unknown message role: {value}").into(),
            )),
        }
    }

    fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
        Ok(Conversation {
            id: row.get(0)?,
            title: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    pub(super) fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
        let role_raw: String = row.get(2)?;
        let metadata_raw: Option<String> = row.get(5)?;
        let metadata = metadata_raw
            .map(|value| {
                serde_json::from_str::<serde_json::Value>(&value).map_err(|error| {
                    SqlError::FromSqlConversionFailure(5, Type::Text, Box::new(error))
                })
            })
            .transpose()?;

        Ok(StoredMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: Self::str_to_role(&role_raw, 2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
            metadata,
        })
    }
}

/// First `TITLE_MAX_CHARS` characters of the first user message, with a
/// trailing ellipsis when truncated.
pub(super) fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let prefix: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{prefix}...")
}

impl ConversationStore for SqliteConversationStore {
    fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError> {
        let conn = self.lock_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| {
            row.get(0)
        })?;

        let id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339();
        // Default title numbering is recomputed from the current store
        // size, not a running total.
        let resolved_title = match title {
            Some(title) => title.to_string(),
            None => format!("Conversation {}", count + 1),
        };

        conn.execute(
            "INSERT INTO conversations (id, title, custom_title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, resolved_title, i64::from(title.is_some()), timestamp],
        )?;

        Ok(Conversation {
            id,
            title: resolved_title,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        })
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let conn = self.lock_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at
             FROM conversations
             WHERE id = ?1",
        )?;

        stmt.query_row(params![id], Self::map_conversation_row)
            .optional()
            .map_err(Into::into)
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let conn = self.lock_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at
             FROM conversations
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], Self::map_conversation_row)?;
        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    fn rename_conversation(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let conn = self.lock_connection()?;
        let updated = conn.execute(
            "UPDATE conversations
             SET title = ?1, custom_title = 1, updated_at = ?2
             WHERE id = ?3",
            params![title, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock_connection()?;
        // ON DELETE CASCADE removes the messages in the same statement, so
        // readers never observe an orphaned message.
        let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<StoredMessage, StoreError> {
        let mut conn = self.lock_connection()?;
        let tx = conn.transaction()?;

        let custom_title: Option<i64> = tx
            .query_row(
                "SELECT custom_title FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(custom_title) = custom_title else {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        };

        let created_at = Utc::now().to_rfc3339();
        let metadata_text = metadata.as_ref().map(serde_json::Value::to_string);

        tx.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                Self::role_to_str(role),
                content,
                created_at,
                metadata_text
            ],
        )?;
        let message_id = tx.last_insert_rowid();

        // First user message titles an untitled conversation.
        if role == MessageRole::User && custom_title == 0 {
            let prior_user_messages: i64 = tx.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND role = 'user' AND id < ?2",
                params![conversation_id, message_id],
                |row| row.get(0),
            )?;
            if prior_user_messages == 0 {
                tx.execute(
                    "UPDATE conversations SET title = ?1 WHERE id = ?2",
                    params![derive_title(content), conversation_id],
                )?;
            }
        }

        tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![created_at, conversation_id],
        )?;
        tx.commit()?;

        Ok(StoredMessage {
            id: message_id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at,
            metadata,
        })
    }

    fn update_message(&self, message_id: i64, content: &str) -> Result<bool, StoreError> {
        let conn = self.lock_connection()?;
        // Bumps the message's own timestamp; transcript order is id order,
        // so the message does not move.
        let updated = conn.execute(
            "UPDATE messages SET content = ?1, created_at = ?2 WHERE id = ?3",
            params![content, Utc::now().to_rfc3339(), message_id],
        )?;
        Ok(updated > 0)
    }

    fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.lock_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_at, metadata
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id], Self::map_message_row)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn count_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock_connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        usize::try_from(count)
            .map_err(|error| StoreError::StorageUnavailable(error.to_string()))
    }
}
