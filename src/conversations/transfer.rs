use super::store::SqliteConversationStore;
use super::types::MessageRole;
use crate::error::StoreError;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Durable serialization contract for one conversation. Field names are
/// frozen: existing exports must keep importing across store versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub title: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    #[serde(default)]
    pub messages: Vec<MessageExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageExport {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Outcome of an import call. The valid subset of a batch is imported;
/// malformed elements are counted, not silently dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

impl ImportReport {
    pub fn accepted_any(&self) -> bool {
        self.imported > 0
    }
}

impl SqliteConversationStore {
    /// Lossless export of one conversation with its ordered transcript.
    pub fn export_conversation(&self, id: &str) -> Result<String, StoreError> {
        let export = self
            .read_export(id)?
            .ok_or_else(|| StoreError::ConversationNotFound(id.to_string()))?;
        serde_json::to_string_pretty(&export)
            .map_err(|error| StoreError::StorageUnavailable(error.to_string()))
    }

    /// Every conversation as a JSON array, most recently updated first.
    pub fn export_all(&self) -> Result<String, StoreError> {
        let ids: Vec<String> = {
            let conn = self.lock_connection()?;
            let mut stmt = conn.prepare(
                "SELECT id FROM conversations ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        let mut exports = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(export) = self.read_export(&id)? {
                exports.push(export);
            }
        }
        serde_json::to_string_pretty(&exports)
            .map_err(|error| StoreError::StorageUnavailable(error.to_string()))
    }

    /// Import a single exported conversation or an exported array.
    ///
    /// Every element is validated against the minimal shape (title plus
    /// both timestamps; messages optional) and inserted under a freshly
    /// generated id — imported ids are never reused, so an import can
    /// never collide with local data. Invalid elements are skipped and
    /// counted. A blob that is not a conversation object or array at all
    /// yields an empty report with the store untouched.
    pub fn import_conversations(&self, blob: &str) -> Result<ImportReport, StoreError> {
        let Ok(value) = serde_json::from_str::<Value>(blob) else {
            return Ok(ImportReport::default());
        };

        let elements: Vec<Value> = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            _ => return Ok(ImportReport::default()),
        };

        let mut report = ImportReport::default();
        for element in elements {
            match serde_json::from_value::<ConversationExport>(element) {
                Ok(export) => {
                    self.insert_export(&export)?;
                    report.imported += 1;
                }
                Err(error) => {
                    tracing::warn!(%error, "skipping malformed conversation in import");
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    fn read_export(&self, id: &str) -> Result<Option<ConversationExport>, StoreError> {
        let conn = self.lock_connection()?;

        let header = {
            let mut stmt = conn.prepare(
                "SELECT title, created_at, updated_at FROM conversations WHERE id = ?1",
            )?;
            stmt.query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map(Some)
            .or_else(|error| match error {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?
        };
        let Some((title, created_at, updated_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT role, content, created_at, metadata
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            let role_raw: String = row.get(0)?;
            let metadata_raw: Option<String> = row.get(3)?;
            Ok((role_raw, row.get::<_, String>(1)?, row.get::<_, String>(2)?, metadata_raw))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role_raw, content, timestamp, metadata_raw) = row?;
            let role = Self::str_to_role(&role_raw, 0)?;
            let metadata = metadata_raw
                .map(|text| serde_json::from_str(&text))
                .transpose()
                .map_err(|error| StoreError::StorageUnavailable(error.to_string()))?;
            messages.push(MessageExport {
                role,
                content,
                timestamp,
                metadata,
            });
        }

        Ok(Some(ConversationExport {
            title,
            created_at,
            updated_at,
            messages,
        }))
    }

    /// One transaction per conversation: either the whole thread lands or
    /// none of it does.
    pub(super) fn insert_export(&self, export: &ConversationExport) -> Result<String, StoreError> {
        let mut conn = self.lock_connection()?;
        let tx = conn.transaction()?;

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO conversations (id, title, custom_title, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)",
            params![id, export.title, export.created_at, export.updated_at],
        )?;

        for message in &export.messages {
            let metadata_text = message.metadata.as_ref().map(Value::to_string);
            tx.execute(
                "INSERT INTO messages (conversation_id, role, content, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    Self::role_to_str(message.role),
                    message.content,
                    message.timestamp,
                    metadata_text
                ],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::store::ConversationStore;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, SqliteConversationStore) {
        let db_file = NamedTempFile::new().unwrap();
        let store = SqliteConversationStore::new(db_file.path()).unwrap();
        (db_file, store)
    }

    #[test]
    fn export_import_round_trips_content_under_a_new_id() {
        let (_f1, source) = store();
        let conversation = source.create_conversation(None).unwrap();
        source
            .add_message(&conversation.id, MessageRole::User, "Hello", None)
            .unwrap();
        source
            .add_message(&conversation.id, MessageRole::Assistant, "Hi there", None)
            .unwrap();

        let blob = source.export_conversation(&conversation.id).unwrap();

        let (_f2, target) = store();
        let report = target.import_conversations(&blob).unwrap();
        assert_eq!(report, ImportReport { imported: 1, skipped: 0 });

        let imported = &target.list_conversations().unwrap()[0];
        assert_ne!(imported.id, conversation.id);
        assert_eq!(imported.title, "Hello");

        let messages = target.get_messages(&imported.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hi there");
    }

    #[test]
    fn export_all_round_trips_every_conversation() {
        let (_f1, source) = store();
        for n in 0..3 {
            let conversation = source.create_conversation(None).unwrap();
            source
                .add_message(&conversation.id, MessageRole::User, &format!("m{n}"), None)
                .unwrap();
        }

        let blob = source.export_all().unwrap();

        let (_f2, target) = store();
        let report = target.import_conversations(&blob).unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(target.list_conversations().unwrap().len(), 3);
    }

    #[test]
    fn export_unknown_conversation_fails() {
        let (_f, store) = store();
        assert!(matches!(
            store.export_conversation("missing"),
            Err(StoreError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn malformed_blob_imports_nothing() {
        let (_f, store) = store();

        let report = store.import_conversations("not json at all").unwrap();
        assert_eq!(report, ImportReport::default());
        assert!(!report.accepted_any());
        assert!(store.list_conversations().unwrap().is_empty());

        let report = store.import_conversations("42").unwrap();
        assert_eq!(report, ImportReport::default());
    }

    #[test]
    fn half_valid_batch_imports_the_valid_subset() {
        let (_f, store) = store();
        let blob = r#"[
            {"title": "Good", "createdAt": "2024-01-01T00:00:00Z",
             "updatedAt": "2024-01-01T00:00:00Z",
             "messages": [{"role": "user", "content": "hi",
                           "timestamp": "2024-01-01T00:00:00Z"}]},
            {"title": "Missing timestamps"}
        ]"#;

        let report = store.import_conversations(blob).unwrap();
        assert_eq!(report, ImportReport { imported: 1, skipped: 1 });

        let conversations = store.list_conversations().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].title, "Good");
    }

    #[test]
    fn imported_ids_are_always_fresh() {
        let (_f, store) = store();
        let blob = r#"{"title": "T", "createdAt": "2024-01-01T00:00:00Z",
                       "updatedAt": "2024-01-01T00:00:00Z"}"#;

        store.import_conversations(blob).unwrap();
        store.import_conversations(blob).unwrap();

        let conversations = store.list_conversations().unwrap();
        assert_eq!(conversations.len(), 2);
        assert_ne!(conversations[0].id, conversations[1].id);
    }

    #[test]
    fn messages_field_is_optional_on_import() {
        let (_f, store) = store();
        let blob = r#"{"title": "Bare", "createdAt": "2024-01-01T00:00:00Z",
                       "updatedAt": "2024-01-02T00:00:00Z"}"#;

        let report = store.import_conversations(blob).unwrap();
        assert_eq!(report.imported, 1);

        let conversation = &store.list_conversations().unwrap()[0];
        assert_eq!(conversation.created_at, "2024-01-01T00:00:00Z");
        assert!(store.get_messages(&conversation.id).unwrap().is_empty());
    }

    #[test]
    fn metadata_survives_the_round_trip() {
        let (_f1, source) = store();
        let conversation = source.create_conversation(None).unwrap();
        let meta = serde_json::json!({ "model": "text-model" });
        source
            .add_message(
                &conversation.id,
                MessageRole::Assistant,
                "reply",
                Some(meta.clone()),
            )
            .unwrap();

        let blob = source.export_conversation(&conversation.id).unwrap();
        let (_f2, target) = store();
        target.import_conversations(&blob).unwrap();

        let imported = &target.list_conversations().unwrap()[0];
        let messages = target.get_messages(&imported.id).unwrap();
        assert_eq!(messages[0].metadata, Some(meta));
    }
}
