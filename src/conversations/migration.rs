use super::store::SqliteConversationStore;
use super::transfer::{ConversationExport, MessageExport};
use super::types::MessageRole;
use crate::error::StoreError;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;

/// Record shape of the pre-store flat history file: a single JSON array of
/// turns, no conversation grouping.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    role: MessageRole,
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// One-time transfer of the legacy flat history into the structured store.
///
/// Idempotent through the file check: the legacy file is removed only after
/// the insert commits, so a second run finds nothing and is a no-op.
/// Returns `true` only when records were actually migrated. A file that no
/// longer parses is left in place for inspection and reported as `false`.
pub fn migrate_legacy_history(
    store: &SqliteConversationStore,
    legacy_path: &Path,
) -> Result<bool, StoreError> {
    if !legacy_path.exists() {
        return Ok(false);
    }

    let raw = std::fs::read_to_string(legacy_path)
        .map_err(|error| StoreError::StorageUnavailable(error.to_string()))?;

    let records: Vec<LegacyRecord> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(error) => {
            tracing::warn!(%error, path = %legacy_path.display(), "legacy history unreadable, leaving in place");
            return Ok(false);
        }
    };

    if records.is_empty() {
        remove_legacy_file(legacy_path);
        return Ok(false);
    }

    let now = Utc::now().to_rfc3339();
    let title = records
        .iter()
        .find(|record| record.role == MessageRole::User)
        .map_or_else(|| "Imported conversation".to_string(), |record| {
            super::store::derive_title(&record.content)
        });

    let messages: Vec<MessageExport> = records
        .into_iter()
        .map(|record| MessageExport {
            role: record.role,
            content: record.content,
            timestamp: record.timestamp.unwrap_or_else(|| now.clone()),
            metadata: None,
        })
        .collect();

    let created_at = messages[0].timestamp.clone();
    let updated_at = messages[messages.len() - 1].timestamp.clone();
    let export = ConversationExport {
        title,
        created_at,
        updated_at,
        messages,
    };

    let id = store.insert_export(&export)?;
    tracing::debug!(conversation = %id, "migrated legacy history");

    // Only after the transaction committed.
    remove_legacy_file(legacy_path);
    Ok(true)
}

fn remove_legacy_file(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        tracing::warn!(%error, path = %path.display(), "failed to remove migrated legacy history");
    }
}
