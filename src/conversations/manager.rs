use super::store::{ConversationStore, SqliteConversationStore};
use super::types::{Conversation, MessageRole, StoredMessage};
use crate::error::StoreError;
use std::sync::{Arc, Mutex, PoisonError};

/// Front-end convenience over the CRUD store: tracks the conversation the
/// user currently has open and records whole turns.
///
/// The store itself never auto-creates (an unknown id is an error); the
/// create-on-first-turn policy lives here, where it is explicit.
pub struct ConversationManager {
    store: Arc<SqliteConversationStore>,
    active: Mutex<Option<String>>,
}

impl ConversationManager {
    pub fn new(store: Arc<SqliteConversationStore>) -> Self {
        Self {
            store,
            active: Mutex::new(None),
        }
    }

    /// Make an existing conversation the active one.
    pub fn open(&self, id: &str) -> Result<Conversation, StoreError> {
        let conversation = self
            .store
            .get_conversation(id)?
            .ok_or_else(|| StoreError::ConversationNotFound(id.to_string()))?;
        *self.active_slot() = Some(conversation.id.clone());
        Ok(conversation)
    }

    /// Start a fresh conversation and make it active.
    pub fn start_new(&self) -> Result<Conversation, StoreError> {
        let conversation = self.store.create_conversation(None)?;
        *self.active_slot() = Some(conversation.id.clone());
        Ok(conversation)
    }

    /// Deactivate without deleting anything.
    pub fn close(&self) {
        *self.active_slot() = None;
    }

    pub fn active_id(&self) -> Option<String> {
        self.active_slot().clone()
    }

    /// Persist one exchange. Creates (and activates) a conversation first
    /// when none is open.
    pub fn record_turn(
        &self,
        user_text: &str,
        assistant_text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, StoreError> {
        let conversation_id = match self.active_id() {
            Some(id) => id,
            None => self.start_new()?.id,
        };

        self.store
            .add_message(&conversation_id, MessageRole::User, user_text, None)?;
        self.store.add_message(
            &conversation_id,
            MessageRole::Assistant,
            assistant_text,
            metadata,
        )?;
        Ok(conversation_id)
    }

    /// Transcript of the active conversation, oldest first. Empty when
    /// nothing is open.
    pub fn transcript(&self) -> Result<Vec<StoredMessage>, StoreError> {
        match self.active_id() {
            Some(id) => self.store.get_messages(&id),
            None => Ok(Vec::new()),
        }
    }

    /// Delete the active conversation; the manager ends up with none open.
    pub fn delete_active(&self) -> Result<bool, StoreError> {
        let Some(id) = self.active_id() else {
            return Ok(false);
        };
        let deleted = self.store.delete_conversation(&id)?;
        self.close();
        Ok(deleted)
    }

    pub fn store(&self) -> &SqliteConversationStore {
        self.store.as_ref()
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
