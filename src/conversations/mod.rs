mod manager;
mod migration;
mod store;
mod transfer;
mod types;

pub use manager::ConversationManager;
pub use migration::migrate_legacy_history;
pub use store::{ConversationStore, SqliteConversationStore};
pub use transfer::{ConversationExport, ImportReport, MessageExport};
pub use types::{Conversation, MessageRole, StoredMessage};
