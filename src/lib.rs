#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod conversations;
pub mod credentials;
pub mod error;
pub mod features;
pub mod providers;
pub mod service;

pub use config::Config;
pub use conversations::{ConversationManager, ConversationStore, SqliteConversationStore};
pub use credentials::{Credential, CredentialStatus, CredentialStore};
pub use error::{CoreError, GenerateError, Result, StoreError};
pub use service::{Feature, GenerationManager, HistoryLog, ServiceState};
