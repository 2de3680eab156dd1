mod history;
mod manager;

pub use history::{HistoryEntry, HistoryLog};
pub use manager::{Feature, GenerationManager, ProviderFactory, ServiceState};
