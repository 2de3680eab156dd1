use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};

/// One completed call: what was asked, what came back, and when it finished.
#[derive(Debug, Clone)]
pub struct HistoryEntry<Req, Res> {
    pub request: Req,
    pub response: Res,
    pub model: String,
    /// Assigned at completion, not at issue; entries are therefore in
    /// completion order.
    pub timestamp: DateTime<Utc>,
}

/// In-memory, per-feature record of completed calls.
///
/// The manager is the only appender; `remove` and `clear` exist for
/// user-triggered edits. Insertion order is preserved; presentation
/// direction is the caller's business.
pub struct HistoryLog<Req, Res> {
    entries: Mutex<Vec<HistoryEntry<Req, Res>>>,
}

impl<Req: Clone, Res: Clone> HistoryLog<Req, Res> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn append(&self, entry: HistoryEntry<Req, Res>) {
        self.lock().push(entry);
    }

    /// Cloned snapshot, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry<Req, Res>> {
        self.lock().clone()
    }

    pub fn remove(&self, index: usize) -> Option<HistoryEntry<Req, Res>> {
        let mut entries = self.lock();
        if index < entries.len() {
            Some(entries.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<HistoryEntry<Req, Res>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Req: Clone, Res: Clone> Default for HistoryLog<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}
