use tokio::sync::watch;

/// Validity of the current API credential.
///
/// A freshly entered token starts `Unverified`; the first successful
/// provider call promotes it to `Valid`, an auth rejection demotes it to
/// `Invalid` so managers fail fast instead of repeating a doomed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialStatus {
    #[default]
    Unverified,
    Valid,
    Invalid,
}

/// Snapshot of the credential state pushed to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub status: CredentialStatus,
}

impl Credential {
    pub fn is_set(&self) -> bool {
        !self.token.is_empty()
    }

    /// True when a manager may build a client handle from this credential.
    pub fn is_usable(&self) -> bool {
        self.is_set() && self.status != CredentialStatus::Invalid
    }
}

/// Session-scoped holder of the single API credential.
///
/// The store is the only writer of credential state. Managers subscribe for
/// change notification and call [`mark_valid`](CredentialStore::mark_valid)
/// / [`mark_invalid`](CredentialStore::mark_invalid) after provider
/// outcomes; they never touch the token itself.
pub struct CredentialStore {
    state: watch::Sender<Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Credential::default());
        Self { state }
    }

    /// Install a new token. Status resets to `Unverified` even if the same
    /// token was previously rejected, so the user can retry after fixing
    /// their account.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.state.send_replace(Credential {
            token,
            status: CredentialStatus::Unverified,
        });
    }

    /// Drop the credential entirely (logout-equivalent).
    pub fn clear(&self) {
        self.state.send_replace(Credential::default());
    }

    /// Record that a provider call succeeded with the current token.
    pub fn mark_valid(&self) {
        self.mark(CredentialStatus::Valid);
    }

    /// Record that the provider rejected the current token.
    pub fn mark_invalid(&self) {
        self.mark(CredentialStatus::Invalid);
    }

    fn mark(&self, status: CredentialStatus) {
        self.state.send_if_modified(|credential| {
            if !credential.is_set() || credential.status == status {
                return false;
            }
            credential.status = status;
            true
        });
    }

    pub fn current(&self) -> Credential {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Credential> {
        self.state.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_is_empty_and_unverified() {
        let store = CredentialStore::new();
        let credential = store.current();
        assert!(!credential.is_set());
        assert_eq!(credential.status, CredentialStatus::Unverified);
    }

    #[test]
    fn set_token_resets_status_to_unverified() {
        let store = CredentialStore::new();
        store.set_token("key-1");
        store.mark_invalid();
        assert_eq!(store.current().status, CredentialStatus::Invalid);

        store.set_token("key-2");
        assert_eq!(store.current().status, CredentialStatus::Unverified);
        assert!(store.current().is_usable());
    }

    #[test]
    fn mark_is_a_no_op_without_a_token() {
        let store = CredentialStore::new();
        store.mark_valid();
        assert_eq!(store.current().status, CredentialStatus::Unverified);
    }

    #[test]
    fn invalid_credential_is_not_usable() {
        let store = CredentialStore::new();
        store.set_token("key");
        store.mark_invalid();
        assert!(store.current().is_set());
        assert!(!store.current().is_usable());
    }

    #[tokio::test]
    async fn subscribers_see_token_changes() {
        let store = CredentialStore::new();
        let mut rx = store.subscribe();

        store.set_token("key");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().token, "key");

        store.clear();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_set());
    }
}
