use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `atelier`.
///
/// Each subsystem defines its own error enum. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Generation ──────────────────────────────────────────────────────
    #[error("generate: {0}")]
    Generate(#[from] GenerateError),

    // ── Conversation storage ────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Config ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Generation errors ──────────────────────────────────────────────────────

/// Outcome taxonomy for a provider call.
///
/// Variants are unit-like on purpose: callers (and tests) branch on the
/// kind, never on message text. The raw provider message is logged at the
/// classification site and dropped. `Display` gives the short user-facing
/// line for each kind; `Cancelled` is never shown to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("an API key is required before generating")]
    CredentialMissing,

    #[error("the API key was rejected — check it and try again")]
    CredentialRejected,

    #[error("rate limit reached — wait a moment and retry")]
    RateLimited,

    #[error("network error while contacting the provider")]
    Network,

    #[error("the request was rejected as invalid")]
    InvalidRequest,

    #[error("the model could not produce a usable result")]
    ProcessingFailed,

    #[error("generation cancelled")]
    Cancelled,

    #[error("something went wrong — try again")]
    Unknown,
}

// ─── Conversation storage errors ────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::StorageUnavailable(error.to_string())
    }
}

// ─── Config errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
