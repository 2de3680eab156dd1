mod rest;

pub use rest::RestProvider;

use crate::error::GenerateError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const MAX_FAILURE_CHARS: usize = 200;

/// Options applied to a single provider call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

/// What a provider call produced: a text part, a binary part, or both.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    pub text: Option<String>,
    pub data: Option<Vec<u8>>,
    pub mime_type: Option<String>,
}

impl ProviderOutput {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            data: None,
            mime_type: None,
        }
    }

    pub fn binary(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            text: None,
            data: Some(data),
            mime_type: Some(mime_type.into()),
        }
    }

    /// Text part, or an unusable-result failure.
    pub fn require_text(self) -> std::result::Result<String, ProviderFailure> {
        self.text
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ProviderFailure::unusable("model returned no text candidates"))
    }

    /// Binary part, or an unusable-result failure (the model answered with
    /// text where media was requested).
    pub fn require_data(self) -> std::result::Result<(Vec<u8>, String), ProviderFailure> {
        match (self.data, self.mime_type) {
            (Some(data), Some(mime)) if !data.is_empty() => Ok((data, mime)),
            _ => Err(ProviderFailure::unusable(
                "model returned text instead of the requested media",
            )),
        }
    }
}

/// Raw failure observed at the provider boundary, before classification.
///
/// Carries whatever the transport gave us: an HTTP status, a provider error
/// code (e.g. `PERMISSION_DENIED`), and a sanitized message.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl ProviderFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some("NETWORK".into()),
            message: sanitize_failure_text(&message.into()),
        }
    }

    pub fn http(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: sanitize_failure_text(&message.into()),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some("INVALID_ARGUMENT".into()),
            message: sanitize_failure_text(&message.into()),
        }
    }

    pub fn unusable(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some("UNUSABLE_RESULT".into()),
            message: sanitize_failure_text(&message.into()),
        }
    }

    /// Map this failure onto the user-facing taxonomy.
    ///
    /// First match wins; the order below is part of the contract. `Unknown`
    /// is the fallback. Performed exactly once, where the failure is first
    /// observed.
    pub fn classify(&self) -> GenerateError {
        let code = self.code.as_deref().unwrap_or("");
        let message = self.message.to_ascii_lowercase();

        if matches!(self.status, Some(401 | 403))
            || code == "PERMISSION_DENIED"
            || code == "UNAUTHENTICATED"
            || message.contains("api key")
            || message.contains("permission")
        {
            return GenerateError::CredentialRejected;
        }

        if self.status == Some(429)
            || code == "RESOURCE_EXHAUSTED"
            || message.contains("quota")
            || message.contains("rate limit")
        {
            return GenerateError::RateLimited;
        }

        if code == "NETWORK"
            || message.contains("network")
            || message.contains("timed out")
            || message.contains("connection")
            || message.contains("dns")
        {
            return GenerateError::Network;
        }

        if self.status == Some(400) || code == "INVALID_ARGUMENT" {
            return GenerateError::InvalidRequest;
        }

        if code == "UNUSABLE_RESULT"
            || message.contains("safety")
            || message.contains("blocked")
            || message.contains("no candidates")
            || message.contains("empty response")
        {
            return GenerateError::ProcessingFailed;
        }

        GenerateError::Unknown
    }
}

/// Remote generation backend. One method; the manager neither knows nor
/// cares about the wire schema beyond this shape.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn call(
        &self,
        model: &str,
        payload: Value,
        options: &CallOptions,
    ) -> std::result::Result<ProviderOutput, ProviderFailure>;
}

/// Scrub key-like tokens from provider error text and cap its length.
///
/// Failure messages end up in logs; they must never carry the credential
/// that was sent with the request.
pub fn sanitize_failure_text(input: &str) -> String {
    const KEY_MARKERS: [&str; 4] = ["AIza", "sk-", "Bearer ", "key="];

    let mut scrubbed = input.to_string();
    for marker in KEY_MARKERS {
        let mut search_from = 0;
        while let Some(rel) = scrubbed[search_from..].find(marker) {
            let start = search_from + rel;
            let token_start = start + marker.len();
            let token_end = scrubbed[token_start..]
                .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
                .map_or(scrubbed.len(), |offset| token_start + offset);
            if token_end == token_start {
                search_from = token_start;
                continue;
            }
            scrubbed.replace_range(start..token_end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    // Cap measured in characters, so the cut index is a char index too.
    match scrubbed.char_indices().nth(MAX_FAILURE_CHARS) {
        Some((cut, _)) => format!("{}...", &scrubbed[..cut]),
        None => scrubbed,
    }
}
