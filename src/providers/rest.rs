use super::{CallOptions, Provider, ProviderFailure, ProviderOutput, sanitize_failure_text};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Bearer-token JSON provider speaking the REST generation endpoint.
///
/// One instance is built per credential; the pooled client is reused across
/// calls until the credential changes.
pub struct RestProvider {
    base_url: String,
    /// Pre-computed `"Bearer <key>"` header value (avoids `format!` per request).
    cached_auth_header: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: Option<String>,
    message: Option<String>,
}

impl RestProvider {
    pub fn new(base_url: impl Into<String>, api_key: &str) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cached_auth_header: format!("Bearer {api_key}"),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Pull the first text and inline-data parts out of a response body.
    ///
    /// The wire shape is `candidates[0].content.parts[]` where each part is
    /// either `{text}` or `{inlineData: {mimeType, data}}`. Anything else
    /// is treated as an empty output and surfaces as an unusable result
    /// downstream.
    fn extract_output(body: &Value) -> std::result::Result<ProviderOutput, ProviderFailure> {
        let mut output = ProviderOutput::default();

        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array);

        let Some(parts) = parts else {
            let reason = body
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            return Err(ProviderFailure::unusable(format!(
                "response carried no candidates (finish reason: {reason})"
            )));
        };

        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                match &mut output.text {
                    Some(existing) => existing.push_str(text),
                    None => output.text = Some(text.to_string()),
                }
            } else if let Some(inline) = part.get("inlineData") {
                let mime = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream");
                let encoded = inline.get("data").and_then(Value::as_str).unwrap_or("");
                let decoded = BASE64.decode(encoded).map_err(|error| {
                    ProviderFailure::unusable(format!("inline data was not valid base64: {error}"))
                })?;
                output.data = Some(decoded);
                output.mime_type = Some(mime.to_string());
            }
        }

        Ok(output)
    }

    fn failure_from_error_body(status: u16, body: &str) -> ProviderFailure {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope { error: Some(error) }) => ProviderFailure::http(
                status,
                error.status,
                error.message.unwrap_or_else(|| "provider error".into()),
            ),
            _ => ProviderFailure::http(status, None, body),
        }
    }
}

#[async_trait]
impl Provider for RestProvider {
    async fn call(
        &self,
        model: &str,
        payload: Value,
        options: &CallOptions,
    ) -> std::result::Result<ProviderOutput, ProviderFailure> {
        let url = format!("{}/models/{model}:generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.cached_auth_header)
            .timeout(options.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                let detail = sanitize_failure_text(&error.to_string());
                if error.is_timeout() {
                    ProviderFailure::network(format!("request timed out: {detail}"))
                } else {
                    ProviderFailure::network(format!("network request failed: {detail}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let failure = Self::failure_from_error_body(status.as_u16(), &body);
            tracing::debug!(status = status.as_u16(), "provider call failed");
            return Err(failure);
        }

        let body: Value = response.json().await.map_err(|error| {
            ProviderFailure::unusable(format!("response body was not valid JSON: {error}"))
        })?;

        Self::extract_output(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_output_collects_text_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] }
            }]
        });

        let output = RestProvider::extract_output(&body).unwrap();
        assert_eq!(output.text.as_deref(), Some("Hello world"));
        assert!(output.data.is_none());
    }

    #[test]
    fn extract_output_decodes_inline_data() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{
                    "inlineData": { "mimeType": "image/png", "data": "aGk=" }
                }] }
            }]
        });

        let output = RestProvider::extract_output(&body).unwrap();
        assert_eq!(output.data.as_deref(), Some(b"hi".as_slice()));
        assert_eq!(output.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn extract_output_reports_missing_candidates_with_finish_reason() {
        let body = json!({ "candidates": [{ "finishReason": "SAFETY" }] });

        let failure = RestProvider::extract_output(&body).unwrap_err();
        assert!(failure.message.contains("SAFETY"));
    }

    #[test]
    fn error_body_is_parsed_into_failure_fields() {
        let body = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded"}}"#;
        let failure = RestProvider::failure_from_error_body(429, body);

        assert_eq!(failure.status, Some(429));
        assert_eq!(failure.code.as_deref(), Some("RESOURCE_EXHAUSTED"));
        assert_eq!(failure.message, "Quota exceeded");
    }

    #[test]
    fn unparseable_error_body_keeps_raw_text() {
        let failure = RestProvider::failure_from_error_body(502, "bad gateway");
        assert_eq!(failure.status, Some(502));
        assert!(failure.code.is_none());
        assert_eq!(failure.message, "bad gateway");
    }
}
