//! Thin per-tool configurations for the generic lifecycle engine.
//!
//! Each studio tool is a [`Feature`]: a model id plus the payload mapping
//! for its request/response pair. The lifecycle itself (readiness,
//! single-flight, classification, history) is shared.

use crate::conversations::MessageRole;
use crate::providers::{ProviderFailure, ProviderOutput};
use crate::service::Feature;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Raw media bytes plus their mime tag, for inline upload.
#[derive(Debug, Clone)]
pub struct EncodedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl EncodedMedia {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Inline-data payload part. Base64-encoding a large video or PDF is
    /// the expensive pre-step the engine re-checks cancellation after.
    fn to_inline_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": BASE64.encode(&self.bytes),
            }
        })
    }
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "model",
    }
}

// ─── Text chat ──────────────────────────────────────────────────────────────

pub struct TextChat {
    model: String,
    system_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    /// Prior turns, oldest first. The conversation front-end fills this
    /// from the store's transcript.
    pub context: Vec<ChatTurn>,
}

impl ChatRequest {
    pub fn bare(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
}

impl TextChat {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl Feature for TextChat {
    type Request = ChatRequest;
    type Response = ChatReply;

    fn model(&self) -> &str {
        &self.model
    }

    async fn prepare(&self, request: &ChatRequest) -> Result<Value, ProviderFailure> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderFailure::invalid("prompt must not be empty"));
        }

        let mut contents: Vec<Value> = request
            .context
            .iter()
            .map(|turn| {
                json!({
                    "role": role_label(turn.role),
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": request.prompt }],
        }));

        let mut payload = json!({ "contents": contents });
        if let Some(system) = &self.system_prompt {
            payload["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        Ok(payload)
    }

    fn parse(&self, output: ProviderOutput) -> Result<ChatReply, ProviderFailure> {
        Ok(ChatReply {
            text: output.require_text()?,
        })
    }
}

// ─── Image generation / editing ─────────────────────────────────────────────

pub struct ImageStudio {
    model: String,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    /// Present when editing an existing image rather than generating one.
    pub base_image: Option<EncodedMedia>,
}

#[derive(Debug, Clone)]
pub struct ImageResult {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ImageStudio {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl Feature for ImageStudio {
    type Request = ImageRequest;
    type Response = ImageResult;

    fn model(&self) -> &str {
        &self.model
    }

    async fn prepare(&self, request: &ImageRequest) -> Result<Value, ProviderFailure> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderFailure::invalid("prompt must not be empty"));
        }

        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(image) = &request.base_image {
            parts.push(image.to_inline_part());
        }
        Ok(json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE"] },
        }))
    }

    fn parse(&self, output: ProviderOutput) -> Result<ImageResult, ProviderFailure> {
        let (data, mime_type) = output.require_data()?;
        Ok(ImageResult { data, mime_type })
    }
}

// ─── Speech synthesis ───────────────────────────────────────────────────────

pub struct SpeechSynthesis {
    model: String,
    voice: String,
}

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl SpeechSynthesis {
    pub fn new(model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            voice: voice.into(),
        }
    }
}

#[async_trait]
impl Feature for SpeechSynthesis {
    type Request = SpeechRequest;
    type Response = AudioClip;

    fn model(&self) -> &str {
        &self.model
    }

    async fn prepare(&self, request: &SpeechRequest) -> Result<Value, ProviderFailure> {
        if request.text.trim().is_empty() {
            return Err(ProviderFailure::invalid("text must not be empty"));
        }
        Ok(json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.voice } }
                },
            },
        }))
    }

    fn parse(&self, output: ProviderOutput) -> Result<AudioClip, ProviderFailure> {
        let (data, mime_type) = output.require_data()?;
        Ok(AudioClip { data, mime_type })
    }
}

// ─── Video / PDF analysis ───────────────────────────────────────────────────

pub struct MediaAnalysis {
    model: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub media: EncodedMedia,
}

impl MediaAnalysis {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl Feature for MediaAnalysis {
    type Request = AnalysisRequest;
    type Response = String;

    fn model(&self) -> &str {
        &self.model
    }

    async fn prepare(&self, request: &AnalysisRequest) -> Result<Value, ProviderFailure> {
        if request.media.bytes.is_empty() {
            return Err(ProviderFailure::invalid("media payload is empty"));
        }
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": [request.media.to_inline_part(), { "text": request.prompt }],
            }],
        }))
    }

    fn parse(&self, output: ProviderOutput) -> Result<String, ProviderFailure> {
        output.require_text()
    }
}

// ─── Points of interest ─────────────────────────────────────────────────────

pub struct PointsOfInterest {
    model: String,
}

#[derive(Debug, Clone)]
pub struct PoiRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointOfInterest {
    pub name: String,
    pub description: String,
    pub lat: f64,
    pub lng: f64,
}

impl PointsOfInterest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl Feature for PointsOfInterest {
    type Request = PoiRequest;
    type Response = Vec<PointOfInterest>;

    fn model(&self) -> &str {
        &self.model
    }

    async fn prepare(&self, request: &PoiRequest) -> Result<Value, ProviderFailure> {
        if request.query.trim().is_empty() {
            return Err(ProviderFailure::invalid("query must not be empty"));
        }
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!(
                    "List points of interest for: {}. \
                     Respond with a JSON array of objects with keys \
                     name, description, lat, lng.",
                    request.query
                ) }],
            }],
            "generationConfig": { "responseMimeType": "application/json" },
        }))
    }

    fn parse(&self, output: ProviderOutput) -> Result<Vec<PointOfInterest>, ProviderFailure> {
        let text = output.require_text()?;
        let trimmed = strip_code_fence(&text);
        serde_json::from_str(trimmed).map_err(|error| {
            ProviderFailure::unusable(format!("model reply was not a POI array: {error}"))
        })
    }
}

/// Models sometimes wrap JSON replies in a markdown fence despite the
/// requested mime type.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_prepare_includes_context_and_system_prompt() {
        let feature = TextChat::new("text-model").with_system_prompt("be brief");
        let request = ChatRequest {
            prompt: "and now?".into(),
            context: vec![ChatTurn {
                role: MessageRole::Assistant,
                text: "earlier".into(),
            }],
        };

        let payload = feature.prepare(&request).await.unwrap();
        let contents = payload["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "and now?");
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[tokio::test]
    async fn chat_prepare_rejects_empty_prompt() {
        let feature = TextChat::new("text-model");
        let failure = feature
            .prepare(&ChatRequest::bare("   "))
            .await
            .unwrap_err();
        assert_eq!(failure.code.as_deref(), Some("INVALID_ARGUMENT"));
    }

    #[tokio::test]
    async fn image_prepare_attaches_base_image_part() {
        let feature = ImageStudio::new("image-model");
        let request = ImageRequest {
            prompt: "make it blue".into(),
            base_image: Some(EncodedMedia::new(vec![1, 2, 3], "image/png")),
        };

        let payload = feature.prepare(&request).await.unwrap();
        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
    }

    #[test]
    fn image_parse_rejects_text_only_output() {
        let feature = ImageStudio::new("image-model");
        let failure = feature
            .parse(ProviderOutput::text_only("sorry, no"))
            .unwrap_err();
        assert_eq!(failure.code.as_deref(), Some("UNUSABLE_RESULT"));
    }

    #[tokio::test]
    async fn speech_prepare_names_the_voice() {
        let feature = SpeechSynthesis::new("tts-model", "Aurora");
        let payload = feature
            .prepare(&SpeechRequest { text: "hi".into() })
            .await
            .unwrap();
        assert_eq!(
            payload["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Aurora"
        );
    }

    #[tokio::test]
    async fn analysis_prepare_puts_media_before_prompt() {
        let feature = MediaAnalysis::new("analysis-model");
        let request = AnalysisRequest {
            prompt: "summarize".into(),
            media: EncodedMedia::new(b"pdf-bytes".to_vec(), "application/pdf"),
        };

        let payload = feature.prepare(&request).await.unwrap();
        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        assert!(parts[0].get("inlineData").is_some());
        assert_eq!(parts[1]["text"], "summarize");
    }

    #[test]
    fn poi_parse_reads_plain_json_array() {
        let feature = PointsOfInterest::new("poi-model");
        let text = r#"[{"name":"Tower","description":"old","lat":1.5,"lng":2.5}]"#;

        let pois = feature.parse(ProviderOutput::text_only(text)).unwrap();
        assert_eq!(pois.len(), 1);
        assert_eq!(pois[0].name, "Tower");
    }

    #[test]
    fn poi_parse_strips_markdown_fence() {
        let feature = PointsOfInterest::new("poi-model");
        let text = "```json\n[{\"name\":\"A\",\"description\":\"b\",\"lat\":0.0,\"lng\":0.0}]\n```";

        let pois = feature.parse(ProviderOutput::text_only(text)).unwrap();
        assert_eq!(pois.len(), 1);
    }

    #[test]
    fn poi_parse_rejects_non_json_reply() {
        let feature = PointsOfInterest::new("poi-model");
        let failure = feature
            .parse(ProviderOutput::text_only("I suggest the old town"))
            .unwrap_err();
        assert_eq!(failure.code.as_deref(), Some("UNUSABLE_RESULT"));
    }
}
