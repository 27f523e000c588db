use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A single conversation turn in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Vendor-neutral chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stream: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Check the request before it is allowed anywhere near the network.
    ///
    /// `max_tokens` cannot be negative by construction.
    pub fn validate(&self, vendor: &str) -> Result<(), ProviderError> {
        if self.model.trim().is_empty() {
            return Err(ProviderError::invalid_request(vendor, "model id must not be empty"));
        }
        if self.messages.is_empty() {
            return Err(ProviderError::invalid_request(
                vendor,
                "at least one message is required",
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ProviderError::invalid_request(
                    vendor,
                    format!("temperature {t} outside [0, 2]"),
                ));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(ProviderError::invalid_request(
                    vendor,
                    format!("top_p {p} outside [0, 1]"),
                ));
            }
        }
        Ok(())
    }

    /// Content of the final message, used by vendors that take a single prompt.
    pub fn last_message(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Token usage statistics returned by vendors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Map a vendor stop string onto the canonical set.
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "length" | "max_tokens" | "MAX_TOKENS" => Self::Length,
            "content_filter" | "safety" | "SAFETY" => Self::ContentFilter,
            "error" | "ERROR" => Self::Error,
            _ => Self::Stop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Complete, immutable response from a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Single-choice response, the shape every vendor here produces.
    pub fn single(
        id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        finish_reason: Option<FinishReason>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                role: MessageRole::Assistant,
                content: content.into(),
                finish_reason,
            }],
            usage,
        }
    }

    /// Text of the first choice, or `""` when the vendor returned none.
    pub fn content(&self) -> &str {
        self.choices.first().map(|c| c.content.as_str()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// One incremental piece of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub choices: Vec<ChunkChoice>,
}

impl StreamChunk {
    pub fn text(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: delta.into(),
                finish_reason: None,
            }],
        }
    }

    pub fn finished(id: impl Into<String>, reason: FinishReason) -> Self {
        Self {
            id: id.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: String::new(),
                finish_reason: Some(reason),
            }],
        }
    }

    /// Delta text of the first choice.
    pub fn delta(&self) -> &str {
        self.choices.first().map(|c| c.delta.as_str()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A model as reported by a vendor's list-models call, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorModel {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
}

impl VendorModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owned_by: None,
            created: None,
        }
    }
}

/// Which discovery tier produced a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Config,
    Api,
    Fallback,
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Api => write!(f, "api"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFeatures {
    pub streaming: bool,
    pub brotli: bool,
    pub http3: bool,
    pub structured_output: bool,
}

/// A resolved model ready to be surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub vendor: String,
    pub name: String,
    pub display_name: String,
    pub features: ModelFeatures,
    pub max_tokens: u32,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    pub is_free: bool,
    pub is_open_source: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    pub source: ModelSource,
}

impl Model {
    /// Bare model with the id doubling as its name.
    pub fn new(vendor: impl Into<String>, id: impl Into<String>, source: ModelSource) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            display_name: id.clone(),
            id,
            vendor: vendor.into(),
            features: ModelFeatures::default(),
            max_tokens: 0,
            input_cost_per_mtok: 0.0,
            output_cost_per_mtok: 0.0,
            is_free: false,
            is_open_source: false,
            response_time_ms: None,
            source,
        }
    }

    /// Cache/verification key: `vendor:model`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.vendor, self.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn request() -> ChatRequest {
        ChatRequest::new("gpt-4", vec![ChatMessage::user("Hello")])
    }

    #[test]
    fn valid_request_passes() {
        let req = request().with_temperature(2.0).with_top_p(0.0).with_max_tokens(0);
        assert!(req.validate("openai").is_ok());
    }

    #[test]
    fn empty_model_is_invalid() {
        let mut req = request();
        req.model = "  ".into();
        let err = req.validate("openai").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(!err.retryable);
        assert_eq!(err.status, None);
    }

    #[test]
    fn empty_messages_are_invalid() {
        let req = ChatRequest::new("gpt-4", vec![]);
        assert_eq!(req.validate("openai").unwrap_err().kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn out_of_range_sampling_is_invalid() {
        assert!(request().with_temperature(2.01).validate("x").is_err());
        assert!(request().with_temperature(-0.1).validate("x").is_err());
        assert!(request().with_top_p(1.5).validate("x").is_err());
        assert!(request().with_temperature(f32::NAN).validate("x").is_err());
    }

    #[test]
    fn last_message_of_conversation() {
        let req = ChatRequest::new(
            "command",
            vec![ChatMessage::system("be brief"), ChatMessage::user("Hi there")],
        );
        assert_eq!(req.last_message(), "Hi there");
    }

    #[test]
    fn chunk_json_round_trip() {
        let chunk = StreamChunk::text("chunk-1", "Hi");
        let json = serde_json::to_string(&chunk).unwrap();
        let back: StreamChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);

        let done = StreamChunk::finished("chunk-1", FinishReason::Length);
        let back: StreamChunk = serde_json::from_str(&serde_json::to_string(&done).unwrap()).unwrap();
        assert_eq!(back, done);
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_vendor("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_vendor("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_vendor("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::from_vendor("content_filter"), FinishReason::ContentFilter);
    }

    #[test]
    fn model_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ModelSource::Fallback).unwrap(), "\"fallback\"");
        assert_eq!(ModelSource::Api.to_string(), "api");
    }

    #[test]
    fn response_content_of_first_choice() {
        let resp = ChatResponse::single("r1", "gpt-4", "Hello!", Some(FinishReason::Stop), TokenUsage::new(3, 2));
        assert_eq!(resp.content(), "Hello!");
        assert_eq!(resp.usage.total_tokens, 5);
    }
}
