//! Cohere adapter over the `/generate` endpoint.
//!
//! Cohere takes a single prompt, so only the final message of the
//! conversation is sent.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{LogLevel, LogSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::base::{AuthScheme, BaseAdapter, ProviderClient};
use super::sse::{self, DONE_MARKER, FrameAction, FrameMapper, SseEvent};
use super::{ChatStream, VendorAdapter};
use crate::error::ProviderError;
use crate::types::{ChatRequest, ChatResponse, FinishReason, StreamChunk, TokenUsage, VendorModel};

const KNOWN_MODELS: &[&str] = &["command", "base", "command-light"];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    message: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    token_count: TokenCount,
}

#[derive(Debug, Default, Deserialize)]
struct TokenCount {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    response_tokens: u32,
    total_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct CohereAdapter {
    base: BaseAdapter,
}

impl CohereAdapter {
    pub fn new(client: &ProviderClient, sink: Arc<dyn LogSink>) -> Result<Self, ProviderError> {
        let mut base = BaseAdapter::new(client, AuthScheme::Bearer, sink)?;
        base.set_header("accept", "application/json")?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseAdapter {
        &mut self.base
    }

    fn build_body(request: &ChatRequest, stream: bool) -> GenerateRequest<'_> {
        GenerateRequest {
            message: request.last_message(),
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }
}

#[async_trait]
impl VendorAdapter for CohereAdapter {
    fn vendor(&self) -> &str {
        self.base.vendor()
    }

    async fn chat_completion(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        request.validate(self.base.vendor())?;
        let body = Self::build_body(request, false);
        let resp = self.base.post_json("/generate", &body, cancel).await?;
        let data: GenerateResponse = self.base.read_json(resp, cancel).await?;

        let count = data.token_count;
        let usage = TokenUsage {
            prompt_tokens: count.prompt_tokens,
            completion_tokens: count.response_tokens,
            total_tokens: count
                .total_tokens
                .unwrap_or(count.prompt_tokens + count.response_tokens),
        };
        Ok(ChatResponse::single(
            data.response_id,
            request.model.clone(),
            data.text,
            Some(FinishReason::Stop),
            usage,
        ))
    }

    async fn stream_chat_completion(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        request.validate(self.base.vendor())?;
        let body = Self::build_body(request, true);
        let resp = self.base.post_json("/generate", &body, &cancel).await?;

        self.base.log(
            LogLevel::Debug,
            "stream opened",
            relay_core::fields!("model" => request.model.clone()),
        );
        Ok(sse::spawn_stream(
            resp,
            CohereFrames::default(),
            self.base.vendor(),
            self.base.sink(),
            cancel,
        ))
    }

    async fn list_models(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<VendorModel>, ProviderError> {
        Ok(KNOWN_MODELS
            .iter()
            .map(|id| VendorModel {
                id: (*id).to_string(),
                owned_by: Some("cohere".into()),
                created: None,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Stream frames
// ---------------------------------------------------------------------------

/// Cohere frames are either `{"text": ...}` objects, an `is_finished`
/// marker, or bare text lines that are forwarded as-is.
#[derive(Debug)]
pub struct CohereFrames {
    id: String,
}

impl Default for CohereFrames {
    fn default() -> Self {
        Self {
            id: format!("cohere-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl FrameMapper for CohereFrames {
    fn map(&mut self, event: &SseEvent) -> FrameAction {
        let data = event.data.trim();
        if data.is_empty() {
            return FrameAction::Skip;
        }
        if data == DONE_MARKER {
            return FrameAction::Done;
        }
        if !data.starts_with('{') {
            // Surrounding whitespace separates streamed words.
            return FrameAction::Emit(StreamChunk::text(self.id.clone(), event.data.as_str()));
        }

        let Ok(json) = serde_json::from_str::<Value>(data) else {
            return FrameAction::Skip;
        };
        if json.get("is_finished").and_then(Value::as_bool) == Some(true) {
            return FrameAction::Done;
        }
        match json.get("text").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => {
                FrameAction::Emit(StreamChunk::text(self.id.clone(), text))
            }
            _ => FrameAction::Skip,
        }
    }
}
