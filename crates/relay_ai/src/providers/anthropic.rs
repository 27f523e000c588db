//! Anthropic (Claude) adapter.
//!
//! Talks to the Messages API (`/messages`). System turns are lifted into the
//! top-level `system` field, and streamed events are mapped onto canonical
//! chunks by [`AnthropicFrames`].

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{LogLevel, LogSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::base::{AuthScheme, BaseAdapter, ProviderClient};
use super::sse::{self, FrameAction, FrameMapper, SseEvent};
use super::{ChatStream, VendorAdapter};
use crate::error::{ErrorKind, ProviderError, codes};
use crate::types::{
    ChatRequest, ChatResponse, FinishReason, MessageRole, StreamChunk, TokenUsage, VendorModel,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic has no listing endpoint usable with a plain key.
const KNOWN_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
    "claude-3-5-sonnet-20240620",
];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct AnthropicAdapter {
    base: BaseAdapter,
}

impl AnthropicAdapter {
    pub fn new(client: &ProviderClient, sink: Arc<dyn LogSink>) -> Result<Self, ProviderError> {
        let mut base = BaseAdapter::new(client, AuthScheme::Header("x-api-key"), sink)?;
        base.set_header("anthropic-version", ANTHROPIC_VERSION)?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseAdapter {
        &mut self.base
    }

    fn build_body(request: &ChatRequest, stream: bool) -> MessagesRequest<'_> {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();

        MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != MessageRole::System)
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            temperature: request.temperature,
            top_p: request.top_p,
            stream,
        }
    }
}

#[async_trait]
impl VendorAdapter for AnthropicAdapter {
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
        let resp = self.base.post_json("/messages", &body, cancel).await?;
        let data: MessagesResponse = self.base.read_json(resp, cancel).await?;

        let text: String = data
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();

        let model = if data.model.is_empty() {
            request.model.clone()
        } else {
            data.model
        };

        Ok(ChatResponse::single(
            data.id,
            model,
            text,
            data.stop_reason.as_deref().map(FinishReason::from_vendor),
            TokenUsage::new(data.usage.input_tokens, data.usage.output_tokens),
        ))
    }

    async fn stream_chat_completion(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        request.validate(self.base.vendor())?;
        let body = Self::build_body(request, true);
        let builder = self
            .base
            .http_post("/messages")?
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        let resp = self.base.send(builder, &cancel).await?;

        self.base.log(
            LogLevel::Debug,
            "stream opened",
            relay_core::fields!("model" => request.model.clone()),
        );
        Ok(sse::spawn_stream(
            resp,
            AnthropicFrames::new(self.base.vendor()),
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
                owned_by: Some("anthropic".into()),
                created: None,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Maps Messages API events onto canonical chunks.
///
/// The event type is taken from the `event:` line when present, otherwise
/// from the payload's own `type` field.
pub struct AnthropicFrames {
    vendor: String,
    message_id: String,
}

impl AnthropicFrames {
    pub fn new(vendor: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            message_id: format!("msg-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl FrameMapper for AnthropicFrames {
    fn map(&mut self, event: &SseEvent) -> FrameAction {
        let Ok(json) = serde_json::from_str::<Value>(event.data.trim()) else {
            return FrameAction::Skip;
        };
        let kind = event
            .event
            .as_deref()
            .or_else(|| json.get("type").and_then(Value::as_str))
            .unwrap_or_default();

        match kind {
            "message_start" => {
                if let Some(id) = json.pointer("/message/id").and_then(Value::as_str) {
                    self.message_id = id.to_string();
                }
                FrameAction::Skip
            }
            "content_block_delta" => match json.pointer("/delta/text").and_then(Value::as_str) {
                Some(text) if !text.is_empty() => {
                    FrameAction::Emit(StreamChunk::text(self.message_id.clone(), text))
                }
                _ => FrameAction::Skip,
            },
            "message_delta" => match json.pointer("/delta/stop_reason").and_then(Value::as_str) {
                Some(reason) => FrameAction::Emit(StreamChunk::finished(
                    self.message_id.clone(),
                    FinishReason::from_vendor(reason),
                )),
                None => FrameAction::Skip,
            },
            "message_stop" => FrameAction::Done,
            "error" => {
                let error_type = json
                    .pointer("/error/type")
                    .and_then(Value::as_str)
                    .unwrap_or("error");
                let message = json
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error");
                let code = if error_type == "overloaded_error" {
                    codes::OVERLOADED
                } else {
                    codes::STREAM_ERROR
                };
                FrameAction::Fail(ProviderError::new(
                    self.vendor.clone(),
                    ErrorKind::Server,
                    code,
                    format!("{error_type}: {message}"),
                    true,
                ))
            }
            // ping, content_block_start, content_block_stop
            _ => FrameAction::Skip,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
