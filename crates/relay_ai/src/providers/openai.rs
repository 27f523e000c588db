//! OpenAI-compatible adapter.
//!
//! Serves OpenAI itself and every vendor that mirrors its API (DeepSeek,
//! Groq, SiliconFlow, OpenRouter, Mistral, ...). Uses `/chat/completions`
//! for chat and `/models` for listing; streaming shares the decoder in
//! [`super::sse`].

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{LogLevel, LogSink};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::base::{AuthScheme, BaseAdapter, ProviderClient};
use super::sse::{self, OpenAiFrames};
use super::{ChatStream, VendorAdapter};
use crate::error::ProviderError;
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, MessageRole, TokenUsage,
    VendorModel,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<CompletionChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    index: u32,
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    owned_by: Option<String>,
    created: Option<i64>,
}

impl From<ModelEntry> for VendorModel {
    fn from(e: ModelEntry) -> Self {
        Self {
            id: e.id,
            owned_by: e.owned_by,
            created: e.created,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct OpenAiAdapter {
    base: BaseAdapter,
}

impl OpenAiAdapter {
    pub fn new(client: &ProviderClient, sink: Arc<dyn LogSink>) -> Result<Self, ProviderError> {
        Ok(Self {
            base: BaseAdapter::new(client, AuthScheme::Bearer, sink)?,
        })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseAdapter {
        &mut self.base
    }

    fn build_body<'a>(request: &'a ChatRequest, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &request.model,
            messages: request.messages.iter().map(wire_message).collect(),
            stream,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
        }
    }

    /// Details for one model via `GET /models/{id}`.
    pub async fn model_info(
        &self,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<VendorModel, ProviderError> {
        if model.trim().is_empty() {
            return Err(ProviderError::invalid_request(self.base.vendor(), "model id must not be empty"));
        }
        let resp = self.base.get(&format!("/models/{model}"), cancel).await?;
        let entry: ModelEntry = self.base.read_json(resp, cancel).await?;
        Ok(entry.into())
    }
}

fn wire_message(m: &ChatMessage) -> WireMessage<'_> {
    WireMessage {
        role: m.role.as_str(),
        content: &m.content,
    }
}

fn to_usage(u: Option<WireUsage>) -> TokenUsage {
    u.map(|u| {
        let p = u.prompt_tokens.unwrap_or(0);
        let c = u.completion_tokens.unwrap_or(0);
        TokenUsage {
            prompt_tokens: p,
            completion_tokens: c,
            total_tokens: u.total_tokens.unwrap_or(p + c),
        }
    })
    .unwrap_or_default()
}

#[async_trait]
impl VendorAdapter for OpenAiAdapter {
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
        let resp = self.base.post_json("/chat/completions", &body, cancel).await?;
        let data: CompletionResponse = self.base.read_json(resp, cancel).await?;

        if data.choices.is_empty() {
            return Err(ProviderError::decode(self.base.vendor(), "response contained no choices"));
        }

        let model = if data.model.is_empty() {
            request.model.clone()
        } else {
            data.model
        };

        Ok(ChatResponse {
            id: data.id,
            model,
            choices: data
                .choices
                .into_iter()
                .map(|c| Choice {
                    index: c.index,
                    role: MessageRole::Assistant,
                    content: c.message.content.unwrap_or_default(),
                    finish_reason: c.finish_reason.as_deref().map(FinishReason::from_vendor),
                })
                .collect(),
            usage: to_usage(data.usage),
        })
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
            .http_post("/chat/completions")?
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(&body);
        let resp = self.base.send(builder, &cancel).await?;

        self.base.log(
            LogLevel::Debug,
            "stream opened",
            relay_core::fields!("model" => request.model.clone()),
        );
        Ok(sse::spawn_stream(
            resp,
            OpenAiFrames::default(),
            self.base.vendor(),
            self.base.sink(),
            cancel,
        ))
    }

    async fn list_models(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<VendorModel>, ProviderError> {
        let resp = self.base.get("/models", cancel).await?;
        let list: ModelList = self.base.read_json(resp, cancel).await?;
        Ok(list.data.into_iter().map(VendorModel::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_skips_unset_sampling() {
        let req = ChatRequest::new("gpt-4", vec![ChatMessage::user("Hello")]);
        let json = serde_json::to_value(OpenAiAdapter::build_body(&req, false)).unwrap();
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Hello");
        assert!(json.get("temperature").is_none());
        assert!(json.get("top_p").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn body_carries_sampling_when_set() {
        let req = ChatRequest::new(
            "deepseek-chat",
            vec![ChatMessage::system("terse"), ChatMessage::user("Hi")],
        )
        .with_temperature(0.5)
        .with_top_p(0.9)
        .with_max_tokens(64);
        let json = serde_json::to_value(OpenAiAdapter::build_body(&req, true)).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["max_tokens"], 64);
    }

    #[test]
    fn usage_fills_missing_total() {
        let usage = to_usage(Some(WireUsage {
            prompt_tokens: Some(5),
            completion_tokens: Some(2),
            total_tokens: None,
        }));
        assert_eq!(usage.total_tokens, 7);
        assert_eq!(to_usage(None), TokenUsage::default());
    }

    #[test]
    fn parse_completion_response() {
        let json = r#"{
            "id": "chatcmpl-abc",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Hello!" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7 }
        }"#;
        let resp: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, "chatcmpl-abc");
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello!"));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_model_list() {
        let json = r#"{"object":"list","data":[{"id":"gpt-4","object":"model","created":1687882411,"owned_by":"openai"},{"id":"whisper-1"}]}"#;
        let list: ModelList = serde_json::from_str(json).unwrap();
        let models: Vec<VendorModel> = list.data.into_iter().map(VendorModel::from).collect();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].owned_by.as_deref(), Some("openai"));
        assert_eq!(models[1].created, None);
    }
}
