//! Replicate adapter.
//!
//! Replicate runs models as asynchronous predictions: the request is
//! submitted to `/predictions` and the returned `urls.get` link is polled
//! until the prediction settles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{LogLevel, LogSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::base::{AuthScheme, BaseAdapter, ProviderClient};
use super::{ChatStream, STREAM_CHANNEL_CAPACITY, VendorAdapter};
use crate::error::{ErrorKind, ProviderError, codes};
use crate::types::{ChatRequest, ChatResponse, FinishReason, StreamChunk, TokenUsage, VendorModel};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const KNOWN_MODELS: &[&str] = &[
    "meta/llama-2-70b-chat",
    "meta/llama-2-13b-chat",
    "mistralai/mistral-7b-instruct-v0.1",
];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput,
}

#[derive(Debug, Serialize)]
struct PredictionInput {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    top_p: f32,
    repetition_penalty: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    urls: PredictionUrls,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    metrics: Option<PredictionMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PredictionMetrics {
    #[serde(default)]
    input_token_count: u32,
    #[serde(default)]
    output_token_count: u32,
}

impl Prediction {
    fn is_settled(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    /// Output arrives either as a list of string fragments or a single string.
    fn output_text(&self) -> String {
        match &self.output {
            Some(Value::Array(parts)) => parts.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    fn usage(&self) -> TokenUsage {
        self.metrics
            .as_ref()
            .map(|m| TokenUsage::new(m.input_token_count, m.output_token_count))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ReplicateAdapter {
    base: BaseAdapter,
    poll_interval: Duration,
}

impl ReplicateAdapter {
    pub fn new(client: &ProviderClient, sink: Arc<dyn LogSink>) -> Result<Self, ProviderError> {
        Ok(Self {
            base: BaseAdapter::new(client, AuthScheme::Token, sink)?,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseAdapter {
        &mut self.base
    }

    fn build_body(request: &ChatRequest) -> PredictionRequest<'_> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        PredictionRequest {
            version: &request.model,
            input: PredictionInput {
                prompt: prompt.trim().to_string(),
                max_new_tokens: request.max_tokens,
                temperature: request.temperature,
                top_p: 0.9,
                repetition_penalty: 1.0,
            },
        }
    }

    async fn submit(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Prediction, ProviderError> {
        let body = Self::build_body(request);
        let resp = self.base.post_json("/predictions", &body, cancel).await?;
        if resp.status() != reqwest::StatusCode::CREATED {
            self.base.log(
                LogLevel::Debug,
                "prediction accepted with unexpected status",
                relay_core::fields!("status" => resp.status().as_u16()),
            );
        }
        let prediction: Prediction = self.base.read_json(resp, cancel).await?;
        self.base.log(
            LogLevel::Debug,
            "prediction submitted",
            relay_core::fields!("model" => request.model.clone(), "prediction" => prediction.id.clone()),
        );
        Ok(prediction)
    }

    /// Poll until the prediction settles. Malformed poll bodies are skipped.
    async fn wait(
        &self,
        mut prediction: Prediction,
        cancel: &CancellationToken,
    ) -> Result<Prediction, ProviderError> {
        if prediction.urls.get.is_empty() && !prediction.is_settled() {
            return Err(ProviderError::decode(
                self.base.vendor(),
                "prediction response carried no status URL",
            ));
        }

        while !prediction.is_settled() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled(self.base.vendor())),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let resp = self.base.get(&prediction.urls.get, cancel).await?;
            match self.base.read_json::<Prediction>(resp, cancel).await {
                Ok(mut next) => {
                    if next.urls.get.is_empty() {
                        next.urls = prediction.urls.clone();
                    }
                    prediction = next;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    self.base.log(
                        LogLevel::Debug,
                        "ignoring malformed poll response",
                        relay_core::fields!("error" => e.message),
                    );
                }
            }
        }

        if prediction.status != "succeeded" {
            let detail = match &prediction.error {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => format!("prediction {}", prediction.status),
            };
            return Err(ProviderError::new(
                self.base.vendor(),
                ErrorKind::Server,
                codes::PREDICTION_FAILED,
                detail,
                false,
            ));
        }
        Ok(prediction)
    }
}

#[async_trait]
impl VendorAdapter for ReplicateAdapter {
    fn vendor(&self) -> &str {
        self.base.vendor()
    }

    async fn chat_completion(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        request.validate(self.base.vendor())?;
        let submitted = self.submit(request, cancel).await?;
        let done = self.wait(submitted, cancel).await?;
        Ok(ChatResponse::single(
            done.id.clone(),
            request.model.clone(),
            done.output_text(),
            Some(FinishReason::Stop),
            done.usage(),
        ))
    }

    /// Replicate has no incremental output here: the settled prediction is
    /// delivered as one text chunk followed by a finish chunk.
    async fn stream_chat_completion(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        request.validate(self.base.vendor())?;
        let submitted = self.submit(request, &cancel).await?;

        let (tx, rx) = mpsc::channel::<StreamChunk>(STREAM_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = oneshot::channel::<ProviderError>();
        let adapter = self.clone();

        tokio::spawn(async move {
            let done = match adapter.wait(submitted, &cancel).await {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => return,
                Err(e) => {
                    let _ = err_tx.send(e);
                    return;
                }
            };
            let id = done.id.clone();
            for chunk in [
                StreamChunk::text(id.clone(), done.output_text()),
                StreamChunk::finished(id, FinishReason::Stop),
            ] {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send(chunk) => sent,
                };
                if sent.is_err() {
                    return;
                }
            }
        });

        Ok(ChatStream {
            chunks: rx,
            errors: err_rx,
        })
    }

    async fn list_models(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<VendorModel>, ProviderError> {
        Ok(KNOWN_MODELS
            .iter()
            .map(|id| VendorModel {
                id: (*id).to_string(),
                owned_by: Some("replicate".into()),
                created: None,
            })
            .collect())
    }
}
