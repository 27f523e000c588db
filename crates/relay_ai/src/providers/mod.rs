//! Vendor adapter trait and implementations.
//!
//! Every vendor is reached through a [`VendorAdapter`]. Adapters hold a
//! [`BaseAdapter`] by value for the shared plumbing (endpoint, auth headers,
//! HTTP pool, classifier, log sink) and only own their wire shapes.

pub mod anthropic;
pub mod base;
pub mod cohere;
pub mod openai;
pub mod replicate;
pub mod sse;
pub mod vendors;

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::LogSink;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::types::{ChatRequest, ChatResponse, StreamChunk, VendorModel};

pub use base::{AuthScheme, BaseAdapter, ProviderClient};
pub use vendors::{Protocol, VendorProfile};

/// Capacity of the chunk channel handed to streaming consumers.
pub const STREAM_CHANNEL_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// Streaming handle
// ---------------------------------------------------------------------------

/// A live streamed completion.
///
/// `chunks` closes when the vendor signals the end of the stream, the body
/// ends, or the call is cancelled. `errors` carries at most one failure and
/// is dropped without a value on a clean finish.
#[derive(Debug)]
pub struct ChatStream {
    pub chunks: mpsc::Receiver<StreamChunk>,
    pub errors: oneshot::Receiver<ProviderError>,
}

impl ChatStream {
    /// Drain the stream, returning every chunk or the stream's error.
    pub async fn collect(mut self) -> Result<Vec<StreamChunk>, ProviderError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunks.recv().await {
            out.push(chunk);
        }
        match self.errors.await {
            Ok(err) => Err(err),
            Err(_) => Ok(out),
        }
    }

    /// Drain the stream and concatenate all deltas.
    pub async fn collect_text(self) -> Result<String, ProviderError> {
        let chunks = self.collect().await?;
        Ok(chunks.iter().map(|c| c.delta()).collect())
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Unified interface over every vendor API.
///
/// Implementations validate the request before any I/O and turn every
/// non-2xx response into a classified [`ProviderError`].
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Vendor id, e.g. `"openai"`.
    fn vendor(&self) -> &str;

    /// Non-streaming completion.
    async fn chat_completion(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError>;

    /// Streaming completion. Errors before the first byte are returned
    /// directly; later failures arrive on [`ChatStream::errors`].
    async fn stream_chat_completion(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ProviderError>;

    /// Models the vendor currently offers. Vendors without a listing
    /// endpoint return a fixed list.
    async fn list_models(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<VendorModel>, ProviderError>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the adapter that speaks `client.vendor`'s protocol.
/// Vendors missing from the built-in table are treated as OpenAI-compatible.
pub fn adapter_for(
    client: &ProviderClient,
    sink: Arc<dyn LogSink>,
) -> Result<Arc<dyn VendorAdapter>, ProviderError> {
    let protocol = vendors::profile(&client.vendor)
        .map(|p| p.protocol)
        .unwrap_or(Protocol::OpenAi);

    let adapter: Arc<dyn VendorAdapter> = match protocol {
        Protocol::OpenAi => Arc::new(openai::OpenAiAdapter::new(client, sink)?),
        Protocol::Anthropic => Arc::new(anthropic::AnthropicAdapter::new(client, sink)?),
        Protocol::Cohere => Arc::new(cohere::CohereAdapter::new(client, sink)?),
        Protocol::Replicate => Arc::new(replicate::ReplicateAdapter::new(client, sink)?),
    };
    Ok(adapter)
}
