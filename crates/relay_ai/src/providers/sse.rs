//! Event-stream decoding shared by every streaming adapter.
//!
//! The wire format is a sequence of blocks:
//!
//! ```text
//! event: content_block_delta        (optional)
//! data: {"id":"...","choices":[{"delta":{"content":"Hello"}}]}
//!
//! data: [DONE]
//! ```
//!
//! [`SseDecoder`] turns raw bytes into [`SseEvent`]s. A vendor-specific
//! [`FrameMapper`] turns each event into a canonical [`StreamChunk`], a skip,
//! or an end-of-stream signal. [`spawn_stream`] drives a response body through
//! both and feeds a bounded channel until the stream ends or is cancelled.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::StreamExt;
use relay_core::{LogLevel, LogSink};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{ChatStream, STREAM_CHANNEL_CAPACITY};
use crate::error::{ErrorKind, ProviderError, codes};
use crate::types::{ChunkChoice, FinishReason, StreamChunk};

pub const DONE_MARKER: &str = "[DONE]";

// ---------------------------------------------------------------------------
// Line decoder
// ---------------------------------------------------------------------------

/// One `data:` payload together with the most recent `event:` name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Longest line the decoder will buffer while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental newline splitter. Bytes are buffered until a full line is
/// available so multi-byte characters split across reads survive intact.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    /// Set while dropping the rest of an oversized line.
    discarding: bool,
    event: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line: max_line.max(1),
            discarding: false,
            event: None,
        }
    }

    /// Feed bytes, returning every event completed by them.
    ///
    /// A line longer than the limit is dropped whole; decoding resumes at
    /// the next newline.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start + self.scanned..]
            .iter()
            .position(|b| *b == b'\n')
        {
            let end = start + self.scanned + offset + 1;
            if self.discarding {
                self.discarding = false;
            } else if let Some(event) = parse_line(&mut self.event, &self.buffer[start..end]) {
                events.push(event);
            }
            start = end;
            self.scanned = 0;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        events
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return Vec::new();
        }
        parse_line(&mut self.event, &rest).into_iter().collect()
    }
}

fn parse_line(event: &mut Option<String>, raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(['\n', '\r']);

    if line.trim().is_empty() {
        // Blank line closes the current block.
        *event = None;
        return None;
    }
    if let Some(name) = line.strip_prefix("event:") {
        *event = Some(name.trim().to_string());
        return None;
    }
    // Comments (`:`), `id:`, `retry:` and anything else are not payloads.
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    Some(SseEvent {
        event: event.clone(),
        data: data.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Frame mapping
// ---------------------------------------------------------------------------

/// What to do with one decoded event.
#[derive(Debug)]
pub enum FrameAction {
    Emit(StreamChunk),
    Skip,
    Done,
    /// The vendor reported a failure inside the stream.
    Fail(ProviderError),
}

/// Vendor-specific translation from events to canonical chunks.
pub trait FrameMapper: Send + 'static {
    fn map(&mut self, event: &SseEvent) -> FrameAction;
}

/// OpenAI-compatible frames, which also covers the canonical chunk encoding
/// produced by [`encode_chunk`].
#[derive(Debug)]
pub struct OpenAiFrames {
    fallback_id: String,
}

impl Default for OpenAiFrames {
    fn default() -> Self {
        Self {
            fallback_id: format!("chunk-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl FrameMapper for OpenAiFrames {
    fn map(&mut self, event: &SseEvent) -> FrameAction {
        let data = event.data.trim();
        if data == DONE_MARKER {
            return FrameAction::Done;
        }
        let Ok(json) = serde_json::from_str::<Value>(data) else {
            return FrameAction::Skip;
        };
        match chunk_from_json(&json, &self.fallback_id) {
            Some(chunk) => FrameAction::Emit(chunk),
            None => FrameAction::Skip,
        }
    }
}

/// Read a chunk out of any of the accepted frame shapes.
///
/// Canonical frames (as written by [`encode_chunk`]: string `id`, `choices`
/// with string deltas) decode exactly, empty ones included. Vendor-native
/// frames (`choices[].delta.content`, a bare top-level `delta`) get the
/// fallback id when theirs is missing, and yield `None` when they carry no
/// text and no finish reason (role-only deltas, keep-alives).
pub fn chunk_from_json(json: &Value, fallback_id: &str) -> Option<StreamChunk> {
    if let Some(chunk) = canonical_chunk(json) {
        return Some(chunk);
    }

    let id = json
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_id)
        .to_string();

    let choices: Vec<ChunkChoice> = match json.get("choices").and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .enumerate()
            .map(|(pos, choice)| ChunkChoice {
                index: choice
                    .get("index")
                    .and_then(Value::as_u64)
                    .map_or(pos as u32, |i| i as u32),
                delta: delta_text(choice.get("delta").or_else(|| choice.get("text"))),
                finish_reason: choice
                    .get("finish_reason")
                    .and_then(Value::as_str)
                    .map(FinishReason::from_vendor),
            })
            .collect(),
        None => {
            let delta = json.get("delta")?;
            vec![ChunkChoice {
                index: 0,
                delta: delta_text(Some(delta)),
                finish_reason: json
                    .get("finish_reason")
                    .and_then(Value::as_str)
                    .map(FinishReason::from_vendor),
            }]
        }
    };

    let meaningful = choices
        .iter()
        .any(|c| !c.delta.is_empty() || c.finish_reason.is_some());
    meaningful.then_some(StreamChunk { id, choices })
}

fn canonical_chunk(json: &Value) -> Option<StreamChunk> {
    let choices = json.get("choices")?.as_array()?;
    if !choices.iter().all(|c| c.get("delta").is_some_and(Value::is_string)) {
        return None;
    }
    serde_json::from_value(json.clone()).ok()
}

fn delta_text(delta: Option<&Value>) -> String {
    match delta {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => obj
            .get("content")
            .or_else(|| obj.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Render a chunk in wire form: `data: <json>\n\n`.
pub fn encode_chunk(chunk: &StreamChunk) -> String {
    let json = serde_json::to_string(chunk).unwrap_or_default();
    format!("data: {json}\n\n")
}

/// Decode a complete event-stream body with the OpenAI-compatible mapper.
pub fn decode_chunks(body: &[u8]) -> Vec<StreamChunk> {
    let mut decoder = SseDecoder::new();
    let mut mapper = OpenAiFrames::default();
    let mut events = decoder.push(body);
    events.extend(decoder.finish());

    let mut out = Vec::new();
    for event in &events {
        match mapper.map(event) {
            FrameAction::Emit(chunk) => out.push(chunk),
            FrameAction::Skip => {}
            FrameAction::Done | FrameAction::Fail(_) => break,
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Stream driver
// ---------------------------------------------------------------------------

/// Spawn a task that decodes `resp` with `mapper` and return the consumer
/// handle. The task owns the response body, so ending the task (for any
/// reason) releases the connection.
pub fn spawn_stream<M: FrameMapper>(
    resp: reqwest::Response,
    mapper: M,
    vendor: &str,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
) -> ChatStream {
    let (tx, rx) = mpsc::channel::<StreamChunk>(STREAM_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = oneshot::channel::<ProviderError>();
    let vendor = vendor.to_string();

    tokio::spawn(async move {
        drive_stream(resp, mapper, tx, err_tx, &vendor, sink.as_ref(), cancel).await;
    });

    ChatStream {
        chunks: rx,
        errors: err_rx,
    }
}

async fn drive_stream<M: FrameMapper>(
    resp: reqwest::Response,
    mut mapper: M,
    tx: mpsc::Sender<StreamChunk>,
    err_tx: oneshot::Sender<ProviderError>,
    vendor: &str,
    sink: &dyn LogSink,
    cancel: CancellationToken,
) {
    let mut body = resp.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut delivered = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                sink.log(
                    LogLevel::Debug,
                    "stream cancelled by consumer",
                    &relay_core::fields!("vendor" => vendor, "chunks" => delivered),
                );
                return;
            }
            next = body.next() => next,
        };

        let events = match next {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => {
                let err = ProviderError::new(
                    vendor,
                    ErrorKind::Network,
                    codes::STREAM_ERROR,
                    format!("stream read failed: {e}"),
                    true,
                );
                sink.log(
                    LogLevel::Error,
                    "stream framing error",
                    &relay_core::fields!("vendor" => vendor, "error" => e.to_string()),
                );
                let _ = err_tx.send(err);
                return;
            }
            None => {
                let tail = decoder.finish();
                if let ControlFlow::Break(Some(err)) =
                    dispatch(&tail, &mut mapper, &tx, &cancel, sink, vendor, &mut delivered).await
                {
                    let _ = err_tx.send(err);
                }
                return;
            }
        };

        match dispatch(&events, &mut mapper, &tx, &cancel, sink, vendor, &mut delivered).await {
            ControlFlow::Continue(()) => {}
            ControlFlow::Break(Some(err)) => {
                let _ = err_tx.send(err);
                return;
            }
            ControlFlow::Break(None) => return,
        }
    }
}

/// Map and forward a batch of events. `Break` ends the stream, optionally
/// with an error to report.
async fn dispatch<M: FrameMapper>(
    events: &[SseEvent],
    mapper: &mut M,
    tx: &mpsc::Sender<StreamChunk>,
    cancel: &CancellationToken,
    sink: &dyn LogSink,
    vendor: &str,
    delivered: &mut usize,
) -> ControlFlow<Option<ProviderError>> {
    for event in events {
        if cancel.is_cancelled() {
            return ControlFlow::Break(None);
        }
        match mapper.map(event) {
            FrameAction::Emit(chunk) => {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ControlFlow::Break(None),
                    sent = tx.send(chunk) => sent,
                };
                if sent.is_err() {
                    // Receiver dropped.
                    return ControlFlow::Break(None);
                }
                *delivered += 1;
            }
            FrameAction::Skip => {
                sink.log(
                    LogLevel::Debug,
                    "skipping stream payload",
                    &relay_core::fields!("vendor" => vendor, "data" => event.data.clone()),
                );
            }
            FrameAction::Done => return ControlFlow::Break(None),
            FrameAction::Fail(err) => return ControlFlow::Break(Some(err)),
        }
    }
    ControlFlow::Continue(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
