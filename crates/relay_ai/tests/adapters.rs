//! Adapters against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use relay_ai::error::codes;
use relay_ai::providers::anthropic::AnthropicAdapter;
use relay_ai::providers::cohere::CohereAdapter;
use relay_ai::providers::openai::OpenAiAdapter;
use relay_ai::providers::replicate::ReplicateAdapter;
use async_trait::async_trait;
use relay_ai::{
    BreakerCall, ChatMessage, ChatRequest, CircuitBreaker, ConsecutiveFailureBreaker, ErrorKind,
    FinishReason, ProviderClient, ProviderError, RecoveryEngine, VendorAdapter,
};
use relay_core::{LogSink, MemorySink, NullSink, RetryConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(vendor: &str, server: &MockServer) -> ProviderClient {
    ProviderClient::with_http(
        vendor,
        &format!("{}/v1", server.uri()),
        "test-key",
        reqwest::Client::new(),
    )
    .unwrap()
}

fn sink() -> Arc<dyn LogSink> {
    Arc::new(NullSink)
}

fn hello(model: &str) -> ChatRequest {
    ChatRequest::new(model, vec![ChatMessage::user("Hello")])
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let resp = adapter
        .chat_completion(&hello("gpt-4"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resp.id, "chatcmpl-1");
    assert_eq!(resp.content(), "Hi there");
    assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::Stop));
    assert_eq!(resp.usage.total_tokens, 7);
}

#[tokio::test]
async fn openai_auth_failure_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let err = adapter
        .chat_completion(&hello("gpt-4"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Auth);
    assert_eq!(err.code, codes::AUTHENTICATION_FAILED);
    assert_eq!(err.status, Some(401));
    assert!(!err.retryable);
}

#[tokio::test]
async fn openai_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("groq", &server), sink()).unwrap();
    let err = adapter
        .chat_completion(&hello("mixtral-8x7b-32768"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::RateLimit);
    assert_eq!(err.vendor, "groq");
    assert!(err.retryable);
    assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn invalid_request_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let request = hello("gpt-4").with_temperature(3.5);
    let err = adapter
        .chat_completion(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(err.status, None);
}

#[tokio::test]
async fn openai_stream_delivers_deltas() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let stream = adapter
        .stream_chat_completion(&hello("gpt-4"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.collect_text().await.unwrap(), "Hello");
}

#[tokio::test]
async fn openai_stream_error_before_first_byte() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let err = adapter
        .stream_chat_completion(&hello("gpt-4"), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Server);
    assert!(err.retryable);
}

#[tokio::test]
async fn openai_lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "gpt-4", "object": "model", "owned_by": "openai", "created": 1687882411},
                {"id": "gpt-3.5-turbo", "object": "model", "owned_by": "openai"}
            ]
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let models = adapter.list_models(&CancellationToken::new()).await.unwrap();
    let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["gpt-4", "gpt-3.5-turbo"]);
    assert_eq!(models[0].owned_by.as_deref(), Some("openai"));
}

// ---------------------------------------------------------------------------
// Retry over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_server_errors_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-2",
            "model": "gpt-4",
            "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let log = Arc::new(MemorySink::new());
    let adapter = OpenAiAdapter::new(&client("openai", &server), log.clone()).unwrap();
    let engine = RecoveryEngine::new(
        "openai",
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            retryable_errors: vec!["500".into()],
            jitter: false,
        },
        log.clone(),
    );

    let request = hello("gpt-4");
    let cancel = CancellationToken::new();
    let adapter = &adapter;
    let request = &request;
    let cancel_ref = &cancel;
    let resp = engine
        .execute(&cancel, move || adapter.chat_completion(request, cancel_ref))
        .await
        .unwrap();

    assert_eq!(resp.content(), "ok");
    assert_eq!(log.matching("retrying").len(), 2);
}

// ---------------------------------------------------------------------------
// Circuit breaker over HTTP
// ---------------------------------------------------------------------------

/// A breaker with its own policy: refuses every call.
struct Tripped;

#[async_trait]
impl CircuitBreaker for Tripped {
    async fn call(&self, _f: BreakerCall<'_>) -> Result<(), ProviderError> {
        Err(ProviderError::new(
            "openai",
            ErrorKind::Server,
            codes::CIRCUIT_OPEN,
            "tripped",
            true,
        ))
    }
}

#[tokio::test]
async fn foreign_open_breaker_keeps_calls_off_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let engine = RecoveryEngine::new("openai", RetryConfig::default(), sink());
    let request = hello("gpt-4");
    let cancel = CancellationToken::new();

    let err = engine
        .execute_with_breaker(&Tripped, || adapter.chat_completion(&request, &cancel))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::CIRCUIT_OPEN);
}

#[tokio::test]
async fn failing_vendor_trips_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(&client("openai", &server), sink()).unwrap();
    let engine = RecoveryEngine::new("openai", RetryConfig::default(), sink());
    let breaker = ConsecutiveFailureBreaker::new("openai", 2, Duration::from_secs(60));
    let request = hello("gpt-4");
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let err = engine
            .execute_with_breaker(&breaker, || adapter.chat_completion(&request, &cancel))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(503));
    }
    assert!(breaker.is_open());

    // Third call never reaches the server; `expect(2)` checks that on drop.
    let err = engine
        .execute_with_breaker(&breaker, || adapter.chat_completion(&request, &cancel))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::CIRCUIT_OPEN);
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_messages_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-opus-20240229",
            "system": "Be brief.",
            "max_tokens": 1024
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "model": "claude-3-opus-20240229",
            "content": [{"type": "text", "text": "Hello!"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = AnthropicAdapter::new(&client("anthropic", &server), sink()).unwrap();
    let request = ChatRequest::new(
        "claude-3-opus-20240229",
        vec![ChatMessage::system("Be brief."), ChatMessage::user("Hi")],
    );
    let resp = adapter
        .chat_completion(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resp.content(), "Hello!");
    assert_eq!(resp.usage.prompt_tokens, 12);
    assert_eq!(resp.usage.completion_tokens, 3);
    assert_eq!(resp.usage.total_tokens, 15);
}

#[tokio::test]
async fn anthropic_overloaded_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&server)
        .await;

    let adapter = AnthropicAdapter::new(&client("anthropic", &server), sink()).unwrap();
    let err = adapter
        .chat_completion(&hello("claude-3-opus-20240229"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.status, Some(529));
    assert!(err.retryable);
}

// ---------------------------------------------------------------------------
// Cohere
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cohere_generate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .and(header("authorization", "Bearer test-key"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(json!({"message": "Hello", "model": "command"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response_id": "r-1",
            "text": "Hi from Cohere",
            "token_count": {"prompt_tokens": 4, "response_tokens": 4}
        })))
        .mount(&server)
        .await;

    let adapter = CohereAdapter::new(&client("cohere", &server), sink()).unwrap();
    let resp = adapter
        .chat_completion(&hello("command"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.id, "r-1");
    assert_eq!(resp.model, "command");
    assert_eq!(resp.content(), "Hi from Cohere");
    assert_eq!(resp.usage.total_tokens, 8);
}

// ---------------------------------------------------------------------------
// Replicate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replicate_polls_until_succeeded() {
    let server = MockServer::start().await;
    let status_url = format!("{}/v1/predictions/p-1", server.uri());

    Mock::given(method("POST"))
        .and(path("/v1/predictions"))
        .and(header("authorization", "Token test-key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p-1",
            "status": "starting",
            "urls": {"get": status_url}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/predictions/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p-1",
            "status": "processing",
            "urls": {"get": status_url}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/predictions/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p-1",
            "status": "succeeded",
            "output": ["Hel", "lo"],
            "metrics": {"input_token_count": 3, "output_token_count": 2}
        })))
        .mount(&server)
        .await;

    let adapter = ReplicateAdapter::new(&client("replicate", &server), sink())
        .unwrap()
        .with_poll_interval(Duration::from_millis(10));
    let resp = adapter
        .chat_completion(&hello("meta/llama-2-70b-chat"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resp.id, "p-1");
    assert_eq!(resp.content(), "Hello");
    assert_eq!(resp.usage.total_tokens, 5);
}

#[tokio::test]
async fn replicate_failed_prediction() {
    let server = MockServer::start().await;
    let status_url = format!("{}/v1/predictions/p-2", server.uri());

    Mock::given(method("POST"))
        .and(path("/v1/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p-2",
            "status": "starting",
            "urls": {"get": status_url}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/predictions/p-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p-2",
            "status": "failed",
            "error": "CUDA out of memory"
        })))
        .mount(&server)
        .await;

    let adapter = ReplicateAdapter::new(&client("replicate", &server), sink())
        .unwrap()
        .with_poll_interval(Duration::from_millis(10));
    let err = adapter
        .chat_completion(&hello("meta/llama-2-70b-chat"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::PREDICTION_FAILED);
    assert!(err.message.contains("CUDA out of memory"));
    assert!(!err.retryable);
}

#[tokio::test]
async fn replicate_refuses_poll_links_to_other_hosts() {
    let server = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&elsewhere)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p-3",
            "status": "starting",
            "urls": {"get": format!("{}/v1/predictions/p-3", elsewhere.uri())}
        })))
        .mount(&server)
        .await;

    let adapter = ReplicateAdapter::new(&client("replicate", &server), sink())
        .unwrap()
        .with_poll_interval(Duration::from_millis(10));
    let err = adapter
        .chat_completion(&hello("meta/llama-2-70b-chat"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::FOREIGN_URL);
    assert!(!err.retryable);
}
