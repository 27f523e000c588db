//! Model discovery end to end: local file, live listing and fallback.

use std::sync::Arc;

use relay_ai::{ModelResolver, ModelSource};
use relay_core::{GatewayConfig, MemorySink, NullSink, RetryConfig, VendorSettings};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn models_server(ids: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    let data: Vec<_> = ids.iter().map(|id| json!({"id": id, "object": "model"})).collect();
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": data})))
        .expect(1)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn live_listing_is_fetched_once_and_cached() {
    let server = models_server(&["gpt-4", "gpt-4o", "gpt-4"]).await;
    let resolver = ModelResolver::new(Arc::new(NullSink));
    resolver
        .register_provider("openai", &format!("{}/v1", server.uri()), "sk-test")
        .unwrap();
    let cancel = CancellationToken::new();

    let first = resolver.resolve("openai", &cancel).await;
    let second = resolver.resolve("openai", &cancel).await;

    assert_eq!(first, second);
    let ids: Vec<_> = first.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["gpt-4", "gpt-4o"]);
    assert!(first.iter().all(|m| m.source == ModelSource::Api));
    assert_eq!(first[0].display_name, "GPT-4");
}

#[tokio::test]
async fn local_file_shadows_the_vendor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("models.json");
    std::fs::write(
        &file,
        json!({
            "provider": {
                "openai": {
                    "models": {
                        "gpt-4": {
                            "name": "GPT-4",
                            "maxTokens": 8192,
                            "cost": {"input": 30, "output": 60},
                            "supports_http3": true,
                            "response_time_ms": 640
                        }
                    }
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    let config = GatewayConfig {
        models_config_path: Some(file),
        ..GatewayConfig::default()
    };
    let resolver = ModelResolver::from_config(&config, Arc::new(NullSink));
    resolver
        .register_provider("openai", &format!("{}/v1", server.uri()), "sk-test")
        .unwrap();

    let models = resolver.resolve("openai", &CancellationToken::new()).await;
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].source, ModelSource::Config);
    assert_eq!(models[0].display_name, "GPT-4 (http3) (fast)");
}

#[tokio::test]
async fn unreachable_vendor_falls_back_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = GatewayConfig::default();
    config.vendors.insert(
        "deepseek".into(),
        VendorSettings {
            retry: Some(RetryConfig {
                max_retries: 1,
                initial_delay: std::time::Duration::from_millis(5),
                max_delay: std::time::Duration::from_millis(5),
                backoff_factor: 2.0,
                retryable_errors: vec!["503".into()],
                jitter: false,
            }),
            ..VendorSettings::default()
        },
    );
    let sink = Arc::new(MemorySink::new());
    let resolver = ModelResolver::from_config(&config, sink.clone());
    resolver
        .register_provider("deepseek", &format!("{}/v1", server.uri()), "sk-test")
        .unwrap();

    let models = resolver.resolve("deepseek", &CancellationToken::new()).await;
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].id, "deepseek-chat");
    assert_eq!(models[0].source, ModelSource::Fallback);
    assert_eq!(models[0].display_name, "DeepSeek Chat (open source)");
    assert_eq!(sink.matching("live model listing failed").len(), 1);
}

#[tokio::test]
async fn resolve_all_mixes_tiers_per_vendor() {
    let server = models_server(&["llama3-70b-8192"]).await;
    let resolver = ModelResolver::new(Arc::new(NullSink));
    resolver
        .register_provider("groq", &format!("{}/v1", server.uri()), "sk-test")
        .unwrap();
    resolver
        .register_provider("mistral", "https://api.mistral.ai/v1", "")
        .unwrap();

    let all = resolver.resolve_all(&CancellationToken::new()).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all["groq"][0].id, "llama3-70b-8192");
    assert_eq!(all["groq"][0].source, ModelSource::Api);
    assert!(all["mistral"].iter().all(|m| m.source == ModelSource::Fallback));

    let mut cached = resolver.cached_vendors();
    cached.sort();
    assert_eq!(cached, ["groq", "mistral"]);
}
