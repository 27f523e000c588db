//! Shared adapter plumbing: registered client records and the composed base.

use std::sync::Arc;

use relay_core::{Fields, GatewayError, LogLevel, LogSink, TransportConfig};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::classifier::ErrorClassifier;
use crate::error::{ErrorKind, ProviderError, codes};

// ---------------------------------------------------------------------------
// ProviderClient
// ---------------------------------------------------------------------------

/// A registered vendor: where it lives, how to authenticate, and the pooled
/// HTTP client used to reach it. Read-only once registered.
#[derive(Clone)]
pub struct ProviderClient {
    pub vendor: String,
    pub base_url: String,
    api_key: String,
    pub http: reqwest::Client,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("vendor", &self.vendor)
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "<none>" } else { "<redacted>" })
            .finish()
    }
}

impl ProviderClient {
    /// Build a client with its own connection pool using `transport` timeouts.
    pub fn new(
        vendor: impl Into<String>,
        base_url: &str,
        api_key: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .connect_timeout(transport.connect_timeout())
            .timeout(transport.request_timeout())
            .build()
            .map_err(|e| GatewayError::Internal(format!("HTTP client: {e}")))?;
        Self::with_http(vendor, base_url, api_key, http)
    }

    /// Build a client around an existing pool.
    pub fn with_http(
        vendor: impl Into<String>,
        base_url: &str,
        api_key: impl Into<String>,
        http: reqwest::Client,
    ) -> Result<Self, GatewayError> {
        let vendor = vendor.into();
        if vendor.trim().is_empty() {
            return Err(GatewayError::Config("vendor id must not be empty".into()));
        }
        let parsed = url::Url::parse(base_url)
            .map_err(|e| GatewayError::Config(format!("{vendor}: bad base URL {base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::Config(format!(
                "{vendor}: base URL must be http(s), got {}",
                parsed.scheme()
            )));
        }
        Ok(Self {
            vendor,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// How a vendor expects its API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: Token <key>`
    Token,
    /// A vendor-named header carrying the bare key, e.g. `x-api-key`.
    Header(&'static str),
}

// ---------------------------------------------------------------------------
// BaseAdapter
// ---------------------------------------------------------------------------

/// State and helpers shared by every adapter, held by composition.
#[derive(Clone)]
pub struct BaseAdapter {
    vendor: String,
    endpoint: String,
    api_key: String,
    headers: HeaderMap,
    http: reqwest::Client,
    classifier: ErrorClassifier,
    sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for BaseAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseAdapter")
            .field("vendor", &self.vendor)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl BaseAdapter {
    pub fn new(
        client: &ProviderClient,
        auth: AuthScheme,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ProviderError> {
        let mut base = Self {
            vendor: client.vendor.clone(),
            endpoint: client.base_url.clone(),
            api_key: client.api_key().to_string(),
            headers: HeaderMap::new(),
            http: client.http.clone(),
            classifier: ErrorClassifier::new(client.vendor.clone()),
            sink,
        };
        base.set_auth(auth)?;
        Ok(base)
    }

    fn set_auth(&mut self, auth: AuthScheme) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Ok(());
        }
        let (name, value) = match auth {
            AuthScheme::Bearer => (AUTHORIZATION, format!("Bearer {}", self.api_key)),
            AuthScheme::Token => (AUTHORIZATION, format!("Token {}", self.api_key)),
            AuthScheme::Header(name) => (HeaderName::from_static(name), self.api_key.clone()),
        };
        let mut value = HeaderValue::from_str(&value).map_err(|_| {
            ProviderError::invalid_request(&self.vendor, "API key contains invalid header characters")
        })?;
        value.set_sensitive(true);
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Add or replace a header sent with every request.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ProviderError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ProviderError::invalid_request(&self.vendor, format!("invalid header name {name}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            ProviderError::invalid_request(&self.vendor, format!("invalid value for header {name}"))
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.sink)
    }

    /// Join a path onto the endpoint. Absolute URLs (vendor-supplied links)
    /// must share the endpoint's origin, since auth headers go with them.
    pub fn url(&self, path: &str) -> Result<String, ProviderError> {
        if !(path.starts_with("http://") || path.starts_with("https://")) {
            return Ok(format!("{}/{}", self.endpoint, path.trim_start_matches('/')));
        }
        let target = url::Url::parse(path)
            .map_err(|e| ProviderError::decode(&self.vendor, format!("bad URL {path}: {e}")))?;
        let same_origin = url::Url::parse(&self.endpoint)
            .is_ok_and(|endpoint| endpoint.origin() == target.origin());
        if !same_origin {
            return Err(ProviderError::new(
                self.vendor.clone(),
                ErrorKind::InvalidRequest,
                codes::FOREIGN_URL,
                format!("refusing to send credentials to {}", target.origin().ascii_serialization()),
                false,
            ));
        }
        Ok(path.to_string())
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str, mut fields: Fields) {
        fields.insert("vendor".into(), self.vendor.clone().into());
        self.sink.log(level, message, &fields);
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    pub(crate) fn http_post(&self, path: &str) -> Result<reqwest::RequestBuilder, ProviderError> {
        Ok(self.http.post(self.url(path)?))
    }

    pub(crate) fn http_get(&self, path: &str) -> Result<reqwest::RequestBuilder, ProviderError> {
        Ok(self.http.get(self.url(path)?))
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError> {
        let builder = self.http_post(path)?.json(body);
        self.send(builder, cancel).await
    }

    pub(crate) async fn get(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError> {
        let builder = self.http_get(path)?;
        self.send(builder, cancel).await
    }

    /// Apply auth headers, race the request against `cancel`, and turn any
    /// non-2xx response into a classified error.
    pub(crate) async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError> {
        let builder = builder.headers(self.headers.clone());

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::cancelled(&self.vendor)),
            resp = builder.send() => resp,
        }
        .map_err(|e| self.classifier.from_transport(&e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let headers = resp.headers().clone();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::cancelled(&self.vendor)),
            body = resp.bytes() => body.unwrap_or_default(),
        };
        let err = self.classifier.classify(Some(status), &body, &headers);
        self.log(
            LogLevel::Warning,
            "vendor request failed",
            relay_core::fields!(
                "status" => status.as_u16(),
                "code" => err.code.clone(),
                "retryable" => err.retryable,
            ),
        );
        Err(err)
    }

    /// Read a 2xx body as JSON. A body that does not decode is a hard error.
    pub(crate) async fn read_json<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
        cancel: &CancellationToken,
    ) -> Result<T, ProviderError> {
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::cancelled(&self.vendor)),
            bytes = resp.bytes() => bytes.map_err(|e| self.classifier.from_transport(&e))?,
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            ProviderError::decode(&self.vendor, format!("Malformed response body: {e}"))
                .with_body(bytes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::NullSink;

    fn client(key: &str) -> ProviderClient {
        ProviderClient::with_http("openai", "https://api.example.test/v1/", key, reqwest::Client::new())
            .unwrap()
    }

    #[test]
    fn client_trims_trailing_slash() {
        assert_eq!(client("k").base_url, "https://api.example.test/v1");
    }

    #[test]
    fn client_rejects_bad_urls() {
        let http = reqwest::Client::new();
        assert!(ProviderClient::with_http("x", "not a url", "k", http.clone()).is_err());
        assert!(ProviderClient::with_http("x", "ftp://host", "k", http.clone()).is_err());
        assert!(ProviderClient::with_http("", "https://host", "k", http).is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let text = format!("{:?}", client("sk-secret"));
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn bearer_auth_header() {
        let base = BaseAdapter::new(&client("sk-1"), AuthScheme::Bearer, Arc::new(NullSink)).unwrap();
        assert_eq!(base.headers()[AUTHORIZATION], "Bearer sk-1");
        assert!(base.headers()[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn token_and_named_header_auth() {
        let base = BaseAdapter::new(&client("r8"), AuthScheme::Token, Arc::new(NullSink)).unwrap();
        assert_eq!(base.headers()[AUTHORIZATION], "Token r8");

        let base =
            BaseAdapter::new(&client("ant"), AuthScheme::Header("x-api-key"), Arc::new(NullSink))
                .unwrap();
        assert_eq!(base.headers()["x-api-key"], "ant");
        assert!(base.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn empty_key_sends_no_auth() {
        let base = BaseAdapter::new(&client(""), AuthScheme::Bearer, Arc::new(NullSink)).unwrap();
        assert!(base.headers().is_empty());
    }

    #[test]
    fn invalid_key_is_rejected() {
        let err = BaseAdapter::new(&client("bad\nkey"), AuthScheme::Bearer, Arc::new(NullSink))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidRequest);
    }

    #[test]
    fn endpoint_setters_and_url_join() {
        let mut base = BaseAdapter::new(&client("k"), AuthScheme::Bearer, Arc::new(NullSink)).unwrap();
        assert_eq!(base.url("/models").unwrap(), "https://api.example.test/v1/models");
        base.set_endpoint("http://localhost:9999/");
        assert_eq!(base.endpoint(), "http://localhost:9999");
        assert_eq!(
            base.url("chat/completions").unwrap(),
            "http://localhost:9999/chat/completions"
        );
        assert_eq!(
            base.url("http://localhost:9999/p/1").unwrap(),
            "http://localhost:9999/p/1"
        );
        base.set_header("anthropic-version", "2023-06-01").unwrap();
        assert_eq!(base.headers()["anthropic-version"], "2023-06-01");
    }

    #[test]
    fn absolute_urls_must_stay_on_the_endpoint_origin() {
        let base = BaseAdapter::new(&client("k"), AuthScheme::Token, Arc::new(NullSink)).unwrap();
        assert_eq!(
            base.url("https://api.example.test/v1/predictions/p1").unwrap(),
            "https://api.example.test/v1/predictions/p1"
        );
        for foreign in [
            "https://attacker.test/v1/predictions/p1",
            "http://api.example.test/v1/predictions/p1",
            "https://api.example.test:8443/v1/predictions/p1",
        ] {
            let err = base.url(foreign).unwrap_err();
            assert_eq!(err.code, codes::FOREIGN_URL, "{foreign}");
            assert!(!err.retryable);
        }
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_network() {
        let base = BaseAdapter::new(&client("k"), AuthScheme::Bearer, Arc::new(NullSink)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = base.get("/models", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
