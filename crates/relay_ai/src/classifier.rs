//! Maps raw vendor failures onto the canonical [`ProviderError`] taxonomy.
//!
//! Classification is pure: a vendor id, an optional HTTP status, the body and
//! the response headers go in; a fully populated error comes out. Each vendor
//! has its own status table, and a second pass ([`derive_kind`]) lets code
//! evidence such as `QUOTA` override what the status alone would suggest.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ErrorKind, ProviderError, codes};

const MAX_MESSAGE_LEN: usize = 200;

// ---------------------------------------------------------------------------
// Vendor tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    OpenAi,
    Anthropic,
    DeepSeek,
    Google,
    Generic,
}

impl Table {
    fn for_vendor(vendor: &str) -> Self {
        match relay_core::normalize_vendor(vendor).as_str() {
            "openai" => Self::OpenAi,
            "anthropic" => Self::Anthropic,
            "deepseek" => Self::DeepSeek,
            "google" | "gemini" => Self::Google,
            _ => Self::Generic,
        }
    }

    /// Status → (code, default message, retryable).
    fn lookup(self, status: u16) -> (&'static str, &'static str, bool) {
        match (self, status) {
            (Self::Generic, 400 | 422) | (_, 400) => {
                (codes::INVALID_REQUEST, "Invalid request", false)
            }
            (Self::Generic, 401 | 403) => {
                (codes::AUTHENTICATION_FAILED, "Authentication failed", false)
            }
            (_, 401) => (codes::AUTHENTICATION_FAILED, "Invalid API key", false),
            (_, 403) => (codes::PERMISSION_DENIED, "Permission denied", false),
            (_, 404) => (codes::NOT_FOUND, "Resource not found", false),
            (_, 408) => (codes::TIMEOUT, "Request timed out", true),
            (_, 429) => (codes::RATE_LIMIT_EXCEEDED, "Rate limit exceeded", true),
            (Self::Anthropic, 529) => (codes::OVERLOADED, "Service overloaded", true),
            (Self::Generic, 500..=599) | (_, 500 | 502 | 503 | 504) => {
                (codes::SERVER_ERROR, "Server error", true)
            }
            _ => (codes::UNKNOWN_ERROR, "Unknown error", false),
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Per-vendor classifier. Cheap to clone; holds only the vendor id.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    vendor: String,
}

impl ErrorClassifier {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Classify a failed exchange. `status == None` means no response arrived.
    pub fn classify(
        &self,
        status: Option<StatusCode>,
        body: &[u8],
        headers: &HeaderMap,
    ) -> ProviderError {
        classify(&self.vendor, status, body, headers)
    }

    /// Classify a transport failure from reqwest.
    pub fn from_transport(&self, err: &reqwest::Error) -> ProviderError {
        if let Some(status) = err.status() {
            return self.classify(Some(status), &[], &HeaderMap::new());
        }
        if err.is_timeout() {
            ProviderError::timeout(&self.vendor, format!("Request timed out: {err}"))
        } else if err.is_connect() {
            ProviderError::network(&self.vendor, format!("Connection failed: {err}"))
        } else if err.is_decode() {
            ProviderError::decode(&self.vendor, format!("Malformed response body: {err}"))
        } else {
            ProviderError::network(&self.vendor, err.to_string())
        }
    }
}

/// Classify a vendor failure into a canonical [`ProviderError`].
pub fn classify(
    vendor: &str,
    status: Option<StatusCode>,
    body: &[u8],
    headers: &HeaderMap,
) -> ProviderError {
    let Some(status) = status else {
        return ProviderError::network(vendor, "Network connection failed");
    };
    let status = status.as_u16();

    let (mut code, default_message, mut retryable) = Table::for_vendor(vendor).lookup(status);
    let detail = parse_body(body);

    if detail
        .vendor_code
        .as_deref()
        .is_some_and(|c| c.to_ascii_lowercase().contains("quota"))
    {
        code = codes::QUOTA_EXCEEDED;
    }

    let kind = derive_kind(status, code);
    if kind == ErrorKind::Quota {
        retryable = false;
    }

    let retry_after = if status == 429 {
        parse_retry_after(headers)
    } else {
        None
    };

    let message = detail
        .message
        .map(|m| truncate(&m))
        .unwrap_or_else(|| default_message.to_string());

    let mut err = ProviderError::new(vendor, kind, code, message, retryable)
        .with_status(status)
        .with_body(Bytes::copy_from_slice(body));
    err.retry_after = retry_after;
    err
}

/// Pick the canonical kind. Code substrings win over the status code.
pub fn derive_kind(status: u16, code: &str) -> ErrorKind {
    let code = code.to_ascii_uppercase();
    if code.contains("AUTH") {
        return ErrorKind::Auth;
    }
    if code.contains("RATE_LIMIT") {
        return ErrorKind::RateLimit;
    }
    if code.contains("QUOTA") {
        return ErrorKind::Quota;
    }
    if code.contains("TIMEOUT") {
        return ErrorKind::Timeout;
    }
    match status {
        500..=599 => ErrorKind::Server,
        408 => ErrorKind::Timeout,
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimit,
        400..=499 => ErrorKind::InvalidRequest,
        _ => ErrorKind::Unknown,
    }
}

/// `Retry-After` as integer seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Ok(secs) = raw.parse::<f64>() {
        return (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    wait.to_std().ok().filter(|d| !d.is_zero())
}

// ---------------------------------------------------------------------------
// Body inspection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BodyDetail {
    message: Option<String>,
    vendor_code: Option<String>,
}

/// Pull a human message and a vendor error code out of the common JSON
/// envelopes: `{"error":{"message","code","type"}}`, `{"message"}`,
/// `{"detail"}` and `{"error":"..."}`.
fn parse_body(body: &[u8]) -> BodyDetail {
    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        let text = String::from_utf8_lossy(body).trim().to_string();
        return BodyDetail {
            message: (!text.is_empty()).then_some(text),
            vendor_code: None,
        };
    };

    let error = json.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .or_else(|| json.get("message"))
        .or_else(|| json.get("detail"))
        .or_else(|| error.filter(|e| e.is_string()))
        .and_then(as_text);

    let vendor_code = error
        .and_then(|e| e.get("code").filter(|c| !c.is_null()).or_else(|| e.get("type")))
        .or_else(|| json.get("code"))
        .and_then(as_text);

    BodyDetail {
        message,
        vendor_code,
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() > MAX_MESSAGE_LEN {
        let cut: String = message.chars().take(MAX_MESSAGE_LEN).collect();
        format!("{cut}...")
    } else {
        message.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
