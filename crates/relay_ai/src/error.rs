//! The single error type every vendor call produces.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Canonical error codes shared by every vendor table.
pub mod codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const AUTHENTICATION_FAILED: &str = "AUTHENTICATION_FAILED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
    pub const OVERLOADED: &str = "OVERLOADED";
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const DECODE_ERROR: &str = "DECODE_ERROR";
    pub const STREAM_ERROR: &str = "STREAM_ERROR";
    pub const CANCELLED: &str = "CANCELLED";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const NO_ENDPOINTS: &str = "NO_ENDPOINTS";
    pub const PREDICTION_FAILED: &str = "PREDICTION_FAILED";
    pub const FOREIGN_URL: &str = "FOREIGN_URL";
}

/// Canonical failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    RateLimit,
    Quota,
    InvalidRequest,
    Server,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Kinds the recovery engine is allowed to absorb and retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimit | Self::Server | Self::Timeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Auth => write!(f, "auth"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Quota => write!(f, "quota"),
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::Server => write!(f, "server"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified vendor failure.
///
/// Display always names the vendor, the kind, the HTTP status when one was
/// received and whether the failure is retryable.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "{vendor} {kind} error{}: {message} [{code}, {}]",
    status_suffix(.status),
    retry_label(*.retryable)
)]
pub struct ProviderError {
    pub vendor: String,
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub raw_body: Bytes,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

fn retry_label(retryable: bool) -> &'static str {
    if retryable { "retryable" } else { "not retryable" }
}

impl ProviderError {
    pub fn new(
        vendor: impl Into<String>,
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            kind,
            code: code.into(),
            message: message.into(),
            status: None,
            retryable,
            retry_after: None,
            raw_body: Bytes::new(),
        }
    }

    pub fn invalid_request(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vendor, ErrorKind::InvalidRequest, codes::INVALID_REQUEST, message, false)
    }

    /// No response was received at all.
    pub fn network(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vendor, ErrorKind::Network, codes::NETWORK_ERROR, message, true)
    }

    pub fn timeout(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vendor, ErrorKind::Timeout, codes::TIMEOUT, message, true)
    }

    /// The caller's cancellation token fired.
    pub fn cancelled(vendor: impl Into<String>) -> Self {
        Self::new(
            vendor,
            ErrorKind::Network,
            codes::CANCELLED,
            "operation cancelled",
            false,
        )
    }

    /// A 2xx body that could not be decoded.
    pub fn decode(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vendor, ErrorKind::Unknown, codes::DECODE_ERROR, message, false)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.raw_body = body.into();
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == codes::CANCELLED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_vendor_kind_status_and_retryability() {
        let err = ProviderError::new(
            "openai",
            ErrorKind::RateLimit,
            codes::RATE_LIMIT_EXCEEDED,
            "slow down",
            true,
        )
        .with_status(429);
        let text = err.to_string();
        assert!(text.contains("openai"));
        assert!(text.contains("rate_limit"));
        assert!(text.contains("HTTP 429"));
        assert!(text.contains("retryable"));
        assert!(!text.contains("not retryable"));
    }

    #[test]
    fn display_without_status() {
        let err = ProviderError::network("groq", "connection refused");
        let text = err.to_string();
        assert!(!text.contains("HTTP"));
        assert!(text.contains("network"));
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Server.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
        assert!(!ErrorKind::Auth.is_transient());
        assert!(!ErrorKind::Quota.is_transient());
        assert!(!ErrorKind::InvalidRequest.is_transient());
    }

    #[test]
    fn cancelled_is_not_retryable() {
        let err = ProviderError::cancelled("anthropic");
        assert!(err.is_cancelled());
        assert!(!err.retryable);
    }
}
