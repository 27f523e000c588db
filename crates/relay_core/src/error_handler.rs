use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level gateway error for failures outside a single vendor call.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vendor not registered: {0}")]
    UnknownVendor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of errors for logging and user display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Invalid or missing configuration.
    ConfigError,
    /// Caller referenced something the gateway does not know about.
    UserError,
    /// Internal system error (file I/O, HTTP client setup).
    SystemError,
}

impl GatewayError {
    /// Returns the broad error category for routing and display purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::Serialization(_) => ErrorCategory::ConfigError,
            Self::UnknownVendor(_) => ErrorCategory::UserError,
            Self::Io(_) | Self::Internal(_) => ErrorCategory::SystemError,
        }
    }

    /// Returns a user-friendly message (hides internal details).
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("Configuration issue: {msg}"),
            Self::UnknownVendor(vendor) => format!("No vendor named '{vendor}' is registered."),
            Self::Io(_) => "File error. Check disk space and permissions.".into(),
            Self::Serialization(_) => "Configuration file is not valid JSON.".into(),
            Self::Internal(_) => "An unexpected error occurred.".into(),
        }
    }
}
