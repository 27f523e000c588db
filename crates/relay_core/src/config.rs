use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error_handler::GatewayError;

/// Default lifetime of a resolved model list in the discovery cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Canonical form of a vendor id for policy lookups: trimmed, ASCII
/// lowercase.
pub fn normalize_vendor(vendor: &str) -> String {
    vendor.trim().to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Per-vendor retry policy consumed by the recovery engine.
///
/// `retryable_errors` holds canonical error codes (`"RATE_LIMIT_EXCEEDED"`)
/// or HTTP status strings (`"429"`). An error is retried only when one of the
/// entries appears inside its code or equals its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "millis_serde")]
    pub initial_delay: Duration,
    #[serde(with = "millis_serde")]
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub retryable_errors: Vec<String>,
    /// Spread each computed delay by up to ±25%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::generic()
    }
}

impl RetryConfig {
    /// Retry policy for a vendor id. Unknown vendors get the generic policy.
    pub fn for_vendor(vendor: &str) -> Self {
        match normalize_vendor(vendor).as_str() {
            "openai" | "deepseek" | "google" | "gemini" => Self {
                max_retries: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                backoff_factor: 2.0,
                retryable_errors: status_list(&["429", "500", "502", "503", "504"]),
                jitter: false,
            },
            "anthropic" => Self {
                max_retries: 3,
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                backoff_factor: 2.0,
                retryable_errors: status_list(&["429", "500", "502", "503", "504", "529"]),
                jitter: false,
            },
            _ => Self::generic(),
        }
    }

    fn generic() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            retryable_errors: status_list(&["429", "500", "502", "503", "504"]),
            jitter: false,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::generic()
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(GatewayError::Config(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(GatewayError::Config(format!(
                "initial_delay {:?} exceeds max_delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Status strings plus the codes for transport failures, which carry no status.
fn status_list(statuses: &[&str]) -> Vec<String> {
    statuses
        .iter()
        .chain(["NETWORK_ERROR", "TIMEOUT"].iter())
        .map(|c| (*c).to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// HTTP client timeouts applied to the shared connection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

impl TransportConfig {
    pub fn for_vendor(vendor: &str) -> Self {
        match normalize_vendor(vendor).as_str() {
            "anthropic" => Self {
                connect_timeout_secs: 15,
                request_timeout_secs: 120,
            },
            _ => Self::default(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// VendorSettings
// ---------------------------------------------------------------------------

/// User overrides for a single vendor. Every field falls back to built-in
/// defaults when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub retry: Option<RetryConfig>,
    pub transport: Option<TransportConfig>,
    /// Skip this vendor at registration even when its key is set.
    pub disabled: bool,
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// Gateway configuration stored at `~/.relay/config.json`.
///
/// API keys are never part of this file. They are read from the process
/// environment when vendors are registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Local model catalogue consulted before any vendor API.
    pub models_config_path: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    /// Cap on concurrent per-vendor resolutions. `None` means one task per vendor.
    pub max_concurrency: Option<usize>,
    pub transport: TransportConfig,
    pub vendors: BTreeMap<String, VendorSettings>,
    pub verification_enabled: bool,
    pub verification_strict: bool,
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            models_config_path: None,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            max_concurrency: None,
            transport: TransportConfig::default(),
            vendors: BTreeMap::new(),
            verification_enabled: false,
            verification_strict: false,
            log_level: "info".into(),
        }
    }
}

impl GatewayConfig {
    /// Returns the base config directory: `~/.relay/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".relay"))
    }

    /// Returns the config file path: `~/.relay/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.relay/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Load config from `path`, falling back to defaults when the file is
    /// missing, unreadable or corrupt.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<GatewayConfig>(&data) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }

    /// Save config to a specific file path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Effective retry policy: user override first, then the vendor default.
    pub fn retry_for(&self, vendor: &str) -> RetryConfig {
        self.vendor_settings(vendor)
            .and_then(|v| v.retry.clone())
            .unwrap_or_else(|| RetryConfig::for_vendor(vendor))
    }

    /// Overrides for `vendor`, keyed exactly or by its normalized id.
    pub fn vendor_settings(&self, vendor: &str) -> Option<&VendorSettings> {
        self.vendors
            .get(vendor)
            .or_else(|| self.vendors.get(&normalize_vendor(vendor)))
    }

    /// Effective transport timeouts for a vendor.
    pub fn transport_for(&self, vendor: &str) -> TransportConfig {
        if let Some(t) = self.vendor_settings(vendor).and_then(|v| v.transport.clone()) {
            return t;
        }
        if self.transport != TransportConfig::default() {
            return self.transport.clone();
        }
        TransportConfig::for_vendor(vendor)
    }

    /// Check every retry override for internal consistency.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.max_concurrency == Some(0) {
            return Err(GatewayError::Config("max_concurrency must be at least 1".into()));
        }
        for (vendor, settings) in &self.vendors {
            if let Some(retry) = &settings.retry {
                retry.validate().map_err(|e| {
                    GatewayError::Config(format!("vendor {vendor}: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
