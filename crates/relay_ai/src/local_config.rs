//! Local model configuration, the first discovery tier.
//!
//! File layout:
//!
//! ```json
//! {
//!   "provider": {
//!     "openai": {
//!       "models": {
//!         "gpt-4": {
//!           "name": "GPT-4",
//!           "maxTokens": 8192,
//!           "cost": { "input": 30, "output": 60 },
//!           "supports_http3": true,
//!           "response_time_ms": 850
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{LogLevel, LogSink};
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Model, ModelFeatures, ModelSource};

/// A source of operator-configured models.
#[async_trait]
pub trait LocalModelSource: Send + Sync {
    /// Configured models for `vendor`; empty when none are configured.
    async fn models_for(&self, vendor: &str) -> Vec<Model>;
}

/// No local configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyModelSource;

#[async_trait]
impl LocalModelSource for EmptyModelSource {
    async fn models_for(&self, _vendor: &str) -> Vec<Model> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    provider: BTreeMap<String, VendorSection>,
}

#[derive(Debug, Default, Deserialize)]
struct VendorSection {
    // Entries are decoded one at a time so a bad entry only loses itself.
    #[serde(default)]
    models: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelEntry {
    name: Option<String>,
    #[serde(rename = "maxTokens")]
    max_tokens: Option<f64>,
    cost: Option<CostEntry>,
    supports_brotli: bool,
    supports_http3: bool,
    open_weights: bool,
    structured_output: bool,
    response_time_ms: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CostEntry {
    input: f64,
    output: f64,
}

impl ModelEntry {
    fn into_model(self, vendor: &str, id: &str) -> Model {
        let mut model = Model::new(vendor, id, ModelSource::Config);
        if let Some(name) = self.name.filter(|n| !n.trim().is_empty()) {
            model.display_name = name.clone();
            model.name = name;
        }
        model.max_tokens = self
            .max_tokens
            .filter(|t| t.is_finite() && *t > 0.0)
            .map_or(0, |t| t.min(u32::MAX as f64) as u32);
        if let Some(cost) = self.cost {
            model.input_cost_per_mtok = cost.input;
            model.output_cost_per_mtok = cost.output;
            model.is_free = cost.input == 0.0 && cost.output == 0.0;
        }
        model.is_open_source = self.open_weights;
        model.response_time_ms = self.response_time_ms;
        model.features = ModelFeatures {
            streaming: true,
            brotli: self.supports_brotli,
            http3: self.supports_http3,
            structured_output: self.structured_output,
        };
        model
    }
}

/// Parse `text` and return the models configured for `vendor`.
pub fn parse_models(text: &str, vendor: &str) -> Result<Vec<Model>, serde_json::Error> {
    let file: ConfigFile = serde_json::from_str(text)?;
    let Some(section) = file.provider.get(vendor) else {
        return Ok(Vec::new());
    };
    Ok(section
        .models
        .iter()
        .filter(|(_, v)| v.is_object())
        .filter_map(|(id, v)| {
            serde_json::from_value::<ModelEntry>(v.clone())
                .ok()
                .map(|entry| entry.into_model(vendor, id))
        })
        .collect())
}

// ---------------------------------------------------------------------------
// JSON file source
// ---------------------------------------------------------------------------

/// Reads the configuration file on every lookup, so edits take effect on
/// the next cache miss.
pub struct JsonModelConfig {
    path: PathBuf,
    sink: Arc<dyn LogSink>,
}

impl JsonModelConfig {
    pub fn new(path: impl Into<PathBuf>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            path: path.into(),
            sink,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LocalModelSource for JsonModelConfig {
    async fn models_for(&self, vendor: &str) -> Vec<Model> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) => {
                self.sink.log(
                    LogLevel::Debug,
                    "no local model config",
                    &relay_core::fields!(
                        "path" => self.path.display().to_string(),
                        "error" => e.to_string(),
                    ),
                );
                return Vec::new();
            }
        };

        match parse_models(&text, vendor) {
            Ok(models) => models,
            Err(e) => {
                self.sink.log(
                    LogLevel::Debug,
                    "unreadable local model config",
                    &relay_core::fields!(
                        "path" => self.path.display().to_string(),
                        "error" => e.to_string(),
                    ),
                );
                Vec::new()
            }
        }
    }
}
