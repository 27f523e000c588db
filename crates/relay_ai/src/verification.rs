//! Model verification: asks a model whether it can see a code snippet and
//! keeps the outcome so discovery results can be filtered to models that
//! answered well.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use relay_core::{GatewayConfig, LogLevel, LogSink};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::providers::VendorAdapter;
use crate::types::{ChatMessage, ChatRequest, Model};

/// Lowest score a model may have in strict mode.
pub const STRICT_MIN_SCORE: f64 = 0.7;

// ---------------------------------------------------------------------------
// Reply classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    Affirmative,
    Negative,
    Unclear,
}

static NEGATIVE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)^\W*no\b").expect("valid regex"),
        Regex::new(r"(?i)\b(cannot|can't|can not|do not|don't|unable to)\s+see\b").expect("valid regex"),
        Regex::new(r"(?i)\bnot\s+visible\b").expect("valid regex"),
    ]
});

static AFFIRMATIVE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\byes\b").expect("valid regex"),
        Regex::new(r"(?i)\bi\s+(can\s+)?see\b").expect("valid regex"),
        Regex::new(r"(?i)\bvisible\b").expect("valid regex"),
    ]
});

/// Classify a model's answer to the code visibility prompt. A reply that
/// matches both sides counts as negative.
pub fn classify_reply(text: &str) -> ReplyClass {
    if NEGATIVE.iter().any(|re| re.is_match(text)) {
        ReplyClass::Negative
    } else if AFFIRMATIVE.iter().any(|re| re.is_match(text)) {
        ReplyClass::Affirmative
    } else {
        ReplyClass::Unclear
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub vendor: String,
    pub model: String,
    pub status: VerificationStatus,
    pub can_see_code: bool,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationOutcome {
    pub fn from_reply(vendor: &str, model: &str, reply: &str) -> Self {
        let (status, can_see_code, score) = match classify_reply(reply) {
            ReplyClass::Affirmative => (VerificationStatus::Verified, true, 1.0),
            ReplyClass::Unclear => (VerificationStatus::Failed, false, 0.5),
            ReplyClass::Negative => (VerificationStatus::Failed, false, 0.0),
        };
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            status,
            can_see_code,
            score,
            message: None,
            verified_at: Utc::now(),
        }
    }

    pub fn error(vendor: &str, model: &str, message: impl Into<String>) -> Self {
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            status: VerificationStatus::Error,
            can_see_code: false,
            score: 0.0,
            message: Some(message.into()),
            verified_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.vendor, self.model)
    }
}

// ---------------------------------------------------------------------------
// Verifiers
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        adapter: &dyn VendorAdapter,
        model: &str,
        cancel: &CancellationToken,
    ) -> VerificationOutcome;
}

const SAMPLE_CODE: &str = "def fibonacci(n):
    if n <= 1:
        return n
    return fibonacci(n-1) + fibonacci(n-2)

print(fibonacci(10))";

/// Sends a short Python snippet and asks the model to confirm it sees it.
#[derive(Debug, Clone)]
pub struct CodeVisibilityVerifier {
    max_tokens: u32,
}

impl Default for CodeVisibilityVerifier {
    fn default() -> Self {
        Self { max_tokens: 100 }
    }
}

impl CodeVisibilityVerifier {
    pub fn prompt() -> String {
        format!(
            "Do you see my code? Please respond with \"Yes, I can see your python code\" if you can \
             see the code below, or \"No, I cannot see your code\" if you cannot see it.\n\n\
             Python code:\n```python\n{SAMPLE_CODE}\n```"
        )
    }
}

#[async_trait]
impl Verifier for CodeVisibilityVerifier {
    async fn verify(
        &self,
        adapter: &dyn VendorAdapter,
        model: &str,
        cancel: &CancellationToken,
    ) -> VerificationOutcome {
        let request = ChatRequest::new(model, vec![ChatMessage::user(Self::prompt())])
            .with_temperature(0.0)
            .with_max_tokens(self.max_tokens);
        match adapter.chat_completion(&request, cancel).await {
            Ok(response) => VerificationOutcome::from_reply(adapter.vendor(), model, response.content()),
            Err(e) => VerificationOutcome::error(adapter.vendor(), model, e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationConfig {
    pub enabled: bool,
    /// Require an affirmative, high-scoring outcome instead of any
    /// non-error one.
    pub strict: bool,
}

impl VerificationConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            enabled: config.verification_enabled,
            strict: config.verification_strict,
        }
    }
}

/// Outcomes keyed by `vendor:model`. With verification disabled every
/// model counts as verified.
pub struct VerificationStore {
    config: VerificationConfig,
    results: RwLock<HashMap<String, VerificationOutcome>>,
    sink: Arc<dyn LogSink>,
}

impl VerificationStore {
    pub fn new(config: VerificationConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config,
            results: RwLock::new(HashMap::new()),
            sink,
        }
    }

    pub fn config(&self) -> VerificationConfig {
        self.config
    }

    pub fn record(&self, outcome: VerificationOutcome) {
        self.sink.log(
            LogLevel::Info,
            "model verification recorded",
            &relay_core::fields!(
                "vendor" => outcome.vendor.clone(),
                "model" => outcome.model.clone(),
                "status" => outcome.status,
                "score" => outcome.score,
            ),
        );
        self.results.write().insert(outcome.key(), outcome);
    }

    pub fn outcome(&self, vendor: &str, model: &str) -> Option<VerificationOutcome> {
        self.results.read().get(&format!("{vendor}:{model}")).cloned()
    }

    pub fn is_model_verified(&self, vendor: &str, model: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let results = self.results.read();
        let Some(outcome) = results.get(&format!("{vendor}:{model}")) else {
            return false;
        };
        if self.config.strict {
            outcome.status == VerificationStatus::Verified
                && outcome.can_see_code
                && outcome.score >= STRICT_MIN_SCORE
        } else {
            outcome.status != VerificationStatus::Error
        }
    }

    /// Keys of every recorded model that passes, sorted.
    pub fn verified_models(&self) -> Vec<String> {
        let candidates: Vec<(String, String)> = self
            .results
            .read()
            .values()
            .map(|o| (o.vendor.clone(), o.model.clone()))
            .collect();
        let mut keys: Vec<String> = candidates
            .into_iter()
            .filter(|(vendor, model)| self.is_model_verified(vendor, model))
            .map(|(vendor, model)| format!("{vendor}:{model}"))
            .collect();
        keys.sort();
        keys
    }

    pub fn filter_verified(&self, models: Vec<Model>) -> Vec<Model> {
        if !self.config.enabled {
            return models;
        }
        let total = models.len();
        let kept: Vec<Model> = models
            .into_iter()
            .filter(|m| self.is_model_verified(&m.vendor, &m.id))
            .collect();
        self.sink.log(
            LogLevel::Info,
            "filtered unverified models",
            &relay_core::fields!("total" => total, "verified" => kept.len()),
        );
        kept
    }

    /// Verify `models` through `adapter` concurrently and record each
    /// outcome. Does nothing while verification is disabled.
    pub async fn verify_models(
        &self,
        verifier: &dyn Verifier,
        adapter: &dyn VendorAdapter,
        models: &[Model],
        cancel: &CancellationToken,
    ) {
        if !self.config.enabled {
            return;
        }
        let outcomes = join_all(models.iter().map(|m| verifier.verify(adapter, &m.id, cancel))).await;
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn clear(&self) {
        self.results.write().clear();
    }
}
