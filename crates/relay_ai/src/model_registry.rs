//! Static fallback registry, the last discovery tier.
//!
//! Used when a vendor has no local configuration and its live listing is
//! unavailable. Also supplies metadata for live-listed ids it recognises.

use once_cell::sync::Lazy;

use crate::types::{Model, ModelFeatures, ModelSource};

/// Token limit given to the placeholder model of an unknown vendor.
pub const GENERIC_MAX_TOKENS: u32 = 4096;

/// One known model with its pricing (USD per million tokens).
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackEntry {
    pub vendor: &'static str,
    pub vendor_name: &'static str,
    pub id: &'static str,
    pub name: &'static str,
    pub max_tokens: u32,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    pub open_source: bool,
}

impl FallbackEntry {
    pub fn to_model(&self) -> Model {
        let mut model = Model::new(self.vendor, self.id, ModelSource::Fallback);
        self.apply(&mut model);
        model
    }

    /// Copy this entry's metadata onto `model`, keeping its id and source.
    pub fn apply(&self, model: &mut Model) {
        model.name = self.name.to_string();
        model.display_name = self.name.to_string();
        model.max_tokens = self.max_tokens;
        model.input_cost_per_mtok = self.input_cost_per_mtok;
        model.output_cost_per_mtok = self.output_cost_per_mtok;
        model.is_free = self.input_cost_per_mtok == 0.0 && self.output_cost_per_mtok == 0.0;
        model.is_open_source = self.open_source;
        model.features = ModelFeatures {
            streaming: true,
            ..model.features
        };
    }
}

#[allow(clippy::too_many_arguments)]
const fn entry(
    vendor: &'static str,
    vendor_name: &'static str,
    id: &'static str,
    name: &'static str,
    max_tokens: u32,
    input_cost_per_mtok: f64,
    output_cost_per_mtok: f64,
    open_source: bool,
) -> FallbackEntry {
    FallbackEntry {
        vendor,
        vendor_name,
        id,
        name,
        max_tokens,
        input_cost_per_mtok,
        output_cost_per_mtok,
        open_source,
    }
}

static BUILTIN: Lazy<Vec<FallbackEntry>> = Lazy::new(|| {
    vec![
        // ---- OpenAI ----
        entry("openai", "OpenAI", "gpt-4", "GPT-4", 8192, 30.0, 60.0, false),
        entry("openai", "OpenAI", "gpt-4-turbo", "GPT-4 Turbo", 128_000, 10.0, 30.0, false),
        entry("openai", "OpenAI", "gpt-3.5-turbo", "GPT-3.5 Turbo", 16_385, 0.5, 1.5, false),
        // ---- Anthropic ----
        entry("anthropic", "Anthropic", "claude-3-opus-20240229", "Claude 3 Opus", 200_000, 15.0, 75.0, false),
        entry("anthropic", "Anthropic", "claude-3-sonnet-20240229", "Claude 3 Sonnet", 200_000, 3.0, 15.0, false),
        // ---- Groq ----
        entry("groq", "Groq", "llama2-70b-4096", "LLaMA2 70B", 4096, 0.7, 0.8, true),
        entry("groq", "Groq", "mixtral-8x7b-32768", "Mixtral 8x7B", 32_768, 0.27, 0.27, true),
        // ---- Google ----
        entry("gemini", "Google", "gemini-pro", "Gemini Pro", 30_720, 0.5, 1.5, false),
        // ---- DeepSeek ----
        entry("deepseek", "DeepSeek", "deepseek-chat", "DeepSeek Chat", 32_768, 0.14, 0.28, true),
        // ---- NVIDIA ----
        entry("nvidia", "NVIDIA", "llama2-70b", "Llama 2 70B", 4096, 0.0, 0.0, true),
        // ---- OpenRouter ----
        entry("openrouter", "OpenRouter", "openai/gpt-4", "GPT-4 (OpenRouter)", 8192, 30.0, 60.0, false),
        entry("openrouter", "OpenRouter", "anthropic/claude-2", "Claude 2 (OpenRouter)", 100_000, 8.0, 24.0, false),
        // ---- Together ----
        entry("together", "Together AI", "llama-2-70b-chat", "Llama 2 70B Chat", 4096, 0.9, 0.9, true),
        // ---- Mistral ----
        entry("mistral", "Mistral AI", "mistral-tiny", "Mistral Tiny", 32_000, 0.25, 0.25, true),
        entry("mistral", "Mistral AI", "mistral-small", "Mistral Small", 32_000, 2.0, 6.0, false),
        // ---- Fireworks ----
        entry("fireworks", "Fireworks AI", "llama-v2-7b-chat", "Llama 2 7B Chat", 4096, 0.2, 0.2, true),
        // ---- Perplexity ----
        entry("perplexity", "Perplexity", "pplx-70b-online", "PPLX 70B Online", 4096, 1.0, 1.0, false),
        // ---- Hugging Face ----
        entry("huggingface", "Hugging Face", "llama-2-7b-chat", "Llama 2 7B Chat", 4096, 0.0, 0.0, true),
    ]
});

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FallbackRegistry {
    entries: Vec<FallbackEntry>,
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FallbackRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN.clone(),
        }
    }

    pub fn new(entries: Vec<FallbackEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FallbackEntry] {
        &self.entries
    }

    /// Fallback models for `vendor`. An unknown vendor gets a single generic
    /// placeholder; an empty vendor id gets nothing.
    pub fn models_for(&self, vendor: &str) -> Vec<Model> {
        if vendor.trim().is_empty() {
            return Vec::new();
        }
        let known: Vec<Model> = self
            .entries
            .iter()
            .filter(|e| e.vendor.eq_ignore_ascii_case(vendor))
            .map(|e| {
                let mut model = e.to_model();
                model.vendor = vendor.to_string();
                model
            })
            .collect();
        if !known.is_empty() {
            return known;
        }

        let id = format!("{vendor}-model");
        let mut model = Model::new(vendor, id.clone(), ModelSource::Fallback);
        model.name = format!("{vendor} model");
        model.display_name = model.name.clone();
        model.max_tokens = GENERIC_MAX_TOKENS;
        vec![model]
    }

    pub fn find(&self, vendor: &str, id: &str) -> Option<&FallbackEntry> {
        self.entries
            .iter()
            .find(|e| e.vendor.eq_ignore_ascii_case(vendor) && e.id == id)
    }

    /// Human-readable vendor name, when the registry knows the vendor.
    pub fn vendor_name(&self, vendor: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|e| e.vendor.eq_ignore_ascii_case(vendor))
            .map(|e| e.vendor_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(models: &[Model]) -> Vec<&str> {
        models.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn openai_fallbacks() {
        let models = FallbackRegistry::builtin().models_for("openai");
        assert_eq!(ids(&models), ["gpt-4", "gpt-4-turbo", "gpt-3.5-turbo"]);
        assert!(models.iter().all(|m| m.source == ModelSource::Fallback && m.max_tokens > 0));
    }

    #[test]
    fn anthropic_and_mistral_limits() {
        let reg = FallbackRegistry::builtin();
        let anthropic = reg.models_for("anthropic");
        assert_eq!(anthropic.len(), 2);
        assert!(anthropic.iter().all(|m| m.max_tokens == 200_000));

        let mistral = reg.models_for("mistral");
        assert_eq!(ids(&mistral), ["mistral-tiny", "mistral-small"]);
        assert!(mistral.iter().all(|m| m.max_tokens == 32_000));
    }

    #[test]
    fn single_model_vendors() {
        let reg = FallbackRegistry::builtin();
        for (vendor, id) in [
            ("gemini", "gemini-pro"),
            ("deepseek", "deepseek-chat"),
            ("nvidia", "llama2-70b"),
            ("together", "llama-2-70b-chat"),
            ("fireworks", "llama-v2-7b-chat"),
            ("perplexity", "pplx-70b-online"),
            ("huggingface", "llama-2-7b-chat"),
        ] {
            let models = reg.models_for(vendor);
            assert_eq!(ids(&models), [id], "{vendor}");
        }
        assert_eq!(reg.models_for("gemini")[0].max_tokens, 30_720);
        assert_eq!(reg.vendor_name("huggingface"), Some("Hugging Face"));
        assert_eq!(reg.models_for("groq").len(), 2);
        assert_eq!(reg.models_for("openrouter").len(), 2);
    }

    #[test]
    fn unknown_vendor_gets_placeholder() {
        let models = FallbackRegistry::builtin().models_for("unknown-provider");
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "unknown-provider-model");
        assert_eq!(models[0].vendor, "unknown-provider");
        assert_eq!(models[0].max_tokens, GENERIC_MAX_TOKENS);
    }

    #[test]
    fn empty_vendor_gets_nothing() {
        assert!(FallbackRegistry::builtin().models_for("").is_empty());
    }

    #[test]
    fn free_and_open_flags() {
        let reg = FallbackRegistry::builtin();
        let hf = &reg.models_for("huggingface")[0];
        assert!(hf.is_free && hf.is_open_source);
        let gpt4 = reg.find("openai", "gpt-4").unwrap().to_model();
        assert!(!gpt4.is_free && !gpt4.is_open_source);
        assert!(reg.find("openai", "gpt-5").is_none());
    }
}
