//! Built-in vendor table: default endpoints, key variables and protocols.

/// Wire protocol family spoken by a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `POST /chat/completions`, `GET /models`, bearer auth.
    OpenAi,
    /// `POST /messages`, `x-api-key` + `anthropic-version`.
    Anthropic,
    /// `POST /generate`, single prompt.
    Cohere,
    /// Asynchronous predictions polled to completion.
    Replicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProfile {
    pub id: &'static str,
    pub display_name: &'static str,
    pub default_base_url: &'static str,
    pub api_key_env: &'static str,
    pub protocol: Protocol,
}

const fn openai_compatible(
    id: &'static str,
    display_name: &'static str,
    default_base_url: &'static str,
    api_key_env: &'static str,
) -> VendorProfile {
    VendorProfile {
        id,
        display_name,
        default_base_url,
        api_key_env,
        protocol: Protocol::OpenAi,
    }
}

pub const VENDORS: &[VendorProfile] = &[
    openai_compatible("openai", "OpenAI", "https://api.openai.com/v1", "OPENAI_API_KEY"),
    VendorProfile {
        id: "anthropic",
        display_name: "Anthropic",
        default_base_url: "https://api.anthropic.com/v1",
        api_key_env: "ANTHROPIC_API_KEY",
        protocol: Protocol::Anthropic,
    },
    openai_compatible("deepseek", "DeepSeek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
    openai_compatible("groq", "Groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY"),
    openai_compatible(
        "siliconflow",
        "SiliconFlow",
        "https://api.siliconflow.cn/v1",
        "SILICONFLOW_API_KEY",
    ),
    VendorProfile {
        id: "cohere",
        display_name: "Cohere",
        default_base_url: "https://api.cohere.ai/v1",
        api_key_env: "COHERE_API_KEY",
        protocol: Protocol::Cohere,
    },
    VendorProfile {
        id: "replicate",
        display_name: "Replicate",
        default_base_url: "https://api.replicate.com/v1",
        api_key_env: "REPLICATE_API_KEY",
        protocol: Protocol::Replicate,
    },
    openai_compatible("openrouter", "OpenRouter", "https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
    openai_compatible("mistral", "Mistral", "https://api.mistral.ai/v1", "MISTRAL_API_KEY"),
    openai_compatible("together", "Together", "https://api.together.xyz/v1", "TOGETHER_API_KEY"),
    openai_compatible(
        "fireworks",
        "Fireworks",
        "https://api.fireworks.ai/inference/v1",
        "FIREWORKS_API_KEY",
    ),
    openai_compatible("perplexity", "Perplexity", "https://api.perplexity.ai", "PERPLEXITY_API_KEY"),
    openai_compatible("nvidia", "NVIDIA", "https://integrate.api.nvidia.com/v1", "NVIDIA_API_KEY"),
    openai_compatible("cerebras", "Cerebras", "https://api.cerebras.ai/v1", "CEREBRAS_API_KEY"),
    openai_compatible("sambanova", "SambaNova", "https://api.sambanova.ai/v1", "SAMBANOVA_API_KEY"),
    openai_compatible("hyperbolic", "Hyperbolic", "https://api.hyperbolic.xyz/v1", "HYPERBOLIC_API_KEY"),
    openai_compatible("kimi", "Kimi", "https://api.moonshot.cn/v1", "KIMI_API_KEY"),
    openai_compatible("novita", "Novita", "https://api.novita.ai/v3/openai", "NOVITA_API_KEY"),
];

/// Look up a built-in vendor by id (case-insensitive).
pub fn profile(vendor: &str) -> Option<&'static VendorProfile> {
    VENDORS.iter().find(|p| p.id.eq_ignore_ascii_case(vendor))
}

/// Human-readable vendor name; unknown ids are shown as given.
pub fn label(vendor: &str) -> &str {
    profile(vendor).map_or(vendor, |p| p.display_name)
}
