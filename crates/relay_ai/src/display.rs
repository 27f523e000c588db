//! Display names with feature suffixes, e.g. `GPT-4 (http3) (fast)`.

use crate::types::Model;

/// Response times below this count as fast.
pub const FAST_RESPONSE_MS: f64 = 1000.0;

/// Suffixes removed before formatting so reformatting never stacks them.
const KNOWN_SUFFIXES: &[&str] = &[
    "(brotli)",
    "(http3)",
    "(toon)",
    "(free to use)",
    "(open source)",
    "(fast)",
    "(optimized)",
    "(premium)",
    "(experimental)",
    "(beta)",
    "(prod)",
    "(stable)",
    "(deprecated)",
    "(legacy)",
    "(llmsvd)",
];

/// Remove every known parenthesised suffix from `name`.
pub fn strip_feature_suffixes(name: &str) -> String {
    let mut clean = name.to_string();
    for suffix in KNOWN_SUFFIXES {
        clean = clean.replace(&format!(" {suffix}"), "");
        if let Some(rest) = clean.strip_suffix(suffix) {
            clean = rest.trim_end().to_string();
        }
    }
    clean.trim().to_string()
}

/// Build the display name for `model` from its name and flags.
///
/// Suffix order is fixed: brotli, http3, open source, free to use, fast.
pub fn format_display_name(model: &Model) -> String {
    let base = if model.name.trim().is_empty() {
        strip_feature_suffixes(&model.id)
    } else {
        strip_feature_suffixes(&model.name)
    };

    let fast = model
        .response_time_ms
        .is_some_and(|ms| ms >= 0.0 && ms < FAST_RESPONSE_MS);
    let flags = [
        (model.features.brotli, "(brotli)"),
        (model.features.http3, "(http3)"),
        (model.is_open_source, "(open source)"),
        (model.is_free, "(free to use)"),
        (fast, "(fast)"),
    ];

    let mut out = base;
    for (on, suffix) in flags {
        if on {
            out.push(' ');
            out.push_str(suffix);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelSource;

    fn model(name: &str) -> Model {
        let mut m = Model::new("openai", "gpt-4", ModelSource::Config);
        m.name = name.to_string();
        m
    }

    #[test]
    fn plain_name_without_flags() {
        assert_eq!(format_display_name(&model("GPT-4")), "GPT-4");
    }

    #[test]
    fn suffixes_in_fixed_order() {
        let mut m = model("Llama 3");
        m.features.brotli = true;
        m.features.http3 = true;
        m.is_open_source = true;
        m.is_free = true;
        m.response_time_ms = Some(420.0);
        assert_eq!(
            format_display_name(&m),
            "Llama 3 (brotli) (http3) (open source) (free to use) (fast)"
        );
    }

    #[test]
    fn slow_or_unknown_latency_is_not_fast() {
        let mut m = model("GPT-4");
        m.response_time_ms = Some(1000.0);
        assert_eq!(format_display_name(&m), "GPT-4");
        m.response_time_ms = None;
        assert_eq!(format_display_name(&m), "GPT-4");
    }

    #[test]
    fn reformatting_does_not_stack() {
        let mut m = model("GPT-4 (http3) (llmsvd)");
        m.features.http3 = true;
        let once = format_display_name(&m);
        m.name = once.clone();
        assert_eq!(format_display_name(&m), once);
        assert_eq!(once, "GPT-4 (http3)");
    }

    #[test]
    fn empty_name_falls_back_to_id() {
        assert_eq!(format_display_name(&model("")), "gpt-4");
    }

    #[test]
    fn strip_handles_bare_suffix() {
        assert_eq!(strip_feature_suffixes("Mixtral (beta)"), "Mixtral");
        assert_eq!(strip_feature_suffixes("(fast)"), "");
    }
}
