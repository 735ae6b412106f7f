//! Model capability table.
//!
//! Each provider has an explicit default for image input, plugin calling and
//! network search. Known models override those defaults. Lookups never guess:
//! an unknown model on a known provider gets the provider's default.

use serde::{Deserialize, Serialize};

use crate::dispatch::Provider;

/// What a model accepts beyond plain text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Accepts an attached image.
    #[serde(default)]
    pub image: bool,
    /// Supports tool calling (used by the plugin bridge).
    #[serde(default)]
    pub plugin: bool,
    /// Can search the web on its own.
    #[serde(default)]
    pub network: bool,
}

impl ModelCapabilities {
    const TEXT: Self = Self {
        image: false,
        plugin: false,
        network: false,
    };
    const VISION: Self = Self {
        image: true,
        plugin: false,
        network: false,
    };
    const TOOLS: Self = Self {
        image: false,
        plugin: true,
        network: false,
    };
    const VISION_TOOLS: Self = Self {
        image: true,
        plugin: true,
        network: false,
    };
}

/// A model the table knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub provider: Provider,
    pub id: &'static str,
    pub name: &'static str,
    pub capabilities: ModelCapabilities,
}

/// Capabilities assumed for models missing from the table.
pub fn provider_defaults(provider: Provider) -> ModelCapabilities {
    match provider {
        Provider::Ollama => ModelCapabilities::VISION,
        Provider::OpenAI
        | Provider::DeepSeek
        | Provider::ZhipuAI
        | Provider::MoonshotAI
        | Provider::StepFun
        | Provider::Gemini
        | Provider::Ernie
        | Provider::Tongyi
        | Provider::Spark
        | Provider::Tiangong => ModelCapabilities::TEXT,
    }
}

macro_rules! model {
    ($provider:ident, $id:literal, $name:literal, $caps:expr) => {
        ModelInfo {
            provider: Provider::$provider,
            id: $id,
            name: $name,
            capabilities: $caps,
        }
    };
}

const QWEN_TEXT: ModelCapabilities = ModelCapabilities {
    image: false,
    plugin: true,
    network: true,
};

static KNOWN_MODELS: &[ModelInfo] = &[
    model!(OpenAI, "gpt-3.5-turbo", "GPT-3.5 Turbo", ModelCapabilities::TOOLS),
    model!(OpenAI, "gpt-4-turbo", "GPT-4 Turbo", ModelCapabilities::VISION_TOOLS),
    model!(OpenAI, "gpt-4o", "GPT-4o", ModelCapabilities::VISION_TOOLS),
    model!(OpenAI, "gpt-4o-mini", "GPT-4o mini", ModelCapabilities::VISION_TOOLS),
    model!(DeepSeek, "deepseek-chat", "DeepSeek Chat", ModelCapabilities::TOOLS),
    model!(DeepSeek, "deepseek-coder", "DeepSeek Coder", ModelCapabilities::TEXT),
    model!(ZhipuAI, "glm-4", "GLM-4", ModelCapabilities::TOOLS),
    model!(ZhipuAI, "glm-4-air", "GLM-4 Air", ModelCapabilities::TOOLS),
    model!(ZhipuAI, "glm-4v", "GLM-4V", ModelCapabilities::VISION),
    model!(MoonshotAI, "moonshot-v1-8k", "Moonshot v1 8K", ModelCapabilities::TEXT),
    model!(MoonshotAI, "moonshot-v1-32k", "Moonshot v1 32K", ModelCapabilities::TEXT),
    model!(MoonshotAI, "moonshot-v1-128k", "Moonshot v1 128K", ModelCapabilities::TEXT),
    model!(StepFun, "step-1-8k", "Step 1 8K", ModelCapabilities::TOOLS),
    model!(StepFun, "step-1v-8k", "Step 1V 8K", ModelCapabilities::VISION_TOOLS),
    model!(Gemini, "gemini-pro", "Gemini Pro", ModelCapabilities::TEXT),
    model!(Gemini, "gemini-1.5-pro", "Gemini 1.5 Pro", ModelCapabilities::VISION),
    model!(Gemini, "gemini-1.5-flash", "Gemini 1.5 Flash", ModelCapabilities::VISION),
    model!(Ernie, "ERNIE-4.0", "ERNIE 4.0", ModelCapabilities::TEXT),
    model!(Ernie, "ERNIE-3.5-8K", "ERNIE 3.5", ModelCapabilities::TEXT),
    model!(Ernie, "ERNIE-Speed-8K", "ERNIE Speed", ModelCapabilities::TEXT),
    model!(Tongyi, "qwen-turbo", "Qwen Turbo", QWEN_TEXT),
    model!(Tongyi, "qwen-plus", "Qwen Plus", QWEN_TEXT),
    model!(Tongyi, "qwen-max", "Qwen Max", QWEN_TEXT),
    model!(Tongyi, "qwen-max-longcontext", "Qwen Max Long Context", QWEN_TEXT),
    model!(Tongyi, "qwen-vl-plus", "Qwen VL Plus", ModelCapabilities::VISION),
    model!(Tongyi, "qwen-vl-max", "Qwen VL Max", ModelCapabilities::VISION),
    model!(Spark, "v1.1", "Spark Lite", ModelCapabilities::TEXT),
    model!(Spark, "v2.1", "Spark V2.0", ModelCapabilities::TEXT),
    model!(Spark, "v3.1", "Spark Pro", ModelCapabilities::TEXT),
    model!(Spark, "v3.5", "Spark Max", ModelCapabilities::TEXT),
    model!(Spark, "v4.0", "Spark 4.0 Ultra", ModelCapabilities::TEXT),
    model!(Tiangong, "SkyChat-MegaVerse", "SkyChat MegaVerse", ModelCapabilities::TEXT),
];

/// Every model the table knows about.
pub fn known_models() -> &'static [ModelInfo] {
    KNOWN_MODELS
}

/// Known models for one provider, in table order.
pub fn models_for(provider: Provider) -> impl Iterator<Item = &'static ModelInfo> {
    KNOWN_MODELS.iter().filter(move |m| m.provider == provider)
}

pub fn find_model(provider: Provider, model: &str) -> Option<&'static ModelInfo> {
    models_for(provider).find(|m| m.id == model)
}

/// Capabilities of `model` on `provider`.
pub fn capabilities(provider: Provider, model: &str) -> ModelCapabilities {
    find_model(provider, model)
        .map(|m| m.capabilities)
        .unwrap_or_else(|| provider_defaults(provider))
}

pub fn is_support_image(provider: Provider, model: &str) -> bool {
    capabilities(provider, model).image
}

pub fn is_support_plugin(provider: Provider, model: &str) -> bool {
    capabilities(provider, model).plugin
}

pub fn is_support_network(provider: Provider, model: &str) -> bool {
    capabilities(provider, model).network
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_model_flags() {
        assert!(is_support_image(Provider::OpenAI, "gpt-4o"));
        assert!(is_support_plugin(Provider::OpenAI, "gpt-4o"));
        assert!(!is_support_image(Provider::OpenAI, "gpt-3.5-turbo"));
        assert!(is_support_network(Provider::Tongyi, "qwen-max"));
        assert!(!is_support_network(Provider::Tongyi, "qwen-vl-max"));
    }

    #[test]
    fn test_unknown_model_uses_provider_default() {
        assert!(is_support_image(Provider::Ollama, "llava:13b"));
        assert!(!is_support_plugin(Provider::Ollama, "llava:13b"));
        assert_eq!(
            capabilities(Provider::Gemini, "gemini-ultra"),
            provider_defaults(Provider::Gemini)
        );
    }

    #[test]
    fn test_model_id_is_case_sensitive() {
        assert!(find_model(Provider::Ernie, "ERNIE-4.0").is_some());
        assert!(find_model(Provider::Ernie, "ernie-4.0").is_none());
    }

    #[test]
    fn test_no_duplicate_entries() {
        let mut seen = HashSet::new();
        for model in known_models() {
            assert!(seen.insert((model.provider, model.id)), "{}", model.id);
        }
    }

    #[test]
    fn test_every_provider_has_a_known_model() {
        for provider in Provider::ALL {
            if provider == Provider::Ollama {
                continue;
            }
            assert!(models_for(provider).next().is_some(), "{provider}");
        }
    }
}
