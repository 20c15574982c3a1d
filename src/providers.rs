//! Built-in upstream presets for common LLM API vendors.
//!
//! A preset supplies the base URL, wire format and API-key variable so a
//! config entry only needs the vendor's name.

use crate::canonical::ApiFormat;

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub format: ApiFormat,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        format: ApiFormat::OpenAi,
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        format: ApiFormat::OpenAi,
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        format: ApiFormat::OpenAi,
        default_api_key_env: "FIREWORKS_API_KEY",
    },
    ProviderPreset {
        name: "grok",
        base_url: "https://api.x.ai/v1",
        format: ApiFormat::OpenAi,
        default_api_key_env: "XAI_API_KEY",
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        format: ApiFormat::OpenAi,
        default_api_key_env: "TOGETHER_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        format: ApiFormat::OpenAi,
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        format: ApiFormat::OpenAi,
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderPreset {
        name: "anthropic",
        base_url: "https://api.anthropic.com",
        format: ApiFormat::Anthropic,
        default_api_key_env: "ANTHROPIC_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }

    /// Comma-separated preset names, for error messages.
    #[must_use]
    pub fn known_names() -> String {
        PRESETS.iter().map(|p| p.name).collect::<Vec<_>>().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("OpenRouter").is_some());
        assert!(ProviderPreset::from_name("unknown_provider").is_none());
    }

    #[test]
    fn test_only_anthropic_speaks_messages() {
        for preset in ProviderPreset::all() {
            let expected = if preset.name == "anthropic" {
                ApiFormat::Anthropic
            } else {
                ApiFormat::OpenAi
            };
            assert_eq!(preset.format, expected, "preset {}", preset.name);
        }
    }

    #[test]
    fn test_no_preset_fronts_responses() {
        assert!(ProviderPreset::all()
            .iter()
            .all(|p| p.format != ApiFormat::Responses));
    }
}
