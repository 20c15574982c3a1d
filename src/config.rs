use crate::canonical::ApiFormat;
use crate::error::{GatewayError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a whole vendor call, streaming included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Budget for recording an interaction after the response is sent
    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_secs: u64,
    pub default_provider: String,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Client model name -> upstream route
    #[serde(default)]
    pub models: HashMap<String, ModelRoute>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// `openai` or `anthropic`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Advertised on `/v1/models` in addition to what upstream lists
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoute {
    pub provider: String,
    /// Upstream model name; the client's name is kept when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A provider entry with preset defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub name: String,
    pub base_url: String,
    pub format: ApiFormat,
    pub api_key_env: Option<String>,
    pub models: Vec<String>,
}

impl ResolvedProvider {
    /// Read the API key from the environment. Providers without a key
    /// variable (local servers) send no credentials.
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        let Some(ref var) = self.api_key_env else {
            return Ok(None);
        };
        std::env::var(var).map(Some).map_err(|_| {
            GatewayError::config(format!(
                "Environment variable '{var}' not set. Set it with the API key for provider '{}'.",
                self.name
            ))
        })
    }
}

fn default_port() -> u16 {
    4222
}

fn default_request_timeout() -> u64 {
    300
}

fn default_persist_timeout() -> u64 {
    5
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(GatewayError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.persist_timeout_secs)
    }

    /// Every configured provider with defaults applied. A default provider
    /// that names a preset needs no table of its own.
    pub fn resolved_providers(&self) -> Result<Vec<ResolvedProvider>> {
        let mut entries = self.providers.clone();
        if !entries.contains_key(&self.default_provider)
            && ProviderPreset::from_name(&self.default_provider).is_some()
        {
            entries.insert(self.default_provider.clone(), ProviderConfig::default());
        }

        entries
            .iter()
            .map(|(name, entry)| resolve_provider(name, entry))
            .collect()
    }

    /// Check cross references: the default provider and every route target
    /// must exist.
    pub fn validate(&self) -> Result<()> {
        let providers = self.resolved_providers()?;
        let known = |name: &str| providers.iter().any(|p| p.name == name);

        if !known(&self.default_provider) {
            return Err(GatewayError::config(format!(
                "default_provider '{}' is neither configured under [providers] nor a known preset ({})",
                self.default_provider,
                ProviderPreset::known_names()
            )));
        }
        for (model, route) in &self.models {
            if !known(&route.provider) {
                return Err(GatewayError::config(format!(
                    "model route '{model}' points at unknown provider '{}'",
                    route.provider
                )));
            }
        }
        Ok(())
    }
}

fn resolve_provider(name: &str, entry: &ProviderConfig) -> Result<ResolvedProvider> {
    let preset = ProviderPreset::from_name(name);

    let base_url = entry
        .base_url
        .clone()
        .or_else(|| preset.map(|p| p.base_url.to_string()))
        .ok_or_else(|| {
            GatewayError::config(format!(
                "Unknown provider '{name}' and no base_url configured. Known providers: {}",
                ProviderPreset::known_names()
            ))
        })?;

    let format = match entry.format.as_deref() {
        Some(raw) => match ApiFormat::from_name(raw) {
            Some(ApiFormat::Responses) | None => {
                return Err(GatewayError::config(format!(
                    "provider '{name}' has unsupported format '{raw}' (expected openai or anthropic)"
                )))
            }
            Some(format) => format,
        },
        None => preset.map_or(ApiFormat::OpenAi, |p| p.format),
    };

    let api_key_env = entry
        .api_key_env
        .clone()
        .or_else(|| preset.map(|p| p.default_api_key_env.to_string()))
        .filter(|var| !var.is_empty());

    Ok(ResolvedProvider {
        name: name.to_string(),
        base_url: base_url.trim_end_matches('/').to_string(),
        format,
        api_key_env,
        models: entry.models.clone(),
    })
}

/// Candidate config locations, highest priority first.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("llm-relay.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("llm-relay")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("llm-relay").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("llm-relay").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".llm-relay.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(toml_text: &str) -> GatewayConfig {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000
default_provider = "openai"

[providers.openai]
api_key_env = "OPENAI_API_KEY"

[providers.claude]
base_url = "https://api.anthropic.com/"
format = "anthropic"

[models."claude-3-haiku"]
provider = "claude"
model = "claude-3-haiku-20240307"
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.persist_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.models.get("claude-3-haiku"),
            Some(&ModelRoute {
                provider: "claude".into(),
                model: Some("claude-3-haiku-20240307".into()),
            })
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_preset_defaults_fill_in() {
        let config = parse(r#"default_provider = "groq""#);
        let providers = config.resolved_providers().unwrap();

        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].base_url, "https://api.groq.com/openai/v1");
        assert_eq!(providers[0].format, ApiFormat::OpenAi);
        assert_eq!(providers[0].api_key_env.as_deref(), Some("GROQ_API_KEY"));
    }

    #[test]
    fn test_base_url_override_and_trailing_slash() {
        let config = parse(
            r#"
default_provider = "local"

[providers.local]
base_url = "http://localhost:8080/v1/"
"#,
        );
        let providers = config.resolved_providers().unwrap();

        assert_eq!(providers[0].base_url, "http://localhost:8080/v1");
        assert_eq!(providers[0].format, ApiFormat::OpenAi);
        assert!(providers[0].api_key_env.is_none());
        assert_eq!(providers[0].resolve_api_key().unwrap(), None);
    }

    #[test]
    fn test_unknown_provider_without_base_url_fails() {
        let config = parse(
            r#"
default_provider = "mystery"

[providers.mystery]
"#,
        );
        assert!(matches!(
            config.resolved_providers(),
            Err(GatewayError::Config { .. })
        ));
    }

    #[test]
    fn test_route_to_unknown_provider_fails_validation() {
        let config = parse(
            r#"
default_provider = "openai"

[models."gpt-4o"]
provider = "nowhere"
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_responses_is_not_an_upstream_format() {
        let config = parse(
            r#"
default_provider = "x"

[providers.x]
base_url = "http://x"
format = "responses"
"#,
        );
        assert!(config.resolved_providers().is_err());
    }
}
