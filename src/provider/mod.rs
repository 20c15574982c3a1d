//! Outbound side: the `Provider` contract and the registry of configured
//! upstreams.

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::canonical::{ApiFormat, CanonicalRequest, CanonicalResponse, RateLimitInfo};
use crate::codec::CodecRegistry;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::stream::EventStream;

pub use http::HttpProvider;

/// One model an upstream can serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: String,
}

/// An opened upstream stream.
pub struct ProviderStream {
    pub events: EventStream,
    /// Rate-limit headers from the stream's response head
    pub rate_limit: Option<RateLimitInfo>,
}

impl std::fmt::Debug for ProviderStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStream")
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

/// A vendor backend. Dropping a returned future or event stream cancels the
/// upstream call.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Wire format the vendor speaks
    fn format(&self) -> ApiFormat;

    async fn complete(&self, request: &CanonicalRequest) -> Result<CanonicalResponse>;

    async fn stream(&self, request: &CanonicalRequest) -> Result<ProviderStream>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Native token count, as the vendor's raw response body. `None` when the
    /// vendor has no such endpoint.
    async fn count_tokens(&self, _request: &CanonicalRequest) -> Result<Option<Bytes>> {
        Ok(None)
    }
}

/// Providers by configured name, built once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`HttpProvider`] per configured upstream. Fails on a missing API
    /// key so misconfiguration shows at startup.
    pub fn from_config(
        config: &GatewayConfig,
        codecs: &CodecRegistry,
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for resolved in config.resolved_providers()? {
            let codec = codecs.provider(resolved.format).ok_or_else(|| {
                GatewayError::config(format!(
                    "no codec registered for {} (provider '{}')",
                    resolved.format, resolved.name
                ))
            })?;
            let api_key = resolved.resolve_api_key()?;
            tracing::info!(
                provider = %resolved.name,
                base_url = %resolved.base_url,
                format = %resolved.format,
                "Registered provider"
            );
            registry.register(Arc::new(HttpProvider::new(
                resolved,
                api_key,
                codec,
                client.clone(),
            )));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_config() {
        let config: GatewayConfig = toml::from_str(
            r#"
default_provider = "local"

[providers.local]
base_url = "http://127.0.0.1:9"

[providers.claude]
base_url = "http://127.0.0.1:9"
format = "anthropic"
"#,
        )
        .unwrap();

        let registry = ProviderRegistry::from_config(
            &config,
            &CodecRegistry::with_defaults(),
            reqwest::Client::new(),
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("claude").unwrap().format(), ApiFormat::Anthropic);
        assert_eq!(registry.get("local").unwrap().format(), ApiFormat::OpenAi);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_requires_api_key() {
        let config: GatewayConfig = toml::from_str(
            r#"
default_provider = "keyed"

[providers.keyed]
base_url = "http://127.0.0.1:9"
api_key_env = "LLM_RELAY_TEST_KEY_THAT_IS_NEVER_SET"
"#,
        )
        .unwrap();

        let err = ProviderRegistry::from_config(
            &config,
            &CodecRegistry::with_defaults(),
            reqwest::Client::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("LLM_RELAY_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
