//! HTTP upstream speaking OpenAI Chat Completions or Anthropic Messages.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

use super::{ModelInfo, Provider, ProviderStream};
use crate::canonical::{ApiFormat, CanonicalRequest, CanonicalResponse};
use crate::codec::ProviderCodec;
use crate::config::ResolvedProvider;
use crate::error::{GatewayError, Result};
use crate::ratelimit;
use crate::stream::{decode_sse, spawn_bounded};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Fields the Anthropic token-count endpoint rejects.
const NON_COUNTING_FIELDS: [&str; 6] = [
    "max_tokens",
    "stream",
    "temperature",
    "top_p",
    "stop_sequences",
    "metadata",
];

/// `GET /models` body; Anthropic and OpenAI share the `data[].id` shape.
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ListedModel>,
}

#[derive(Debug, Deserialize)]
struct ListedModel {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

pub struct HttpProvider {
    name: String,
    format: ApiFormat,
    base_url: String,
    api_key: Option<String>,
    /// Configured extra model names
    models: Vec<String>,
    codec: Arc<dyn ProviderCodec>,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(
        resolved: ResolvedProvider,
        api_key: Option<String>,
        codec: Arc<dyn ProviderCodec>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: resolved.name,
            format: resolved.format,
            base_url: resolved.base_url,
            api_key,
            models: resolved.models,
            codec,
            client,
        }
    }

    fn completions_url(&self) -> String {
        match self.format {
            ApiFormat::Anthropic => format!("{}/v1/messages", self.base_url),
            ApiFormat::OpenAi | ApiFormat::Responses => {
                format!("{}/chat/completions", self.base_url)
            }
        }
    }

    fn models_url(&self) -> String {
        match self.format {
            ApiFormat::Anthropic => format!("{}/v1/models", self.base_url),
            ApiFormat::OpenAi | ApiFormat::Responses => format!("{}/models", self.base_url),
        }
    }

    /// Attach the vendor's auth and version headers.
    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.format {
            ApiFormat::Anthropic => {
                let builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
                match self.api_key {
                    Some(ref key) => builder.header("x-api-key", key),
                    None => builder,
                }
            }
            ApiFormat::OpenAi | ApiFormat::Responses => match self.api_key {
                Some(ref key) => builder.bearer_auth(key),
                None => builder,
            },
        }
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<reqwest::Response> {
        self.authorize(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::warn!(provider = %self.name, url = %url, "Upstream request timed out");
                    return GatewayError::Cancelled;
                }
                tracing::error!(provider = %self.name, url = %url, error = %e, "Upstream request failed");
                GatewayError::from(e)
            })
    }

    /// The client's own bytes when it already speaks this upstream's format,
    /// else a fresh encoding.
    fn wire_body(&self, request: &CanonicalRequest, stream: bool) -> Result<Vec<u8>> {
        match request.raw_request {
            Some(ref raw) if request.source_api == self.format && request.stream == stream => {
                tracing::debug!(provider = %self.name, "Pass-through request");
                Ok(raw.to_vec())
            }
            _ => {
                let mut wire = request.clone();
                wire.stream = stream;
                self.codec.encode_request(&wire)
            }
        }
    }

    /// Turn a non-2xx upstream reply into a classified error.
    async fn upstream_error(&self, response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();
        let error = self.codec.decode_error(status, &body);
        tracing::warn!(
            provider = %self.name,
            status,
            kind = %error.kind.as_str(),
            "Upstream returned error"
        );
        GatewayError::Upstream(error)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> ApiFormat {
        self.format
    }

    async fn complete(&self, request: &CanonicalRequest) -> Result<CanonicalResponse> {
        let body = self.wire_body(request, false)?;
        let url = self.completions_url();

        tracing::info!(provider = %self.name, model = %request.model, url = %url, "POST");
        let response = self.post(&url, body).await?;
        if !response.status().is_success() {
            return Err(self.upstream_error(response).await);
        }

        let rate_limit = ratelimit::extract(response.headers());
        let bytes = response.bytes().await.map_err(|e| {
            GatewayError::provider(format!("Failed to read response body: {e}"))
        })?;
        tracing::debug!(provider = %self.name, body_len = bytes.len(), "Upstream response");

        let mut decoded = self.codec.decode_response(&bytes)?;
        decoded.rate_limit = rate_limit;
        decoded.raw_response = Some(bytes);
        Ok(decoded)
    }

    async fn stream(&self, request: &CanonicalRequest) -> Result<ProviderStream> {
        let body = self.wire_body(request, true)?;
        let url = self.completions_url();

        tracing::info!(provider = %self.name, model = %request.model, url = %url, "POST (streaming)");
        let response = self.post(&url, body).await?;
        if !response.status().is_success() {
            return Err(self.upstream_error(response).await);
        }

        let rate_limit = ratelimit::extract(response.headers());
        let events = decode_sse(response.bytes_stream(), self.codec.stream_decoder());
        Ok(ProviderStream {
            events: spawn_bounded(events),
            rate_limit,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.models_url();
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to fetch models: {e}")))?;

        if !response.status().is_success() {
            return Err(self.upstream_error(response).await);
        }

        let parsed: ModelsResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to parse models response: {e}")))?;

        let mut models: Vec<ModelInfo> = self
            .models
            .iter()
            .map(|id| ModelInfo {
                id: id.clone(),
                owned_by: self.name.clone(),
            })
            .collect();
        for listed in parsed.data {
            if models.iter().all(|m| m.id != listed.id) {
                models.push(ModelInfo {
                    id: listed.id,
                    owned_by: listed.owned_by.unwrap_or_else(|| self.name.clone()),
                });
            }
        }
        Ok(models)
    }

    async fn count_tokens(&self, request: &CanonicalRequest) -> Result<Option<Bytes>> {
        if self.format != ApiFormat::Anthropic {
            return Ok(None);
        }

        let mut body: serde_json::Value =
            serde_json::from_slice(&self.codec.encode_request(request)?)?;
        if let Some(obj) = body.as_object_mut() {
            for field in NON_COUNTING_FIELDS {
                obj.remove(field);
            }
        }

        let url = format!("{}/v1/messages/count_tokens", self.base_url);
        let response = self.post(&url, serde_json::to_vec(&body)?).await?;
        if !response.status().is_success() {
            return Err(self.upstream_error(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to read token count: {e}")))?;
        Ok(Some(bytes))
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
