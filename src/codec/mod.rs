//! Wire-format codecs.
//!
//! A codec translates one vendor dialect to and from the canonical model.
//! The client side ([`ClientCodec`]) decodes what a client sends and encodes
//! what it receives; the provider side ([`ProviderCodec`]) does the reverse
//! for upstream calls. OpenAI and Anthropic implement both; the Responses
//! frontdoor is client side only.

pub mod anthropic;
pub mod anthropic_types;
pub mod finish;
pub mod openai;
pub mod openai_types;
pub mod polymorphic;

use axum::http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;

use crate::canonical::{
    ApiFormat, CanonicalEvent, CanonicalRequest, CanonicalResponse, FinishReason, Usage,
};
use crate::error::Result;
use crate::stream::SseFrame;
use crate::taxonomy::ApiError;

pub use anthropic::AnthropicCodec;
pub use openai::OpenAiCodec;

/// Inbound side of a frontdoor: what clients send and expect back.
pub trait ClientCodec: Send + Sync {
    fn format(&self) -> ApiFormat;

    /// Decode a client request body. Rejects unsupported content rather than
    /// dropping it.
    fn decode_request(&self, body: &[u8]) -> Result<CanonicalRequest>;

    fn encode_response(&self, response: &CanonicalResponse) -> Result<Vec<u8>>;

    /// Fresh per-stream encoder.
    fn stream_encoder(&self, context: StreamContext) -> Box<dyn StreamEncoder>;

    fn encode_error(&self, error: &ApiError) -> (StatusCode, serde_json::Value) {
        error.encode_for(self.format())
    }
}

/// Outbound side: talking to a vendor in its own dialect.
pub trait ProviderCodec: Send + Sync {
    fn encode_request(&self, request: &CanonicalRequest) -> Result<Vec<u8>>;

    fn decode_response(&self, body: &[u8]) -> Result<CanonicalResponse>;

    /// Fresh per-stream decoder.
    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;

    /// Classify a vendor error body. Never fails.
    fn decode_error(&self, status: u16, body: &[u8]) -> ApiError;
}

/// A codec for a vendor the gateway can both front and call.
pub trait Codec: ClientCodec + ProviderCodec {}

impl<T: ClientCodec + ProviderCodec> Codec for T {}

/// Identity of the stream being encoded.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub id: String,
    /// Model name advertised to the client
    pub model: String,
    /// Unix seconds
    pub created: i64,
}

impl StreamContext {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
        }
    }
}

/// Result of decoding one upstream SSE payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedChunk {
    /// Zero or more canonical events; control frames decode to none
    Events(Vec<CanonicalEvent>),
    /// The vendor's terminal marker
    Done,
}

impl DecodedChunk {
    pub fn none() -> Self {
        Self::Events(Vec::new())
    }

    pub fn one(event: CanonicalEvent) -> Self {
        Self::Events(vec![event])
    }
}

pub trait StreamDecoder: Send {
    /// Decode a `data:` payload, with the `event:` name when the vendor uses one.
    fn decode_stream_chunk(&mut self, event: Option<&str>, data: &str) -> Result<DecodedChunk>;
}

/// What the stream translator asks an encoder to write.
#[derive(Debug, Clone, Copy)]
pub enum OutboundChunk<'a> {
    Start { usage: Option<Usage> },
    ContentDelta(&'a str),
    ToolCallStart { index: u32, id: &'a str, name: &'a str },
    ToolCallDelta { index: u32, fragment: &'a str },
    ToolCallDone { index: u32 },
    /// Terminal marker for a completed stream
    Finish {
        reason: Option<FinishReason>,
        usage: Option<Usage>,
    },
    /// Terminal marker for a failed stream; formats without one write nothing
    Failed(&'a ApiError),
}

pub trait StreamEncoder: Send {
    fn encode_stream_chunk(&mut self, chunk: OutboundChunk<'_>) -> Result<Vec<SseFrame>>;
}

/// Codec lookup, built once at startup and shared by handle.
#[derive(Clone)]
pub struct CodecRegistry {
    clients: HashMap<ApiFormat, Arc<dyn ClientCodec>>,
    providers: HashMap<ApiFormat, Arc<dyn ProviderCodec>>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
            providers: HashMap::new(),
        }
    }

    /// OpenAI, Anthropic and the Responses frontdoor.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_codec(ApiFormat::OpenAi, Arc::new(OpenAiCodec::new()));
        registry.register_codec(ApiFormat::Anthropic, Arc::new(AnthropicCodec::new()));
        registry.register_client(
            ApiFormat::Responses,
            Arc::new(crate::responses::ResponsesCodec::new()),
        );
        registry
    }

    pub fn register_client(&mut self, format: ApiFormat, codec: Arc<dyn ClientCodec>) {
        self.clients.insert(format, codec);
    }

    pub fn register_provider(&mut self, format: ApiFormat, codec: Arc<dyn ProviderCodec>) {
        self.providers.insert(format, codec);
    }

    pub fn register_codec<C: Codec + 'static>(&mut self, format: ApiFormat, codec: Arc<C>) {
        self.clients.insert(format, codec.clone());
        self.providers.insert(format, codec);
    }

    pub fn client(&self, format: ApiFormat) -> Option<Arc<dyn ClientCodec>> {
        self.clients.get(&format).cloned()
    }

    pub fn provider(&self, format: ApiFormat) -> Option<Arc<dyn ProviderCodec>> {
        self.providers.get(&format).cloned()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("clients", &self.clients.keys().collect::<Vec<_>>())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parse a JSON-encoded arguments string into an object, failing loudly on
/// malformed JSON. Empty input means "no arguments".
pub(crate) fn parse_arguments(arguments: &str) -> Result<serde_json::Value> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments).map_err(|e| {
        crate::error::GatewayError::decode(format!("tool call arguments are not valid JSON: {e}"))
    })
}

/// [`parse_arguments`] for arguments produced upstream. Bad JSON here is a
/// failure to encode the client's reply, not a client error.
pub(crate) fn parse_upstream_arguments(arguments: &str) -> Result<serde_json::Value> {
    parse_arguments(arguments).map_err(|err| match err {
        crate::error::GatewayError::Decode { message } => {
            crate::error::GatewayError::encode(message)
        }
        other => other,
    })
}

/// Prefix a decode error with the offending message position.
pub(crate) fn at_message(
    index: usize,
    err: crate::error::GatewayError,
) -> crate::error::GatewayError {
    match err {
        crate::error::GatewayError::Decode { message } => {
            crate::error::GatewayError::decode(format!("messages[{index}]: {message}"))
        }
        other => other,
    }
}

/// Text and error flag of a tool-role message. Errored results keep a
/// `ToolResult` part so the flag survives; plain results are flat text.
pub(crate) fn tool_output(content: &crate::canonical::Content) -> (String, bool) {
    use crate::canonical::{Content, ContentPart};

    match content {
        Content::Text(text) => (text.clone(), false),
        Content::Parts(parts) => {
            let mut text = String::new();
            let mut is_error = false;
            for part in parts {
                match part {
                    ContentPart::Text { text: t } => text.push_str(t),
                    ContentPart::ToolResult {
                        content,
                        is_error: err,
                        ..
                    } => {
                        text.push_str(content);
                        is_error |= *err;
                    }
                    _ => {}
                }
            }
            (text, is_error)
        }
    }
}

/// Split a `data:<media>;base64,<payload>` URI.
pub(crate) fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    Some((media_type.to_string(), data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri() {
        assert_eq!(
            parse_data_uri("data:image/png;base64,AAAA"),
            Some(("image/png".to_string(), "AAAA".to_string()))
        );
        assert_eq!(parse_data_uri("https://example.com/cat.png"), None);
    }

    #[test]
    fn test_registry_defaults() {
        let registry = CodecRegistry::with_defaults();
        assert!(registry.client(ApiFormat::OpenAi).is_some());
        assert!(registry.client(ApiFormat::Anthropic).is_some());
        assert!(registry.client(ApiFormat::Responses).is_some());
        assert!(registry.provider(ApiFormat::Anthropic).is_some());
        assert!(registry.provider(ApiFormat::Responses).is_none());
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), serde_json::json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap(), serde_json::json!({"a": 1}));
        assert!(parse_arguments(r#"{"a":"#).is_err());
    }
}
