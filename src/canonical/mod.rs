//! Vendor-neutral request/response/event representation.
//!
//! Every wire format decodes into these types and encodes out of them. Nothing
//! in here knows about a particular vendor's JSON shape.

pub mod event;
pub mod message;
pub mod request;
pub mod response;
pub mod tool;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use event::{CanonicalEvent, FunctionChunk, StreamError, ToolCallChunk};
pub use message::{Content, ContentPart, FunctionCall, Message, Role, ToolCall};
pub use request::CanonicalRequest;
pub use response::{CanonicalResponse, Choice, FinishReason, RateLimitInfo, Usage};
pub use tool::{FunctionDef, ToolChoice, ToolDefinition};

/// The wire dialects the gateway speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    /// OpenAI Chat Completions (`/v1/chat/completions`)
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages (`/v1/messages`)
    Anthropic,
    /// OpenAI Responses (`/v1/responses`), client side only
    Responses,
}

impl ApiFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Responses => "responses",
        }
    }

    /// Parse a configured format name. Unknown names yield `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" | "chat" | "chat_completions" => Some(Self::OpenAi),
            "anthropic" | "messages" => Some(Self::Anthropic),
            "responses" => Some(Self::Responses),
            _ => None,
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(ApiFormat::from_name("OpenAI"), Some(ApiFormat::OpenAi));
        assert_eq!(ApiFormat::from_name("anthropic"), Some(ApiFormat::Anthropic));
        assert_eq!(ApiFormat::from_name("gemini"), None);
        assert_eq!(
            serde_json::to_string(&ApiFormat::OpenAi).unwrap(),
            "\"openai\""
        );
    }
}
