use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{ApiFormat, Message, ToolCall};

/// A complete (non-streamed or fully accumulated) model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub id: String,
    /// Model name served to the client
    pub model: String,
    /// Model name the vendor actually ran, before any rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_model: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
    pub source_api: ApiFormat,
    /// Unmodified upstream body, forwarded verbatim when formats match
    #[serde(skip)]
    pub raw_response: Option<Bytes>,
}

impl CanonicalResponse {
    #[must_use]
    pub fn first_message(&self) -> Option<&Message> {
        self.choices.first().map(|c| &c.message)
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }

    /// Text of the first choice, empty when there is none.
    #[must_use]
    pub fn text(&self) -> String {
        self.first_message()
            .map(|m| m.content.as_text())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.first_message().map_or(&[], |m| m.tool_calls.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Why generation stopped, in the canonical (OpenAI) vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Usage computed by the gateway itself; total is always the sum.
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Overlay non-zero counters from `other`, recomputing the total.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let prompt = if other.prompt_tokens > 0 {
            other.prompt_tokens
        } else {
            self.prompt_tokens
        };
        let completion = if other.completion_tokens > 0 {
            other.completion_tokens
        } else {
            self.completion_tokens
        };
        Self::new(prompt, completion)
    }
}

/// Vendor rate-limit state, normalized across header naming schemes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_requests: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_requests: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_requests: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_tokens: Option<String>,
}

impl RateLimitInfo {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
