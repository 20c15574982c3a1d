use serde::{Deserialize, Serialize};

use super::{FinishReason, Role, Usage};
use crate::taxonomy::ApiError;

/// One streamed increment from a provider.
///
/// Produced once per upstream chunk, consumed exactly once by the stream
/// translator, never persisted directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallChunk>,
    /// Present only on usage-bearing chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StreamError>,
}

impl CanonicalEvent {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content_delta: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tool_call(chunk: ToolCallChunk) -> Self {
        Self {
            tool_call: Some(chunk),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(error: StreamError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// True when the event carries nothing the translator acts on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A partial tool call.
///
/// The first chunk for an index carries `id` and `function.name`; later
/// chunks carry argument fragments. `done` marks the end of that call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: FunctionChunk,
    #[serde(default)]
    pub done: bool,
}

impl ToolCallChunk {
    #[must_use]
    pub fn start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            call_type: Some("function".to_string()),
            function: FunctionChunk {
                name: Some(name.into()),
                arguments: None,
            },
            done: false,
        }
    }

    #[must_use]
    pub fn arguments(index: u32, fragment: impl Into<String>) -> Self {
        Self {
            index,
            function: FunctionChunk {
                name: None,
                arguments: Some(fragment.into()),
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn done(index: u32) -> Self {
        Self {
            index,
            done: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raw JSON fragment, not necessarily valid on its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Terminal failure carried by a stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamError {
    /// Client went away or the request deadline passed
    Cancelled,
    /// Upstream failed; already classified
    Upstream { error: ApiError },
}
