use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ApiFormat, Message, Role, ToolChoice, ToolDefinition};

/// A decoded client request, independent of the wire format it arrived in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Opaque `response_format` object (OpenAI only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    /// Top-level system prompt / Responses `instructions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// End-user identifier (`user` / `metadata.user_id`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub source_api: ApiFormat,
    /// Original request body, used for pass-through to a same-format upstream
    #[serde(skip)]
    pub raw_request: Option<Bytes>,
}

impl CanonicalRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, source_api: ApiFormat) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            stream: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
            system_prompt: None,
            metadata: BTreeMap::new(),
            user: None,
            user_agent: None,
            source_api,
            raw_request: None,
        }
    }

    /// System prompt plus every system-role message, joined by newlines.
    #[must_use]
    pub fn combined_system(&self) -> Option<String> {
        let parts: Vec<String> = self
            .system_prompt
            .iter()
            .cloned()
            .chain(
                self.messages
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(|m| m.content.as_text()),
            )
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Whether the request carries enough input to send upstream.
    #[must_use]
    pub fn has_input(&self) -> bool {
        !self.messages.is_empty() || self.system_prompt.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_system_merges_prompt_and_messages() {
        let mut req = CanonicalRequest::new("m", ApiFormat::OpenAi);
        req.system_prompt = Some("be brief".into());
        req.messages.push(Message::text(Role::System, "answer in French"));
        req.messages.push(Message::text(Role::User, "hi"));

        assert_eq!(
            req.combined_system().as_deref(),
            Some("be brief\nanswer in French")
        );
    }

    #[test]
    fn test_has_input() {
        let mut req = CanonicalRequest::new("m", ApiFormat::Anthropic);
        assert!(!req.has_input());
        req.system_prompt = Some("only instructions".into());
        assert!(req.has_input());
    }
}
