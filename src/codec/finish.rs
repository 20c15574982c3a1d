//! Bidirectional finish-reason table.
//!
//! | canonical / OpenAI | Anthropic                 |
//! |--------------------|---------------------------|
//! | `stop`             | `end_turn`, `stop_sequence` |
//! | `length`           | `max_tokens`              |
//! | `tool_calls`       | `tool_use`                |
//! | `content_filter`   | `end_turn` (lossy)        |
//!
//! Both directions are total: unknown vendor values resolve to `stop`.

use crate::canonical::FinishReason;

/// Parse an OpenAI `finish_reason`.
pub fn from_openai(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Parse an Anthropic `stop_reason`.
pub fn from_anthropic(reason: &str) -> FinishReason {
    match reason {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Render as an Anthropic `stop_reason`.
pub fn to_anthropic(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ContentFilter => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
    }
}

/// OpenAI `finish_reason` -> Anthropic `stop_reason`
pub fn map_openai_finish_reason(reason: &str) -> &'static str {
    to_anthropic(from_openai(reason))
}

/// Anthropic `stop_reason` -> OpenAI `finish_reason`
pub fn map_anthropic_stop_reason(reason: &str) -> &'static str {
    from_anthropic(reason).as_str()
}
