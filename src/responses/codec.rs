//! Responses API frontdoor codec.
//!
//! Clients only: the gateway never calls a vendor in this dialect.
//! `instructions` becomes the system prompt and `input` items become
//! canonical messages. Function calls replayed as history attach to the
//! preceding assistant turn.

use bytes::Bytes;
use std::collections::BTreeMap;

use super::accumulator::ResponsesAccumulator;
use super::types::{
    InputItem, InputPart, OutputContent, OutputItem, ResponseObject, ResponsesRequest,
    ResponsesTool, ResponsesUsage,
};
use crate::canonical::{
    ApiFormat, CanonicalRequest, CanonicalResponse, Content, ContentPart, FinishReason, Message,
    Role, ToolCall, ToolChoice, ToolDefinition, Usage,
};
use crate::codec::polymorphic::TextOrParts;
use crate::codec::{ClientCodec, StreamContext, StreamEncoder};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsesCodec;

impl ResponsesCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Conversation threading options, read alongside the canonical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOptions {
    pub previous_response_id: Option<String>,
    pub store: bool,
}

impl ThreadOptions {
    /// Read threading fields from a raw request body. Bodies that fail to
    /// parse get the defaults; `decode_request` reports the real error.
    pub fn from_body(body: &[u8]) -> Self {
        #[derive(serde::Deserialize)]
        struct Fields {
            previous_response_id: Option<String>,
            store: Option<bool>,
        }

        match serde_json::from_slice::<Fields>(body) {
            Ok(fields) => Self {
                previous_response_id: fields.previous_response_id,
                store: fields.store.unwrap_or(true),
            },
            Err(_) => Self {
                previous_response_id: None,
                store: true,
            },
        }
    }
}

impl ClientCodec for ResponsesCodec {
    fn format(&self) -> ApiFormat {
        ApiFormat::Responses
    }

    fn decode_request(&self, body: &[u8]) -> Result<CanonicalRequest> {
        let mut value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::decode(format!("invalid responses request: {e}")))?;
        tag_bare_messages(&mut value);
        let req: ResponsesRequest = serde_json::from_value(value)
            .map_err(|e| GatewayError::decode(format!("invalid responses request: {e}")))?;

        let mut canonical = CanonicalRequest::new(req.model, ApiFormat::Responses);
        canonical.system_prompt = req.instructions.filter(|s| !s.is_empty());
        canonical.messages = match req.input {
            None => Vec::new(),
            Some(TextOrParts::Text(text)) => vec![Message::text(Role::User, text)],
            Some(TextOrParts::Parts(items)) => decode_items(items)?,
        };
        canonical.stream = req.stream.unwrap_or(false);
        canonical.max_tokens = req.max_output_tokens;
        canonical.temperature = req.temperature;
        canonical.top_p = req.top_p;
        canonical.tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(decode_tool)
            .collect::<Result<_>>()?;
        canonical.tool_choice = req.tool_choice.map(decode_tool_choice).transpose()?;
        canonical.response_format = req
            .text
            .and_then(|text| text.get("format").cloned())
            .filter(|format| !format.is_null());
        canonical.metadata = decode_metadata(req.metadata)?;
        canonical.user = req.user;
        canonical.raw_request = Some(Bytes::copy_from_slice(body));

        if !canonical.has_input() {
            return Err(GatewayError::decode("input must not be empty"));
        }
        Ok(canonical)
    }

    fn encode_response(&self, response: &CanonicalResponse) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&response_object(response, None))?)
    }

    fn stream_encoder(&self, context: StreamContext) -> Box<dyn StreamEncoder> {
        Box::new(ResponsesAccumulator::new(context))
    }
}

/// Items that carry a `role` but no `type` are messages.
fn tag_bare_messages(value: &mut serde_json::Value) {
    let Some(items) = value.get_mut("input").and_then(|i| i.as_array_mut()) else {
        return;
    };
    for item in items.iter_mut().filter_map(|i| i.as_object_mut()) {
        if !item.contains_key("type") && item.contains_key("role") {
            item.insert("type".to_string(), serde_json::Value::from("message"));
        }
    }
}

fn decode_items(items: Vec<InputItem>) -> Result<Vec<Message>> {
    let mut messages: Vec<Message> = Vec::with_capacity(items.len());

    for (i, item) in items.into_iter().enumerate() {
        let at = |e: GatewayError| match e {
            GatewayError::Decode { message } => {
                GatewayError::decode(format!("input[{i}]: {message}"))
            }
            other => other,
        };

        match item {
            InputItem::Message { role, content } => {
                let role = Role::parse(&role)
                    .filter(|r| *r != Role::Tool)
                    .ok_or_else(|| at(GatewayError::decode(format!("unsupported role '{role}'"))))?;
                let content = decode_content(content).map_err(at)?;
                messages.push(Message {
                    role,
                    content,
                    name: None,
                    tool_call_id: None,
                    tool_calls: Vec::new(),
                });
            }
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                let call = ToolCall::function(call_id, name, arguments);
                match messages.last_mut() {
                    Some(last) if last.role == Role::Assistant => last.tool_calls.push(call),
                    _ => {
                        let mut msg = Message::text(Role::Assistant, "");
                        msg.tool_calls.push(call);
                        messages.push(msg);
                    }
                }
            }
            InputItem::FunctionCallOutput { call_id, output } => {
                messages.push(Message::tool_result(call_id, output));
            }
        }
    }
    Ok(messages)
}

fn decode_content(content: TextOrParts<InputPart>) -> Result<Content> {
    match content {
        TextOrParts::Text(text) => Ok(Content::Text(text)),
        TextOrParts::Parts(parts) => parts
            .into_iter()
            .map(|part| match part {
                InputPart::InputText { text } | InputPart::OutputText { text } => {
                    Ok(ContentPart::Text { text })
                }
                InputPart::InputImage { image_url, detail } => image_url
                    .map(|url| ContentPart::ImageUrl { url, detail })
                    .ok_or_else(|| GatewayError::decode("input_image requires image_url")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Content::from_parts),
    }
}

fn decode_tool(tool: ResponsesTool) -> Result<ToolDefinition> {
    if tool.tool_type != "function" {
        return Err(GatewayError::decode(format!(
            "unsupported tool type '{}'",
            tool.tool_type
        )));
    }
    let name = tool
        .name
        .ok_or_else(|| GatewayError::decode("function tools require a name"))?;
    Ok(ToolDefinition::function(
        name,
        tool.description,
        tool.parameters
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
    ))
}

fn decode_tool_choice(choice: serde_json::Value) -> Result<ToolChoice> {
    match choice {
        serde_json::Value::String(mode) => match mode.as_str() {
            "auto" => Ok(ToolChoice::Auto),
            "none" => Ok(ToolChoice::None),
            "required" => Ok(ToolChoice::Required),
            other => Err(GatewayError::decode(format!(
                "unsupported tool_choice '{other}'"
            ))),
        },
        serde_json::Value::Object(ref obj) => {
            match (
                obj.get("type").and_then(|t| t.as_str()),
                obj.get("name").and_then(|n| n.as_str()),
            ) {
                (Some("function"), Some(name)) => Ok(ToolChoice::Function(name.to_string())),
                _ => Err(GatewayError::decode(format!(
                    "unsupported tool_choice {choice}"
                ))),
            }
        }
        other => Err(GatewayError::decode(format!(
            "unsupported tool_choice {other}"
        ))),
    }
}

fn decode_metadata(
    metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
) -> Result<BTreeMap<String, String>> {
    metadata
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            other => Err(GatewayError::decode(format!(
                "metadata value for '{key}' must be a string, got {other}"
            ))),
        })
        .collect()
}

/// Normalize a vendor or canonical finish reason into the Chat Completions
/// vocabulary. A missing reason means the model stopped on its own.
pub fn normalize_finish_reason(reason: Option<&str>) -> String {
    match reason {
        None | Some("") => "stop".to_string(),
        Some("tool_use" | "tool_calls" | "function_call") => "tool_calls".to_string(),
        Some("end_turn" | "stop_sequence" | "stop") => "stop".to_string(),
        Some("max_tokens" | "length") => "length".to_string(),
        Some("refusal" | "content_filter") => "content_filter".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Stored status of a finished response. A turn that ends in tool calls is
/// waiting on the client and counts as incomplete.
pub fn storage_status(finish_reason: &str) -> &'static str {
    if finish_reason == "tool_calls" {
        "incomplete"
    } else {
        "completed"
    }
}

/// Render a complete canonical response as a Responses API object.
pub fn response_object(
    response: &CanonicalResponse,
    previous_response_id: Option<&str>,
) -> ResponseObject {
    let finish = normalize_finish_reason(response.finish_reason().map(FinishReason::as_str));
    let text = response.text();

    let mut output = Vec::new();
    if !text.is_empty() {
        output.push(OutputItem::Message {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            status: "completed".to_string(),
            role: "assistant".to_string(),
            content: vec![OutputContent::OutputText {
                text,
                annotations: Vec::new(),
            }],
        });
    }
    output.extend(response.tool_calls().iter().map(|tc| OutputItem::FunctionCall {
        id: format!("fc_{}", uuid::Uuid::new_v4().simple()),
        call_id: tc.id.clone(),
        name: tc.function.name.clone(),
        arguments: tc.function.arguments.clone(),
        status: "completed".to_string(),
    }));

    ResponseObject {
        id: response.id.clone(),
        object: "response".to_string(),
        created_at: chrono::Utc::now().timestamp(),
        model: response.model.clone(),
        status: storage_status(&finish).to_string(),
        output,
        usage: response.usage.map(encode_usage),
        finish_reason: Some(finish),
        previous_response_id: previous_response_id.map(String::from),
        error: None,
    }
}

pub(crate) fn encode_usage(usage: Usage) -> ResponsesUsage {
    ResponsesUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}
