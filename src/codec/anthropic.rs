//! Anthropic Messages codec.
//!
//! Anthropic keeps the system prompt outside `messages`, carries tool calls and
//! tool results as content blocks, and wants strictly alternating roles. A
//! single Anthropic message can therefore expand into several canonical ones
//! (a user turn with `tool_result` blocks becomes separate tool messages) and
//! consecutive canonical messages can collapse into one Anthropic turn.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

use super::anthropic_types::{
    ContentBlock, Delta, DeltaUsage, ImageSource, Message as WireMessage, MessageContent,
    MessageDeltaBody, MessagesRequest, MessagesResponse, Metadata, ResponseContentBlock,
    Role as WireRole, StreamEvent, SystemBlock, Tool, ToolChoice as WireToolChoice,
    ToolResultContent, Usage as WireUsage,
};
use super::polymorphic::TextOrParts;
use super::{
    at_message, finish, parse_arguments, parse_data_uri, parse_upstream_arguments, tool_output,
    ClientCodec, DecodedChunk, OutboundChunk, ProviderCodec, StreamContext, StreamDecoder,
    StreamEncoder,
};
use crate::canonical::{
    ApiFormat, CanonicalEvent, CanonicalRequest, CanonicalResponse, Choice, Content, ContentPart,
    FinishReason, Message, Role, StreamError, ToolCall, ToolCallChunk, ToolChoice, ToolDefinition,
    Usage,
};
use crate::error::{GatewayError, Result};
use crate::stream::SseFrame;
use crate::taxonomy::ApiError;

/// `max_tokens` is mandatory on the wire.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicCodec;

impl AnthropicCodec {
    pub fn new() -> Self {
        Self
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

impl ClientCodec for AnthropicCodec {
    fn format(&self) -> ApiFormat {
        ApiFormat::Anthropic
    }

    fn decode_request(&self, body: &[u8]) -> Result<CanonicalRequest> {
        let req: MessagesRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::decode(format!("invalid messages request: {e}")))?;

        let mut canonical = CanonicalRequest::new(req.model, ApiFormat::Anthropic);
        canonical.system_prompt = req.system.map(|system| match system {
            TextOrParts::Text(text) => text,
            TextOrParts::Parts(blocks) => blocks
                .into_iter()
                .map(|SystemBlock::Text { text }| text)
                .collect::<Vec<_>>()
                .join("\n"),
        });

        for (i, msg) in req.messages.into_iter().enumerate() {
            let mut decoded = decode_message(msg).map_err(|e| at_message(i, e))?;
            canonical.messages.append(&mut decoded);
        }

        canonical.stream = req.stream.unwrap_or(false);
        canonical.max_tokens = req.max_tokens;
        canonical.temperature = req.temperature;
        canonical.top_p = req.top_p;
        canonical.stop = req.stop_sequences.unwrap_or_default();
        canonical.tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| ToolDefinition::function(t.name, t.description, t.input_schema))
            .collect();
        canonical.tool_choice = req.tool_choice.map(|choice| match choice {
            WireToolChoice::Auto => ToolChoice::Auto,
            WireToolChoice::Any => ToolChoice::Required,
            WireToolChoice::None => ToolChoice::None,
            WireToolChoice::Tool { name } => ToolChoice::Function(name),
        });

        if let Some(metadata) = req.metadata {
            canonical.user = metadata.user_id;
            for (key, value) in metadata.extra {
                match value {
                    serde_json::Value::String(s) => {
                        canonical.metadata.insert(key, s);
                    }
                    other => {
                        return Err(GatewayError::decode(format!(
                            "metadata value for '{key}' must be a string, got {other}"
                        )))
                    }
                }
            }
        }
        canonical.raw_request = Some(Bytes::copy_from_slice(body));

        if !canonical.has_input() {
            return Err(GatewayError::decode("messages must not be empty"));
        }
        Ok(canonical)
    }

    fn encode_response(&self, response: &CanonicalResponse) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        let text = response.text();
        if !text.is_empty() {
            content.push(ResponseContentBlock::Text { text });
        }
        for tc in response.tool_calls() {
            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: parse_upstream_arguments(&tc.function.arguments)?,
            });
        }
        if content.is_empty() {
            content.push(ResponseContentBlock::Text {
                text: String::new(),
            });
        }

        let usage = response.usage.unwrap_or_default();
        let body = MessagesResponse {
            id: message_id(&response.id),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: response.model.clone(),
            stop_reason: Some(
                finish::to_anthropic(response.finish_reason().unwrap_or(FinishReason::Stop))
                    .to_string(),
            ),
            stop_sequence: None,
            usage: WireUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        };
        Ok(serde_json::to_vec(&body)?)
    }

    fn stream_encoder(&self, context: StreamContext) -> Box<dyn StreamEncoder> {
        Box::new(AnthropicStreamEncoder::new(context))
    }
}

/// Anthropic ids look like `msg_...`.
fn message_id(id: &str) -> String {
    if id.starts_with("msg_") {
        id.to_string()
    } else {
        format!("msg_{}", id.trim_start_matches("chatcmpl-"))
    }
}

fn decode_message(msg: WireMessage) -> Result<Vec<Message>> {
    let blocks = match msg.content {
        TextOrParts::Text(text) => vec![ContentBlock::Text { text }],
        TextOrParts::Parts(blocks) => blocks,
    };
    match msg.role {
        WireRole::User => decode_user_blocks(blocks),
        WireRole::Assistant => decode_assistant_blocks(blocks).map(|m| vec![m]),
    }
}

fn decode_user_blocks(blocks: Vec<ContentBlock>) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    let mut parts: Vec<ContentPart> = Vec::new();

    let flush = |parts: &mut Vec<ContentPart>, messages: &mut Vec<Message>| {
        if !parts.is_empty() {
            let mut msg = Message::text(Role::User, "");
            msg.content = Content::from_parts(std::mem::take(parts));
            messages.push(msg);
        }
    };

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
            ContentBlock::Image { source } => parts.push(decode_image(source)?),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                flush(&mut parts, &mut messages);
                let text = tool_result_text(content)?;
                let mut msg = Message::tool_result(tool_use_id.clone(), text.clone());
                if is_error == Some(true) {
                    msg.content = Content::Parts(vec![ContentPart::ToolResult {
                        tool_use_id,
                        content: text,
                        is_error: true,
                    }]);
                }
                messages.push(msg);
            }
            ContentBlock::ToolUse { .. } => {
                return Err(GatewayError::decode(
                    "tool_use blocks are only valid in assistant messages",
                ))
            }
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
        }
    }
    flush(&mut parts, &mut messages);

    if messages.is_empty() {
        messages.push(Message::text(Role::User, ""));
    }
    Ok(messages)
}

fn decode_assistant_blocks(blocks: Vec<ContentBlock>) -> Result<Message> {
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::function(id, name, serde_json::to_string(&input)?));
            }
            ContentBlock::Image { .. } => {
                return Err(GatewayError::decode(
                    "image blocks are not supported in assistant messages",
                ))
            }
            ContentBlock::ToolResult { .. } => {
                return Err(GatewayError::decode(
                    "tool_result blocks are only valid in user messages",
                ))
            }
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
        }
    }

    let mut msg = Message::text(Role::Assistant, "");
    msg.content = Content::from_parts(parts);
    msg.tool_calls = tool_calls;
    Ok(msg)
}

fn decode_image(source: ImageSource) -> Result<ContentPart> {
    match source.source_type.as_str() {
        "base64" => match (source.media_type, source.data) {
            (Some(media_type), Some(data)) => Ok(ContentPart::Image { media_type, data }),
            _ => Err(GatewayError::decode(
                "base64 image source requires media_type and data",
            )),
        },
        "url" => source
            .url
            .map(|url| ContentPart::ImageUrl { url, detail: None })
            .ok_or_else(|| GatewayError::decode("url image source requires url")),
        other => Err(GatewayError::decode(format!(
            "unsupported image source type '{other}'"
        ))),
    }
}

fn tool_result_text(content: Option<ToolResultContent>) -> Result<String> {
    match content {
        None => Ok(String::new()),
        Some(TextOrParts::Text(text)) => Ok(text),
        Some(TextOrParts::Parts(blocks)) => blocks
            .into_iter()
            .map(|b| match b {
                ContentBlock::Text { text } => Ok(text),
                _ => Err(GatewayError::decode(
                    "tool_result content supports text blocks only",
                )),
            })
            .collect::<Result<Vec<_>>>()
            .map(|texts| texts.join("\n")),
    }
}

// ---------------------------------------------------------------------------
// Provider side
// ---------------------------------------------------------------------------

impl ProviderCodec for AnthropicCodec {
    fn encode_request(&self, request: &CanonicalRequest) -> Result<Vec<u8>> {
        let mut messages: Vec<(WireRole, Vec<ContentBlock>)> = Vec::new();
        for msg in &request.messages {
            let (role, mut blocks) = match msg.role {
                Role::System => continue,
                Role::User => (WireRole::User, encode_user_content(&msg.content)?),
                Role::Tool => (WireRole::User, vec![encode_tool_result(msg)?]),
                Role::Assistant => (WireRole::Assistant, encode_assistant(msg)?),
            };
            if blocks.is_empty() {
                continue;
            }
            // Anthropic requires alternating roles
            match messages.last_mut() {
                Some((last_role, last_blocks)) if *last_role == role => {
                    last_blocks.append(&mut blocks);
                }
                _ => messages.push((role, blocks)),
            }
        }

        let messages = messages
            .into_iter()
            .map(|(role, blocks)| WireMessage {
                role,
                content: collapse_blocks(blocks),
            })
            .collect();

        // Anthropic has no "none" choice; suppress tools entirely instead
        let suppress_tools = request.tool_choice == Some(ToolChoice::None);
        let tools = (!suppress_tools && !request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|t| Tool {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    input_schema: t.function.parameters.clone(),
                })
                .collect()
        });
        let tool_choice = match request.tool_choice {
            _ if suppress_tools => None,
            Some(ToolChoice::Auto) => Some(WireToolChoice::Auto),
            Some(ToolChoice::Required) => Some(WireToolChoice::Any),
            Some(ToolChoice::Function(ref name)) => {
                Some(WireToolChoice::Tool { name: name.clone() })
            }
            Some(ToolChoice::None) | None => None,
        };

        if request.response_format.is_some() {
            tracing::debug!("response_format has no Anthropic equivalent, dropping");
        }

        let body = MessagesRequest {
            model: request.model.clone(),
            max_tokens: Some(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            messages,
            system: request.combined_system().map(TextOrParts::Text),
            stream: request.stream.then_some(true),
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: None,
            tools,
            tool_choice,
            metadata: request.user.clone().map(|user_id| Metadata {
                user_id: Some(user_id),
                extra: HashMap::new(),
            }),
            stop_sequences: (!request.stop.is_empty()).then(|| request.stop.clone()),
        };
        Ok(serde_json::to_vec(&body)?)
    }

    fn decode_response(&self, body: &[u8]) -> Result<CanonicalResponse> {
        let resp: MessagesResponse = serde_json::from_slice(body)
            .map_err(|e| GatewayError::provider(format!("invalid messages response: {e}")))?;

        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::function(id, name, serde_json::to_string(&input)?));
                }
                ResponseContentBlock::Thinking { .. }
                | ResponseContentBlock::RedactedThinking { .. } => {}
            }
        }

        let mut message = Message::text(Role::Assistant, "");
        message.content = Content::from_parts(parts);
        message.tool_calls = tool_calls;

        Ok(CanonicalResponse {
            id: resp.id,
            model: resp.model.clone(),
            provider_model: Some(resp.model),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: resp.stop_reason.as_deref().map(finish::from_anthropic),
            }],
            usage: Some(Usage::new(resp.usage.input_tokens, resp.usage.output_tokens)),
            rate_limit: None,
            source_api: ApiFormat::Anthropic,
            raw_response: Some(Bytes::copy_from_slice(body)),
        })
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(AnthropicStreamDecoder::default())
    }

    fn decode_error(&self, status: u16, body: &[u8]) -> ApiError {
        ApiError::from_anthropic(Some(status), body)
    }
}

fn encode_user_content(content: &Content) -> Result<Vec<ContentBlock>> {
    match content {
        Content::Text(text) if text.is_empty() => Ok(Vec::new()),
        Content::Text(text) => Ok(vec![ContentBlock::Text { text: text.clone() }]),
        Content::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Ok(ContentBlock::Text { text: text.clone() }),
                ContentPart::Image { media_type, data } => Ok(ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".to_string(),
                        media_type: Some(media_type.clone()),
                        data: Some(data.clone()),
                        url: None,
                    },
                }),
                ContentPart::ImageUrl { url, .. } => Ok(ContentBlock::Image {
                    source: match parse_data_uri(url) {
                        Some((media_type, data)) => ImageSource {
                            source_type: "base64".to_string(),
                            media_type: Some(media_type),
                            data: Some(data),
                            url: None,
                        },
                        None => ImageSource {
                            source_type: "url".to_string(),
                            media_type: None,
                            data: None,
                            url: Some(url.clone()),
                        },
                    },
                }),
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Ok(ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: Some(TextOrParts::Text(content.clone())),
                    is_error: is_error.then_some(true),
                }),
                ContentPart::ToolUse { .. } => Err(GatewayError::decode(
                    "tool_use parts are only valid in assistant messages",
                )),
            })
            .collect(),
    }
}

fn encode_tool_result(msg: &Message) -> Result<ContentBlock> {
    let tool_use_id = msg
        .tool_call_id
        .clone()
        .ok_or_else(|| GatewayError::decode("tool messages require tool_call_id"))?;
    let (text, is_error) = tool_output(&msg.content);
    Ok(ContentBlock::ToolResult {
        tool_use_id,
        content: Some(TextOrParts::Text(text)),
        is_error: is_error.then_some(true),
    })
}

fn encode_assistant(msg: &Message) -> Result<Vec<ContentBlock>> {
    let mut blocks = Vec::new();
    match &msg.content {
        Content::Text(text) if text.is_empty() => {}
        Content::Text(text) => blocks.push(ContentBlock::Text { text: text.clone() }),
        Content::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                    ContentPart::ToolUse {
                        id,
                        name,
                        arguments,
                    } => blocks.push(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: parse_arguments(arguments)?,
                    }),
                    _ => {
                        return Err(GatewayError::decode(
                            "assistant messages support text and tool calls only",
                        ))
                    }
                }
            }
        }
    }
    for tc in &msg.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            input: parse_arguments(&tc.function.arguments)?,
        });
    }
    Ok(blocks)
}

/// A lone text block goes out as plain string content.
fn collapse_blocks(mut blocks: Vec<ContentBlock>) -> MessageContent {
    if blocks.len() == 1 {
        if let ContentBlock::Text { .. } = blocks[0] {
            if let Some(ContentBlock::Text { text }) = blocks.pop() {
                return TextOrParts::Text(text);
            }
        }
    }
    TextOrParts::Parts(blocks)
}

// ---------------------------------------------------------------------------
// Streaming: decode
// ---------------------------------------------------------------------------

const KNOWN_EVENTS: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
    "ping",
    "error",
];

/// A `tool_use` block being streamed.
#[derive(Debug)]
struct OpenToolBlock {
    tool_index: u32,
    arguments: String,
}

/// Decodes Anthropic's named stream events.
///
/// Stateful: content-block indexes are mapped onto a dense tool-call index,
/// and argument fragments are buffered so the complete JSON can be validated
/// when the block stops.
#[derive(Debug, Default)]
pub struct AnthropicStreamDecoder {
    tool_blocks: HashMap<usize, OpenToolBlock>,
    next_tool_index: u32,
    usage: Usage,
}

impl StreamDecoder for AnthropicStreamDecoder {
    fn decode_stream_chunk(&mut self, event: Option<&str>, data: &str) -> Result<DecodedChunk> {
        if data.trim().is_empty() {
            return Ok(DecodedChunk::none());
        }
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| GatewayError::decode(format!("invalid stream event: {e}")))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .or(event)
            .unwrap_or_default()
            .to_string();
        if !KNOWN_EVENTS.contains(&kind.as_str()) {
            tracing::debug!(event = %kind, "Ignoring unknown stream event");
            return Ok(DecodedChunk::none());
        }

        let parsed: StreamEvent = serde_json::from_value(value)
            .map_err(|e| GatewayError::decode(format!("invalid {kind} event: {e}")))?;

        let event = match parsed {
            StreamEvent::MessageStart { message } => {
                self.usage = Usage::new(message.usage.input_tokens, message.usage.output_tokens);
                CanonicalEvent {
                    role: Some(Role::Assistant),
                    model: Some(message.model.clone()),
                    provider_model: Some(message.model),
                    usage: Some(self.usage),
                    ..CanonicalEvent::default()
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ResponseContentBlock::ToolUse { id, name, input } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_blocks.insert(
                        index,
                        OpenToolBlock {
                            tool_index,
                            arguments: String::new(),
                        },
                    );
                    let mut events = vec![CanonicalEvent::tool_call(ToolCallChunk::start(
                        tool_index, id, name,
                    ))];
                    // input is normally `{}` and streamed via input_json_delta
                    if input.as_object().is_some_and(|o| !o.is_empty()) {
                        let fragment = serde_json::to_string(&input)?;
                        if let Some(block) = self.tool_blocks.get_mut(&index) {
                            block.arguments.push_str(&fragment);
                        }
                        events.push(CanonicalEvent::tool_call(ToolCallChunk::arguments(
                            tool_index, fragment,
                        )));
                    }
                    return Ok(DecodedChunk::Events(events));
                }
                ResponseContentBlock::Text { text } if !text.is_empty() => {
                    CanonicalEvent::content(text)
                }
                _ => return Ok(DecodedChunk::none()),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } if !text.is_empty() => CanonicalEvent::content(text),
                Delta::InputJsonDelta { partial_json } => {
                    let block = self.tool_blocks.get_mut(&index).ok_or_else(|| {
                        GatewayError::decode(format!(
                            "input_json_delta for unknown content block {index}"
                        ))
                    })?;
                    block.arguments.push_str(&partial_json);
                    CanonicalEvent::tool_call(ToolCallChunk::arguments(
                        block.tool_index,
                        partial_json,
                    ))
                }
                _ => return Ok(DecodedChunk::none()),
            },
            StreamEvent::ContentBlockStop { index } => {
                let Some(block) = self.tool_blocks.remove(&index) else {
                    return Ok(DecodedChunk::none());
                };
                if !block.arguments.trim().is_empty() {
                    serde_json::from_str::<serde_json::Value>(&block.arguments).map_err(|e| {
                        GatewayError::decode(format!(
                            "tool call arguments for block {index} are not valid JSON: {e}"
                        ))
                    })?;
                }
                CanonicalEvent::tool_call(ToolCallChunk::done(block.tool_index))
            }
            StreamEvent::MessageDelta { delta, usage } => {
                self.usage = self.usage.merge(Usage {
                    prompt_tokens: usage.input_tokens.unwrap_or(0),
                    completion_tokens: usage.output_tokens,
                    total_tokens: 0,
                });
                CanonicalEvent {
                    finish_reason: delta.stop_reason.as_deref().map(finish::from_anthropic),
                    usage: Some(self.usage),
                    ..CanonicalEvent::default()
                }
            }
            StreamEvent::MessageStop => return Ok(DecodedChunk::Done),
            StreamEvent::Ping => return Ok(DecodedChunk::none()),
            StreamEvent::Error { .. } => CanonicalEvent::failed(StreamError::Upstream {
                error: ApiError::from_anthropic(None, data.as_bytes()),
            }),
        };

        Ok(DecodedChunk::one(event))
    }
}

// ---------------------------------------------------------------------------
// Streaming: encode
// ---------------------------------------------------------------------------

/// Writes Anthropic stream events, tracking which content blocks are open.
#[derive(Debug)]
pub struct AnthropicStreamEncoder {
    context: StreamContext,
    next_block: usize,
    text_block: Option<usize>,
    /// tool-call index -> content-block index
    tool_blocks: BTreeMap<u32, usize>,
}

impl AnthropicStreamEncoder {
    pub fn new(context: StreamContext) -> Self {
        Self {
            context,
            next_block: 0,
            text_block: None,
            tool_blocks: BTreeMap::new(),
        }
    }

    fn open_block(&mut self) -> usize {
        let index = self.next_block;
        self.next_block += 1;
        index
    }

    fn close_text(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(index) = self.text_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn message_start(&self, usage: Option<Usage>) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: message_id(&self.context.id),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.context.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: WireUsage {
                    input_tokens: usage.map_or(0, |u| u.prompt_tokens),
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        }
    }
}

impl StreamEncoder for AnthropicStreamEncoder {
    fn encode_stream_chunk(&mut self, chunk: OutboundChunk<'_>) -> Result<Vec<SseFrame>> {
        let mut events = Vec::new();

        match chunk {
            OutboundChunk::Start { usage } => {
                events.push(self.message_start(usage));
                events.push(StreamEvent::Ping);
            }
            OutboundChunk::ContentDelta(text) => {
                let index = match self.text_block {
                    Some(index) => index,
                    None => {
                        let index = self.open_block();
                        events.push(StreamEvent::ContentBlockStart {
                            index,
                            content_block: ResponseContentBlock::Text {
                                text: String::new(),
                            },
                        });
                        self.text_block = Some(index);
                        index
                    }
                };
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::TextDelta {
                        text: text.to_string(),
                    },
                });
            }
            OutboundChunk::ToolCallStart { index, id, name } => {
                self.close_text(&mut events);
                let block = self.open_block();
                self.tool_blocks.insert(index, block);
                events.push(StreamEvent::ContentBlockStart {
                    index: block,
                    content_block: ResponseContentBlock::ToolUse {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
            }
            OutboundChunk::ToolCallDelta { index, fragment } => {
                if let Some(&block) = self.tool_blocks.get(&index) {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: block,
                        delta: Delta::InputJsonDelta {
                            partial_json: fragment.to_string(),
                        },
                    });
                }
            }
            OutboundChunk::ToolCallDone { index } => {
                if let Some(block) = self.tool_blocks.remove(&index) {
                    events.push(StreamEvent::ContentBlockStop { index: block });
                }
            }
            OutboundChunk::Finish { reason, usage } => {
                self.close_text(&mut events);
                for (_, block) in std::mem::take(&mut self.tool_blocks) {
                    events.push(StreamEvent::ContentBlockStop { index: block });
                }
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaBody {
                        stop_reason: Some(
                            finish::to_anthropic(reason.unwrap_or(FinishReason::Stop)).to_string(),
                        ),
                        stop_sequence: None,
                    },
                    usage: DeltaUsage {
                        input_tokens: usage.map(|u| u.prompt_tokens).filter(|n| *n > 0),
                        output_tokens: usage.map_or(0, |u| u.completion_tokens),
                    },
                });
                events.push(StreamEvent::MessageStop);
            }
            OutboundChunk::Failed(_) => {}
        }

        events
            .iter()
            .map(|e| SseFrame::json(Some(e.event_name()), e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(body: serde_json::Value) -> Result<CanonicalRequest> {
        AnthropicCodec::new().decode_request(body.to_string().as_bytes())
    }

    fn events(chunk: DecodedChunk) -> Vec<CanonicalEvent> {
        match chunk {
            DecodedChunk::Events(events) => events,
            DecodedChunk::Done => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn test_text_blocks_collapse() {
        let req = decode(json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "Hi"},
                {"type": "text", "text": " there"}
            ]}]
        }))
        .unwrap();

        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].content, Content::Text("Hi there".into()));
        assert_eq!(req.max_tokens, None);
    }

    #[test]
    fn test_rejects_non_text_system_block() {
        let err = decode(json!({
            "model": "claude-3-haiku",
            "system": [{
                "type": "image",
                "source": {"type": "base64", "media_type": "image/png", "data": "AA"}
            }],
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Decode { .. }));
    }

    #[test]
    fn test_system_only_request_is_accepted() {
        let req = decode(json!({
            "model": "claude-3-haiku",
            "system": "summarize the rules",
            "messages": []
        }))
        .unwrap();
        assert_eq!(req.system_prompt.as_deref(), Some("summarize the rules"));
    }

    #[test]
    fn test_tool_result_splits_into_tool_messages() {
        let req = decode(json!({
            "model": "claude-3-haiku",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "s"},
                    {"type": "tool_use", "id": "toolu_1", "name": "calc", "input": {"x": 2}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "4"},
                    {"type": "text", "text": "Now continue"}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].tool_calls[0].function.arguments, r#"{"x":2}"#);
        assert_eq!(req.messages[1].role, Role::Tool);
        assert_eq!(req.messages[1].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(req.messages[2].role, Role::User);
    }

    #[test]
    fn test_metadata_user_and_strings() {
        let req = decode(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "metadata": {"user_id": "u-9", "team": "core"}
        }))
        .unwrap();
        assert_eq!(req.user.as_deref(), Some("u-9"));
        assert_eq!(req.metadata.get("team").map(String::as_str), Some("core"));

        let err = decode(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "metadata": {"count": 3}
        }))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Decode { .. }));
    }

    #[test]
    fn test_encode_defaults_max_tokens_and_maps_tool_choice() {
        let mut req = CanonicalRequest::new("claude-3-haiku", ApiFormat::OpenAi);
        req.messages.push(Message::text(Role::System, "be terse"));
        req.messages.push(Message::text(Role::User, "hi"));
        req.tools.push(ToolDefinition::function("calc", None, json!({"type": "object"})));
        req.tool_choice = Some(ToolChoice::Required);

        let body: serde_json::Value =
            serde_json::from_slice(&AnthropicCodec::new().encode_request(&req).unwrap()).unwrap();
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["tool_choice"], json!({"type": "any"}));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);

        req.tool_choice = Some(ToolChoice::None);
        let body: serde_json::Value =
            serde_json::from_slice(&AnthropicCodec::new().encode_request(&req).unwrap()).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_encode_merges_tool_results_into_one_user_turn() {
        let mut req = CanonicalRequest::new("m", ApiFormat::OpenAi);
        req.messages.push(Message::text(Role::User, "go"));
        let mut assistant = Message::text(Role::Assistant, "");
        assistant.tool_calls.push(ToolCall::function("a", "f", "{}"));
        assistant.tool_calls.push(ToolCall::function("b", "f", "{}"));
        req.messages.push(assistant);
        req.messages.push(Message::tool_result("a", "1"));
        req.messages.push(Message::tool_result("b", "2"));

        let body: serde_json::Value =
            serde_json::from_slice(&AnthropicCodec::new().encode_request(&req).unwrap()).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_encode_rejects_malformed_arguments() {
        let mut req = CanonicalRequest::new("m", ApiFormat::OpenAi);
        req.messages.push(Message::text(Role::User, "go"));
        let mut assistant = Message::text(Role::Assistant, "");
        assistant
            .tool_calls
            .push(ToolCall::function("a", "f", r#"{"x":"#));
        req.messages.push(assistant);

        assert!(AnthropicCodec::new().encode_request(&req).is_err());
    }

    #[test]
    fn test_request_round_trip() {
        let codec = AnthropicCodec::new();
        let mut req = CanonicalRequest::new("claude-3-haiku", ApiFormat::Anthropic);
        req.system_prompt = Some("sys".into());
        req.max_tokens = Some(100);
        req.messages.push(Message::text(Role::User, "weather?"));
        let mut assistant = Message::text(Role::Assistant, "checking");
        assistant
            .tool_calls
            .push(ToolCall::function("toolu_1", "weather", r#"{"city":"Oslo"}"#));
        req.messages.push(assistant);
        req.messages.push(Message::tool_result("toolu_1", "cold"));

        let back = codec
            .decode_request(&codec.encode_request(&req).unwrap())
            .unwrap();
        assert_eq!(back.messages, req.messages);
        assert_eq!(back.system_prompt, req.system_prompt);
        assert_eq!(back.max_tokens, Some(100));
    }

    #[test]
    fn test_decode_response() {
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-haiku-20240307",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": {"input_tokens": 12, "output_tokens": 30}
        });
        let resp = AnthropicCodec::new()
            .decode_response(body.to_string().as_bytes())
            .unwrap();

        assert_eq!(resp.text(), "Let me check.");
        assert_eq!(resp.finish_reason(), Some(FinishReason::ToolCalls));
        assert_eq!(resp.tool_calls()[0].function.arguments, r#"{"q":"rust"}"#);
        assert_eq!(resp.usage, Some(Usage::new(12, 30)));
    }

    #[test]
    fn test_encode_response_from_openai_ids() {
        let mut message = Message::text(Role::Assistant, "");
        message
            .tool_calls
            .push(ToolCall::function("call_1", "search", r#"{"q":"x"}"#));
        let resp = CanonicalResponse {
            id: "chatcmpl-abc".into(),
            model: "claude-3-haiku".into(),
            provider_model: Some("gpt-4o".into()),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            usage: Some(Usage::new(1, 2)),
            rate_limit: None,
            source_api: ApiFormat::OpenAi,
            raw_response: None,
        };

        let body: serde_json::Value =
            serde_json::from_slice(&AnthropicCodec::new().encode_response(&resp).unwrap()).unwrap();
        assert_eq!(body["id"], "msg_abc");
        assert_eq!(body["stop_reason"], "tool_use");
        assert_eq!(body["content"][0]["input"]["q"], "x");
        assert_eq!(body["usage"]["output_tokens"], 2);
    }

    #[test]
    fn test_encode_response_bad_arguments_is_server_error() {
        let mut message = Message::text(Role::Assistant, "");
        message
            .tool_calls
            .push(ToolCall::function("call_1", "search", r#"{"q":"#));
        let resp = CanonicalResponse {
            id: "chatcmpl-abc".into(),
            model: "claude-3-haiku".into(),
            provider_model: None,
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            usage: None,
            rate_limit: None,
            source_api: ApiFormat::OpenAi,
            raw_response: None,
        };

        let err = AnthropicCodec::new().encode_response(&resp).unwrap_err();
        assert!(matches!(err, GatewayError::Encode { .. }));
        assert_eq!(err.to_api_error().status(), 500);
    }

    #[test]
    fn test_stream_reassembles_tool_arguments() {
        let mut decoder = AnthropicStreamDecoder::default();
        let start = json!({"type": "content_block_start", "index": 1,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "calc", "input": {}}});
        let started = events(
            decoder
                .decode_stream_chunk(Some("content_block_start"), &start.to_string())
                .unwrap(),
        );
        assert_eq!(started[0].tool_call, Some(ToolCallChunk::start(0, "toolu_1", "calc")));

        let mut arguments = String::new();
        for fragment in [r#"{"a":"#, "1", "}"] {
            let delta = json!({"type": "content_block_delta", "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": fragment}});
            let decoded = events(decoder.decode_stream_chunk(None, &delta.to_string()).unwrap());
            let chunk = decoded[0].tool_call.as_ref().unwrap();
            arguments.push_str(chunk.function.arguments.as_deref().unwrap());
        }
        assert_eq!(arguments, r#"{"a":1}"#);
        let parsed: serde_json::Value = serde_json::from_str(&arguments).unwrap();
        assert_eq!(parsed, json!({"a": 1}));

        let stop = json!({"type": "content_block_stop", "index": 1}).to_string();
        let stopped = events(decoder.decode_stream_chunk(None, &stop).unwrap());
        assert_eq!(stopped[0].tool_call, Some(ToolCallChunk::done(0)));
    }

    #[test]
    fn test_stream_rejects_malformed_arguments() {
        let mut decoder = AnthropicStreamDecoder::default();
        let start = json!({"type": "content_block_start", "index": 0,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "calc", "input": {}}});
        decoder.decode_stream_chunk(None, &start.to_string()).unwrap();
        for fragment in [r#"{"a":"#, "1"] {
            let delta = json!({"type": "content_block_delta", "index": 0,
                "delta": {"type": "input_json_delta", "partial_json": fragment}});
            decoder.decode_stream_chunk(None, &delta.to_string()).unwrap();
        }

        let stop = json!({"type": "content_block_stop", "index": 0}).to_string();
        let err = decoder.decode_stream_chunk(None, &stop).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_stream_control_events_are_empty() {
        let mut decoder = AnthropicStreamDecoder::default();
        assert_eq!(
            decoder.decode_stream_chunk(Some("ping"), r#"{"type":"ping"}"#).unwrap(),
            DecodedChunk::none()
        );
        assert_eq!(
            decoder
                .decode_stream_chunk(
                    Some("content_block_start"),
                    r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
                )
                .unwrap(),
            DecodedChunk::none()
        );
        assert_eq!(
            decoder
                .decode_stream_chunk(Some("future_event"), r#"{"type":"future_event"}"#)
                .unwrap(),
            DecodedChunk::none()
        );
        assert_eq!(
            decoder
                .decode_stream_chunk(Some("message_stop"), r#"{"type":"message_stop"}"#)
                .unwrap(),
            DecodedChunk::Done
        );
    }

    #[test]
    fn test_stream_usage_is_split_across_events() {
        let mut decoder = AnthropicStreamDecoder::default();
        let start = json!({"type": "message_start", "message": {
            "id": "msg_1", "type": "message", "role": "assistant", "content": [],
            "model": "claude-3-haiku", "stop_reason": null, "stop_sequence": null,
            "usage": {"input_tokens": 25, "output_tokens": 1}}});
        let first = events(decoder.decode_stream_chunk(None, &start.to_string()).unwrap());
        assert_eq!(first[0].usage, Some(Usage::new(25, 1)));

        let delta = json!({"type": "message_delta",
            "delta": {"stop_reason": "end_turn", "stop_sequence": null},
            "usage": {"output_tokens": 15}});
        let last = events(decoder.decode_stream_chunk(None, &delta.to_string()).unwrap());
        assert_eq!(last[0].usage, Some(Usage::new(25, 15)));
        assert_eq!(last[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_stream_encoder_block_ordering() {
        let mut encoder = AnthropicStreamEncoder::new(StreamContext::new("msg_x", "claude"));
        let mut names = Vec::new();
        let mut push = |frames: Vec<SseFrame>| {
            names.extend(frames.into_iter().filter_map(|f| f.event));
        };

        push(encoder.encode_stream_chunk(OutboundChunk::Start { usage: None }).unwrap());
        push(encoder.encode_stream_chunk(OutboundChunk::ContentDelta("Checking")).unwrap());
        push(
            encoder
                .encode_stream_chunk(OutboundChunk::ToolCallStart {
                    index: 0,
                    id: "call_1",
                    name: "search",
                })
                .unwrap(),
        );
        push(
            encoder
                .encode_stream_chunk(OutboundChunk::ToolCallDelta {
                    index: 0,
                    fragment: "{}",
                })
                .unwrap(),
        );
        push(
            encoder
                .encode_stream_chunk(OutboundChunk::Finish {
                    reason: Some(FinishReason::ToolCalls),
                    usage: Some(Usage::new(5, 6)),
                })
                .unwrap(),
        );

        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }
}
