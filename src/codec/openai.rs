//! OpenAI Chat Completions codec.
//!
//! The canonical model is shaped after this dialect, so most fields map
//! one-to-one. System messages stay inline in `messages`; the `user` field
//! is the end-user identifier.

use bytes::Bytes;
use std::collections::BTreeMap;

use super::finish;
use super::openai_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatFunction,
    ChatMessage, ChatTool, ChatToolCall, ChatToolCallFunction, ChatToolChoice,
    ChatToolChoiceFunction, ChatToolChoiceSpecific, ChatUsage, Choice as ChatChoice,
    ChoiceMessage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction, ContentPart,
    ImageUrlDetail, StreamOptions,
};
use super::polymorphic::TextOrParts;
use super::{
    at_message, ClientCodec, DecodedChunk, OutboundChunk, ProviderCodec, StreamContext,
    StreamDecoder, StreamEncoder,
};
use crate::canonical::{
    self, ApiFormat, CanonicalEvent, CanonicalRequest, CanonicalResponse, Choice, Content,
    FinishReason, Message, Role, StreamError, ToolCall, ToolCallChunk, ToolChoice, ToolDefinition,
    Usage,
};
use crate::error::{GatewayError, Result};
use crate::stream::SseFrame;
use crate::taxonomy::ApiError;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCodec;

impl OpenAiCodec {
    pub fn new() -> Self {
        Self
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

impl ClientCodec for OpenAiCodec {
    fn format(&self) -> ApiFormat {
        ApiFormat::OpenAi
    }

    fn decode_request(&self, body: &[u8]) -> Result<CanonicalRequest> {
        let req: ChatCompletionRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::decode(format!("invalid chat completion request: {e}")))?;

        let mut canonical = CanonicalRequest::new(req.model, ApiFormat::OpenAi);
        canonical.messages = req
            .messages
            .into_iter()
            .enumerate()
            .map(|(i, m)| decode_message(m).map_err(|e| at_message(i, e)))
            .collect::<Result<_>>()?;
        canonical.stream = req.stream.unwrap_or(false);
        canonical.max_tokens = req.max_tokens.or(req.max_completion_tokens);
        canonical.temperature = req.temperature;
        canonical.top_p = req.top_p;
        canonical.stop = match req.stop {
            Some(TextOrParts::Text(stop)) => vec![stop],
            Some(TextOrParts::Parts(stops)) => stops,
            None => Vec::new(),
        };
        canonical.tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(decode_tool)
            .collect::<Result<_>>()?;
        canonical.tool_choice = req.tool_choice.map(decode_tool_choice).transpose()?;
        canonical.response_format = req.response_format;
        canonical.metadata = decode_metadata(req.metadata)?;
        canonical.user = req.user;
        canonical.raw_request = Some(Bytes::copy_from_slice(body));

        if !canonical.has_input() {
            return Err(GatewayError::decode("messages must not be empty"));
        }
        Ok(canonical)
    }

    fn encode_response(&self, response: &CanonicalResponse) -> Result<Vec<u8>> {
        let choices = response
            .choices
            .iter()
            .map(|c| {
                let text = c.message.content.as_text();
                let tool_calls: Vec<ChatToolCall> =
                    c.message.tool_calls.iter().map(encode_tool_call).collect();
                ChatChoice {
                    index: c.index,
                    message: ChoiceMessage {
                        role: "assistant".to_string(),
                        content: if text.is_empty() && !tool_calls.is_empty() {
                            None
                        } else {
                            Some(text)
                        },
                        reasoning_content: None,
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    },
                    finish_reason: c.finish_reason.map(|r| r.as_str().to_string()),
                }
            })
            .collect();

        let body = ChatCompletionResponse {
            id: response.id.clone(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: response.model.clone(),
            choices,
            usage: response.usage.map(encode_usage),
        };
        Ok(serde_json::to_vec(&body)?)
    }

    fn stream_encoder(&self, context: StreamContext) -> Box<dyn StreamEncoder> {
        Box::new(OpenAiStreamEncoder::new(context))
    }
}

fn decode_message(msg: ChatMessage) -> Result<Message> {
    let role = Role::parse(&msg.role)
        .ok_or_else(|| GatewayError::decode(format!("unsupported role '{}'", msg.role)))?;

    let content = match msg.content {
        None => Content::default(),
        Some(TextOrParts::Text(text)) => Content::Text(text),
        Some(TextOrParts::Parts(parts)) => Content::from_parts(
            parts
                .into_iter()
                .map(|p| match p {
                    ContentPart::Text { text } => canonical::ContentPart::Text { text },
                    ContentPart::ImageUrl { image_url } => canonical::ContentPart::ImageUrl {
                        url: image_url.url,
                        detail: image_url.detail,
                    },
                })
                .collect(),
        ),
    };

    if role == Role::Tool && msg.tool_call_id.is_none() {
        return Err(GatewayError::decode("tool messages require tool_call_id"));
    }

    Ok(Message {
        role,
        content,
        name: msg.name,
        tool_call_id: msg.tool_call_id,
        tool_calls: msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                call_type: tc.call_type,
                function: canonical::FunctionCall {
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                },
            })
            .collect(),
    })
}

fn decode_tool(tool: ChatTool) -> Result<ToolDefinition> {
    if tool.tool_type != "function" {
        return Err(GatewayError::decode(format!(
            "unsupported tool type '{}'",
            tool.tool_type
        )));
    }
    Ok(ToolDefinition::function(
        tool.function.name,
        tool.function.description,
        tool.function.parameters,
    ))
}

fn decode_tool_choice(choice: ChatToolChoice) -> Result<ToolChoice> {
    match choice {
        ChatToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Ok(ToolChoice::Auto),
            "none" => Ok(ToolChoice::None),
            "required" => Ok(ToolChoice::Required),
            other => Err(GatewayError::decode(format!(
                "unsupported tool_choice '{other}'"
            ))),
        },
        ChatToolChoice::Specific(specific) => Ok(ToolChoice::Function(specific.function.name)),
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

fn encode_tool_call(tc: &ToolCall) -> ChatToolCall {
    ChatToolCall {
        id: tc.id.clone(),
        call_type: tc.call_type.clone(),
        function: ChatToolCallFunction {
            name: tc.function.name.clone(),
            arguments: tc.function.arguments.clone(),
        },
    }
}

fn encode_usage(usage: Usage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

// ---------------------------------------------------------------------------
// Provider side
// ---------------------------------------------------------------------------

impl ProviderCodec for OpenAiCodec {
    fn encode_request(&self, request: &CanonicalRequest) -> Result<Vec<u8>> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system_prompt {
            messages.push(ChatMessage::new(
                "system",
                Some(ChatContent::Text(system.clone())),
            ));
        }
        for msg in &request.messages {
            messages.push(encode_message(msg)?);
        }

        let tools = (!request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|t| ChatTool {
                    tool_type: "function".to_string(),
                    function: ChatFunction {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    },
                })
                .collect()
        });

        let tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
            ToolChoice::Auto => ChatToolChoice::Mode("auto".to_string()),
            ToolChoice::None => ChatToolChoice::Mode("none".to_string()),
            ToolChoice::Required => ChatToolChoice::Mode("required".to_string()),
            ToolChoice::Function(name) => ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            }),
        });

        let metadata = (!request.metadata.is_empty()).then(|| {
            request
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect()
        });

        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            max_completion_tokens: None,
            temperature: request.temperature,
            top_p: request.top_p,
            stream: request.stream.then_some(true),
            stream_options: request.stream.then_some(StreamOptions {
                include_usage: true,
            }),
            tools,
            tool_choice,
            stop: (!request.stop.is_empty()).then(|| TextOrParts::Parts(request.stop.clone())),
            response_format: request.response_format.clone(),
            metadata,
            user: request.user.clone(),
        };
        Ok(serde_json::to_vec(&body)?)
    }

    fn decode_response(&self, body: &[u8]) -> Result<CanonicalResponse> {
        let resp: ChatCompletionResponse = serde_json::from_slice(body).map_err(|e| {
            GatewayError::provider(format!("invalid chat completion response: {e}"))
        })?;

        let choices = resp
            .choices
            .into_iter()
            .map(|c| {
                // reasoning models (DeepSeek R1, Kimi) may answer only in reasoning_content
                let text = match c.message.content {
                    Some(text) if !text.is_empty() => text,
                    _ => c.message.reasoning_content.unwrap_or_default(),
                };
                let mut message = Message::text(Role::Assistant, text);
                message.tool_calls = c
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tc| {
                        ToolCall::function(tc.id, tc.function.name, tc.function.arguments)
                    })
                    .collect();
                Choice {
                    index: c.index,
                    message,
                    finish_reason: c.finish_reason.as_deref().map(finish::from_openai),
                }
            })
            .collect();

        Ok(CanonicalResponse {
            id: resp.id,
            model: resp.model.clone(),
            provider_model: Some(resp.model),
            choices,
            // vendor totals pass through verbatim
            usage: resp.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            rate_limit: None,
            source_api: ApiFormat::OpenAi,
            raw_response: Some(Bytes::copy_from_slice(body)),
        })
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(OpenAiStreamDecoder::default())
    }

    fn decode_error(&self, status: u16, body: &[u8]) -> ApiError {
        ApiError::from_openai(Some(status), body)
    }
}

fn encode_message(msg: &Message) -> Result<ChatMessage> {
    let mut tool_calls: Vec<ChatToolCall> = msg.tool_calls.iter().map(encode_tool_call).collect();

    let content = match (&msg.role, &msg.content) {
        (Role::Tool, content) => Some(ChatContent::Text(super::tool_output(content).0)),
        (_, Content::Text(text)) => {
            if text.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(ChatContent::Text(text.clone()))
            }
        }
        (_, Content::Parts(parts)) => {
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    canonical::ContentPart::Text { text } => {
                        out.push(ContentPart::Text { text: text.clone() });
                    }
                    canonical::ContentPart::Image { media_type, data } => {
                        out.push(ContentPart::ImageUrl {
                            image_url: ImageUrlDetail {
                                url: format!("data:{media_type};base64,{data}"),
                                detail: None,
                            },
                        });
                    }
                    canonical::ContentPart::ImageUrl { url, detail } => {
                        out.push(ContentPart::ImageUrl {
                            image_url: ImageUrlDetail {
                                url: url.clone(),
                                detail: detail.clone(),
                            },
                        });
                    }
                    canonical::ContentPart::ToolUse {
                        id,
                        name,
                        arguments,
                    } => tool_calls.push(ChatToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    }),
                    canonical::ContentPart::ToolResult { .. } => {
                        return Err(GatewayError::encode(
                            "tool results must be sent as tool-role messages",
                        ));
                    }
                }
            }
            (!out.is_empty()).then_some(ChatContent::Parts(out))
        }
    };

    Ok(ChatMessage {
        role: msg.role.as_str().to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: msg.tool_call_id.clone(),
        name: msg.name.clone(),
    })
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Decodes `chat.completion.chunk` payloads.
///
/// OpenAI never marks a tool call as finished, so arguments are buffered per
/// index and a call is closed (and its arguments checked) when a later index
/// starts, when a finish reason arrives, or at `[DONE]`.
#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder {
    seen_model: bool,
    /// Arguments of calls not yet closed, by index
    open_calls: BTreeMap<u32, String>,
}

impl OpenAiStreamDecoder {
    /// Close every open call except `keep`.
    fn close_calls(&mut self, keep: Option<u32>) -> Result<Vec<CanonicalEvent>> {
        let closing: Vec<u32> = self
            .open_calls
            .keys()
            .copied()
            .filter(|index| Some(*index) != keep)
            .collect();

        let mut events = Vec::with_capacity(closing.len());
        for index in closing {
            if let Some(arguments) = self.open_calls.remove(&index) {
                check_arguments(index, &arguments)?;
                events.push(CanonicalEvent::tool_call(ToolCallChunk::done(index)));
            }
        }
        Ok(events)
    }
}

fn check_arguments(index: u32, arguments: &str) -> Result<()> {
    if arguments.trim().is_empty() {
        return Ok(());
    }
    serde_json::from_str::<serde_json::Value>(arguments)
        .map(drop)
        .map_err(|e| {
            GatewayError::decode(format!(
                "tool call arguments for index {index} are not valid JSON: {e}"
            ))
        })
}

impl StreamDecoder for OpenAiStreamDecoder {
    fn decode_stream_chunk(&mut self, _event: Option<&str>, data: &str) -> Result<DecodedChunk> {
        let data = data.trim();
        if data == "[DONE]" {
            // The translator closes whatever is still open; only the check is left.
            for (index, arguments) in std::mem::take(&mut self.open_calls) {
                check_arguments(index, &arguments)?;
            }
            return Ok(DecodedChunk::Done);
        }
        if data.is_empty() {
            return Ok(DecodedChunk::none());
        }

        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| GatewayError::decode(format!("invalid stream chunk: {e}")))?;
        if value.get("error").is_some() {
            let error = ApiError::from_openai(None, data.as_bytes());
            return Ok(DecodedChunk::one(CanonicalEvent::failed(
                StreamError::Upstream { error },
            )));
        }
        let chunk: ChatCompletionChunk = serde_json::from_value(value)
            .map_err(|e| GatewayError::decode(format!("invalid stream chunk: {e}")))?;

        let mut head = CanonicalEvent::default();
        if !self.seen_model && !chunk.model.is_empty() {
            head.model = Some(chunk.model.clone());
            head.provider_model = Some(chunk.model);
            self.seen_model = true;
        }
        if let Some(u) = chunk.usage {
            head.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        let mut events = Vec::new();
        let mut finish_reason = None;
        if let Some(choice) = chunk.choices.into_iter().next() {
            head.role = choice.delta.role.as_deref().and_then(Role::parse);
            head.content_delta = choice
                .delta
                .content
                .filter(|s| !s.is_empty())
                .or_else(|| choice.delta.reasoning_content.filter(|s| !s.is_empty()));

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = tc
                    .function
                    .map(|f| (f.name, f.arguments))
                    .unwrap_or((None, None));
                if let Some(id) = tc.id {
                    events.extend(self.close_calls(Some(tc.index))?);
                    self.open_calls.entry(tc.index).or_default();
                    events.push(CanonicalEvent::tool_call(ToolCallChunk::start(
                        tc.index,
                        id,
                        name.unwrap_or_default(),
                    )));
                }
                if let Some(fragment) = arguments.filter(|a| !a.is_empty()) {
                    if let Some(buffer) = self.open_calls.get_mut(&tc.index) {
                        buffer.push_str(&fragment);
                    }
                    events.push(CanonicalEvent::tool_call(ToolCallChunk::arguments(
                        tc.index, fragment,
                    )));
                }
            }
            finish_reason = choice.finish_reason.as_deref().map(finish::from_openai);
        }

        if !head.is_empty() {
            events.insert(0, head);
        }
        if let Some(reason) = finish_reason {
            events.extend(self.close_calls(None)?);
            events.push(CanonicalEvent::finish(reason));
        }
        Ok(DecodedChunk::Events(events))
    }
}

/// Writes `chat.completion.chunk` frames, ending with `data: [DONE]`.
#[derive(Debug)]
pub struct OpenAiStreamEncoder {
    context: StreamContext,
}

impl OpenAiStreamEncoder {
    pub fn new(context: StreamContext) -> Self {
        Self { context }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.context.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.context.created,
            model: self.context.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(|r| r.as_str().to_string()),
            }],
            usage: None,
        }
    }

    fn tool_delta(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> ChunkDelta {
        ChunkDelta {
            tool_calls: Some(vec![ChunkToolCall {
                index,
                id: id.map(String::from),
                call_type: id.map(|_| "function".to_string()),
                function: Some(ChunkToolCallFunction {
                    name: name.map(String::from),
                    arguments: Some(args.to_string()),
                }),
            }]),
            ..ChunkDelta::default()
        }
    }
}

impl StreamEncoder for OpenAiStreamEncoder {
    fn encode_stream_chunk(&mut self, chunk: OutboundChunk<'_>) -> Result<Vec<SseFrame>> {
        let chunks = match chunk {
            OutboundChunk::Start { .. } => vec![self.chunk(
                ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some(String::new()),
                    ..ChunkDelta::default()
                },
                None,
            )],
            OutboundChunk::ContentDelta(text) => vec![self.chunk(
                ChunkDelta {
                    content: Some(text.to_string()),
                    ..ChunkDelta::default()
                },
                None,
            )],
            OutboundChunk::ToolCallStart { index, id, name } => {
                vec![self.chunk(Self::tool_delta(index, Some(id), Some(name), ""), None)]
            }
            OutboundChunk::ToolCallDelta { index, fragment } => {
                vec![self.chunk(Self::tool_delta(index, None, None, fragment), None)]
            }
            OutboundChunk::ToolCallDone { .. } | OutboundChunk::Failed(_) => Vec::new(),
            OutboundChunk::Finish { reason, usage } => {
                let mut out = vec![self.chunk(
                    ChunkDelta::default(),
                    Some(reason.unwrap_or(FinishReason::Stop)),
                )];
                if let Some(usage) = usage {
                    let mut usage_chunk = self.chunk(ChunkDelta::default(), None);
                    usage_chunk.choices.clear();
                    usage_chunk.usage = Some(encode_usage(usage));
                    out.push(usage_chunk);
                }
                let mut frames = out
                    .iter()
                    .map(|c| SseFrame::json(None, c))
                    .collect::<Result<Vec<_>>>()?;
                frames.push(SseFrame::done());
                return Ok(frames);
            }
        };

        chunks.iter().map(|c| SseFrame::json(None, c)).collect()
    }
}
