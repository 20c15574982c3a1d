//! Streaming encoder for the Responses API.
//!
//! Emits `response.created`, then one `output_item.added` / `delta` /
//! `done` run per output item, then `response.done` or `response.failed`.
//! Only one item is open at a time: a tool call starting while text is
//! streaming closes the text item first, and vice versa.

use super::codec::{encode_usage, normalize_finish_reason, storage_status};
use super::types::{
    OutputContent, OutputItem, ResponseError, ResponseObject, ResponsesStreamEvent,
};
use crate::codec::{OutboundChunk, StreamContext, StreamEncoder};
use crate::error::Result;
use crate::stream::SseFrame;

#[derive(Debug)]
enum OpenItem {
    Text {
        output_index: u32,
        id: String,
        text: String,
    },
    Tool {
        output_index: u32,
        tool_index: u32,
        id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
}

#[derive(Debug)]
pub struct ResponsesAccumulator {
    context: StreamContext,
    started: bool,
    open: Option<OpenItem>,
    /// Finished items, in output order
    output: Vec<OutputItem>,
    next_output_index: u32,
}

impl ResponsesAccumulator {
    pub fn new(context: StreamContext) -> Self {
        Self {
            context,
            started: false,
            open: None,
            output: Vec::new(),
            next_output_index: 0,
        }
    }

    /// Items completed so far.
    pub fn output(&self) -> &[OutputItem] {
        &self.output
    }

    fn response(&self, status: &str) -> ResponseObject {
        ResponseObject {
            id: self.context.id.clone(),
            object: "response".to_string(),
            created_at: self.context.created,
            model: self.context.model.clone(),
            status: status.to_string(),
            output: self.output.clone(),
            usage: None,
            finish_reason: None,
            previous_response_id: None,
            error: None,
        }
    }

    fn frame(event: &ResponsesStreamEvent) -> Result<SseFrame> {
        SseFrame::json(Some(event.event_name()), event)
    }

    fn start(&mut self, out: &mut Vec<ResponsesStreamEvent>) {
        if !self.started {
            self.started = true;
            out.push(ResponsesStreamEvent::Created {
                response: self.response("in_progress"),
            });
        }
    }

    fn close_open(&mut self, out: &mut Vec<ResponsesStreamEvent>) {
        let Some(open) = self.open.take() else {
            return;
        };
        let (output_index, item) = match open {
            OpenItem::Text {
                output_index,
                id,
                text,
            } => (
                output_index,
                OutputItem::Message {
                    id,
                    status: "completed".to_string(),
                    role: "assistant".to_string(),
                    content: vec![OutputContent::OutputText {
                        text,
                        annotations: Vec::new(),
                    }],
                },
            ),
            OpenItem::Tool {
                output_index,
                id,
                call_id,
                name,
                arguments,
                ..
            } => (
                output_index,
                OutputItem::FunctionCall {
                    id,
                    call_id,
                    name,
                    arguments,
                    status: "completed".to_string(),
                },
            ),
        };
        self.output.push(item.clone());
        out.push(ResponsesStreamEvent::OutputItemDone { output_index, item });
    }

    fn claim_index(&mut self) -> u32 {
        let index = self.next_output_index;
        self.next_output_index += 1;
        index
    }

    fn push_text(&mut self, text: &str, out: &mut Vec<ResponsesStreamEvent>) {
        if !matches!(self.open, Some(OpenItem::Text { .. })) {
            self.close_open(out);
            let output_index = self.claim_index();
            let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
            out.push(ResponsesStreamEvent::OutputItemAdded {
                output_index,
                item: OutputItem::Message {
                    id: id.clone(),
                    status: "in_progress".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                },
            });
            self.open = Some(OpenItem::Text {
                output_index,
                id,
                text: String::new(),
            });
        }

        if let Some(OpenItem::Text {
            output_index,
            id,
            text: buffer,
        }) = self.open.as_mut()
        {
            buffer.push_str(text);
            out.push(ResponsesStreamEvent::OutputItemDelta {
                output_index: *output_index,
                item_id: id.clone(),
                delta: text.to_string(),
            });
        }
    }

    fn open_tool(
        &mut self,
        tool_index: u32,
        call_id: &str,
        name: &str,
        out: &mut Vec<ResponsesStreamEvent>,
    ) {
        self.close_open(out);
        let output_index = self.claim_index();
        let id = format!("fc_{}", uuid::Uuid::new_v4().simple());
        out.push(ResponsesStreamEvent::OutputItemAdded {
            output_index,
            item: OutputItem::FunctionCall {
                id: id.clone(),
                call_id: call_id.to_string(),
                name: name.to_string(),
                arguments: String::new(),
                status: "in_progress".to_string(),
            },
        });
        self.open = Some(OpenItem::Tool {
            output_index,
            tool_index,
            id,
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: String::new(),
        });
    }

    fn push_arguments(&mut self, index: u32, fragment: &str, out: &mut Vec<ResponsesStreamEvent>) {
        match self.open.as_mut() {
            Some(OpenItem::Tool {
                output_index,
                tool_index,
                id,
                arguments,
                ..
            }) if *tool_index == index => {
                arguments.push_str(fragment);
                out.push(ResponsesStreamEvent::OutputItemDelta {
                    output_index: *output_index,
                    item_id: id.clone(),
                    delta: fragment.to_string(),
                });
            }
            _ => {
                tracing::debug!(index, "Dropping arguments for a tool call that is not open");
            }
        }
    }
}

impl StreamEncoder for ResponsesAccumulator {
    fn encode_stream_chunk(&mut self, chunk: OutboundChunk<'_>) -> Result<Vec<SseFrame>> {
        let mut events = Vec::new();

        match chunk {
            OutboundChunk::Start { .. } => self.start(&mut events),
            OutboundChunk::ContentDelta(text) => {
                self.start(&mut events);
                self.push_text(text, &mut events);
            }
            OutboundChunk::ToolCallStart { index, id, name } => {
                self.start(&mut events);
                self.open_tool(index, id, name, &mut events);
            }
            OutboundChunk::ToolCallDelta { index, fragment } => {
                self.push_arguments(index, fragment, &mut events);
            }
            OutboundChunk::ToolCallDone { index } => {
                let open = matches!(
                    self.open,
                    Some(OpenItem::Tool { tool_index, .. }) if tool_index == index
                );
                if open {
                    self.close_open(&mut events);
                }
            }
            OutboundChunk::Finish { reason, usage } => {
                self.start(&mut events);
                self.close_open(&mut events);
                let finish = normalize_finish_reason(reason.map(|r| r.as_str()));
                let mut response = self.response(storage_status(&finish));
                response.usage = usage.map(encode_usage);
                response.finish_reason = Some(finish);
                events.push(ResponsesStreamEvent::Done { response });
            }
            OutboundChunk::Failed(error) => {
                // An open item stays unfinished; only the failure is reported.
                self.open = None;
                let mut response = self.response("failed");
                response.error = Some(ResponseError {
                    code: error
                        .code
                        .clone()
                        .unwrap_or_else(|| error.kind.as_str().to_string()),
                    message: error.message.clone(),
                });
                events.push(ResponsesStreamEvent::Failed { response });
            }
        }

        events.iter().map(Self::frame).collect()
    }
}
