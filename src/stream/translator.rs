//! Drives a client-format stream encoder from provider events.
//!
//! The translator is the single consumer of a provider's [`EventStream`]. It
//! keeps the running text and the in-flight tool calls, hands each increment
//! to the client's [`StreamEncoder`], and writes exactly one terminal marker.
//! Whatever it accumulated is returned as a [`CanonicalResponse`] so the
//! transcript can be persisted even when the client disconnected.

use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{EventStream, SseFrame, StreamOutcome, StreamStatus};
use crate::canonical::{
    ApiFormat, CanonicalEvent, CanonicalResponse, Choice, Content, FinishReason, Message, Role,
    StreamError, ToolCall, Usage,
};
use crate::codec::{OutboundChunk, StreamContext, StreamEncoder};
use crate::error::{GatewayError, Result};
use crate::taxonomy::ApiError;

#[derive(Debug, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

pub struct StreamTranslator {
    encoder: Box<dyn StreamEncoder>,
    context: StreamContext,
    source_api: ApiFormat,
    started: bool,
    finished: bool,
    full_text: String,
    pending: BTreeMap<u32, PendingToolCall>,
    completed: BTreeMap<u32, ToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    provider_model: Option<String>,
}

impl StreamTranslator {
    pub fn new(
        encoder: Box<dyn StreamEncoder>,
        context: StreamContext,
        source_api: ApiFormat,
    ) -> Self {
        Self {
            encoder,
            context,
            source_api,
            started: false,
            finished: false,
            full_text: String::new(),
            pending: BTreeMap::new(),
            completed: BTreeMap::new(),
            finish_reason: None,
            usage: None,
            provider_model: None,
        }
    }

    /// Translate one provider event into zero or more client frames.
    ///
    /// An event carrying an error is returned as `Err` without writing
    /// anything; the caller decides between [`fail`](Self::fail) and a silent
    /// exit.
    pub fn process_event(&mut self, event: CanonicalEvent) -> Result<Vec<SseFrame>> {
        if self.finished {
            return Ok(Vec::new());
        }
        match event.error {
            Some(StreamError::Cancelled) => return Err(GatewayError::Cancelled),
            Some(StreamError::Upstream { error }) => return Err(GatewayError::Upstream(error)),
            None => {}
        }

        if self.provider_model.is_none() {
            self.provider_model = event.provider_model.or(event.model);
        }
        if let Some(usage) = event.usage {
            self.usage = Some(usage);
        }
        if let Some(reason) = event.finish_reason {
            self.finish_reason = Some(reason);
        }

        let mut frames = Vec::new();
        if !self.started {
            self.started = true;
            frames.extend(
                self.encoder
                    .encode_stream_chunk(OutboundChunk::Start { usage: self.usage })?,
            );
        }

        if let Some(text) = event.content_delta.filter(|t| !t.is_empty()) {
            self.full_text.push_str(&text);
            frames.extend(self.encoder.encode_stream_chunk(OutboundChunk::ContentDelta(&text))?);
        }

        if let Some(chunk) = event.tool_call {
            let index = chunk.index;

            if let Some(id) = chunk.id {
                if !self.pending.contains_key(&index) {
                    let name = chunk.function.name.clone().unwrap_or_default();
                    frames.extend(self.encoder.encode_stream_chunk(OutboundChunk::ToolCallStart {
                        index,
                        id: &id,
                        name: &name,
                    })?);
                    self.pending.insert(
                        index,
                        PendingToolCall {
                            id,
                            name,
                            arguments: String::new(),
                        },
                    );
                }
            }

            if let Some(fragment) = chunk.function.arguments.filter(|f| !f.is_empty()) {
                match self.pending.get_mut(&index) {
                    Some(call) => {
                        call.arguments.push_str(&fragment);
                        frames.extend(self.encoder.encode_stream_chunk(
                            OutboundChunk::ToolCallDelta {
                                index,
                                fragment: &fragment,
                            },
                        )?);
                    }
                    None => {
                        tracing::warn!(index, "Dropping arguments for a tool call that never started");
                    }
                }
            }

            if chunk.done {
                frames.extend(self.complete_tool_call(index)?);
            }
        }

        Ok(frames)
    }

    fn complete_tool_call(&mut self, index: u32) -> Result<Vec<SseFrame>> {
        let Some(call) = self.pending.remove(&index) else {
            return Ok(Vec::new());
        };
        self.completed
            .insert(index, ToolCall::function(call.id, call.name, call.arguments));
        self.encoder
            .encode_stream_chunk(OutboundChunk::ToolCallDone { index })
    }

    /// Close open tool calls and write the terminal marker. Idempotent.
    pub fn finish(&mut self) -> Result<Vec<SseFrame>> {
        if self.finished {
            return Ok(Vec::new());
        }

        let mut frames = Vec::new();
        if !self.started {
            self.started = true;
            frames.extend(
                self.encoder
                    .encode_stream_chunk(OutboundChunk::Start { usage: self.usage })?,
            );
        }
        let open: Vec<u32> = self.pending.keys().copied().collect();
        for index in open {
            frames.extend(self.complete_tool_call(index)?);
        }

        self.finished = true;
        frames.extend(self.encoder.encode_stream_chunk(OutboundChunk::Finish {
            reason: self.finish_reason,
            usage: self.usage,
        })?);
        Ok(frames)
    }

    /// Write the format's failure marker, if it has one. No content chunk is
    /// fabricated.
    pub fn fail(&mut self, error: &ApiError) -> Result<Vec<SseFrame>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;
        self.encoder.encode_stream_chunk(OutboundChunk::Failed(error))
    }

    /// Snapshot of everything accumulated so far.
    pub fn response(&self) -> CanonicalResponse {
        let mut message = Message::text(Role::Assistant, "");
        message.content = Content::Text(self.full_text.clone());

        let mut calls = self.completed.clone();
        for (index, call) in &self.pending {
            calls.insert(
                *index,
                ToolCall::function(call.id.clone(), call.name.clone(), call.arguments.clone()),
            );
        }
        message.tool_calls = calls.into_values().collect();

        CanonicalResponse {
            id: self.context.id.clone(),
            model: self.context.model.clone(),
            provider_model: self.provider_model.clone(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
            rate_limit: None,
            source_api: self.source_api,
            raw_response: None,
        }
    }

    /// Consume `events` until upstream ends, the client goes away, or
    /// `timeout` passes, writing frames to `sink` one at a time.
    pub async fn run(
        mut self,
        mut events: EventStream,
        sink: mpsc::Sender<SseFrame>,
        timeout: Duration,
    ) -> StreamOutcome {
        let status = match tokio::time::timeout(timeout, self.pump(&mut events, &sink)).await {
            Ok(status) => status,
            Err(_) => {
                tracing::debug!(id = %self.context.id, "Stream deadline exceeded");
                StreamStatus::Cancelled
            }
        };
        drop(events);

        StreamOutcome {
            status,
            response: self.response(),
        }
    }

    async fn pump(
        &mut self,
        events: &mut EventStream,
        sink: &mpsc::Sender<SseFrame>,
    ) -> StreamStatus {
        loop {
            let next = tokio::select! {
                biased;
                () = sink.closed() => {
                    tracing::debug!(id = %self.context.id, "Client disconnected mid-stream");
                    return StreamStatus::Cancelled;
                }
                next = events.next() => next,
            };

            let result = match next {
                Some(event) => self.process_event(event),
                None => self.finish(),
            };
            let done = self.finished;

            match result {
                Ok(frames) => {
                    if !deliver(sink, frames).await {
                        return StreamStatus::Cancelled;
                    }
                    if done {
                        return StreamStatus::Completed;
                    }
                }
                Err(GatewayError::Cancelled) => {
                    tracing::debug!(id = %self.context.id, "Upstream stream cancelled");
                    return StreamStatus::Cancelled;
                }
                Err(err) => {
                    let error = err.to_api_error();
                    tracing::warn!(id = %self.context.id, error = %error, "Stream failed");
                    match self.fail(&error) {
                        Ok(frames) => {
                            deliver(sink, frames).await;
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to encode stream failure"),
                    }
                    return StreamStatus::Failed(error);
                }
            }
        }
    }
}

/// Push frames in order; `false` once the client is gone.
async fn deliver(sink: &mpsc::Sender<SseFrame>, frames: Vec<SseFrame>) -> bool {
    for frame in frames {
        if sink.send(frame).await.is_err() {
            return false;
        }
    }
    true
}
