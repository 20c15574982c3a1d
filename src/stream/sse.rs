//! Server-sent event framing, in both directions.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;

use crate::canonical::{CanonicalEvent, StreamError};
use crate::codec::{DecodedChunk, StreamDecoder};
use crate::error::Result;
use crate::taxonomy::ApiError;

/// One outbound SSE frame: an optional `event:` line and a `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Serialize `value` as the frame payload.
    pub fn json<T: Serialize>(event: Option<&str>, value: &T) -> Result<Self> {
        Ok(Self {
            event: event.map(String::from),
            data: serde_json::to_string(value)?,
        })
    }

    /// OpenAI's stream terminator
    pub fn done() -> Self {
        Self::data("[DONE]")
    }

    pub fn is_done(&self) -> bool {
        self.event.is_none() && self.data == "[DONE]"
    }

    /// Wire bytes, including the blank-line terminator.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(ref event) = self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }

    pub fn into_axum_event(self) -> axum::response::sse::Event {
        let event = axum::response::sse::Event::default().data(self.data);
        match self.event {
            Some(name) => event.event(name),
            None => event,
        }
    }
}

/// Parse an upstream SSE byte stream into canonical events.
///
/// Decoding stops at the format's terminal marker, at the first decode error
/// (surfaced as a failed event), or when the byte stream ends.
pub fn decode_sse<S, B, E>(
    byte_stream: S,
    mut decoder: Box<dyn StreamDecoder>,
) -> impl Stream<Item = CanonicalEvent> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let events = byte_stream.eventsource();
        tokio::pin!(events);

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream event stream interrupted");
                    yield CanonicalEvent::failed(StreamError::Upstream {
                        error: ApiError::server(format!("upstream stream interrupted: {e}")),
                    });
                    break;
                }
            };

            let name = match event.event.as_str() {
                "" | "message" => None,
                other => Some(other),
            };

            match decoder.decode_stream_chunk(name, &event.data) {
                Ok(DecodedChunk::Events(decoded)) => {
                    for canonical in decoded {
                        yield canonical;
                    }
                }
                Ok(DecodedChunk::Done) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to decode upstream chunk");
                    yield CanonicalEvent::failed(StreamError::Upstream {
                        error: ApiError::server(e.to_string()),
                    });
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_frame_bytes() {
        let frame = SseFrame::named("message_stop", r#"{"type":"message_stop"}"#);
        assert_eq!(
            frame.to_bytes(),
            Bytes::from("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n")
        );
    }

    #[test]
    fn test_done_frame() {
        let frame = SseFrame::done();
        assert!(frame.is_done());
        assert_eq!(frame.to_bytes(), Bytes::from("data: [DONE]\n\n"));
        assert!(!SseFrame::named("x", "[DONE]").is_done());
    }
}
