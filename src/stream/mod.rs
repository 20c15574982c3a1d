//! Streaming: SSE framing and the event translator.

pub mod sse;
pub mod translator;

use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tokio_stream::wrappers::ReceiverStream;

use crate::canonical::{CanonicalEvent, CanonicalResponse};
use crate::taxonomy::ApiError;

pub use sse::{decode_sse, SseFrame};
pub use translator::StreamTranslator;

/// Ordered canonical events from a provider. Dropping it releases the
/// upstream connection.
pub type EventStream = Pin<Box<dyn Stream<Item = CanonicalEvent> + Send>>;

/// Move `events` onto its own task behind a one-slot channel.
///
/// The producer waits until the consumer has taken the previous event, and
/// stops (dropping the upstream source) as soon as the receiver is dropped.
pub fn spawn_bounded<S>(events: S) -> EventStream
where
    S: Stream<Item = CanonicalEvent> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    tokio::spawn(async move {
        tokio::pin!(events);
        loop {
            let next = tokio::select! {
                biased;
                () = tx.closed() => break,
                next = events.next() => next,
            };
            match next {
                Some(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// How a translated stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    /// Upstream finished and the terminal marker was written
    Completed,
    /// Upstream or translation failed mid-stream
    Failed(ApiError),
    /// Client went away or the deadline passed; nothing more was written
    Cancelled,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Final state of a translated stream, for persistence.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub status: StreamStatus,
    /// Everything accumulated up to the point the stream ended
    pub response: CanonicalResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_bounded_preserves_order() {
        let source = futures::stream::iter(vec![
            CanonicalEvent::content("a"),
            CanonicalEvent::content("b"),
            CanonicalEvent::content("c"),
        ]);
        let collected: Vec<String> = spawn_bounded(source)
            .filter_map(|e| async move { e.content_delta })
            .collect()
            .await;
        assert_eq!(collected, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_spawn_bounded_stops_when_receiver_dropped() {
        let (polled_tx, mut polled_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let source = futures::stream::unfold(polled_tx, |tx| async move {
            tx.send(()).ok()?;
            Some((CanonicalEvent::content("x"), tx))
        });

        let mut events = spawn_bounded(source);
        assert!(events.next().await.is_some());
        drop(events);

        // The producer notices the closed channel and drops the source,
        // which closes the polled channel.
        let mut produced = 0;
        while polled_rx.recv().await.is_some() {
            produced += 1;
            assert!(produced < 10, "producer kept running after receiver dropped");
        }
    }
}
