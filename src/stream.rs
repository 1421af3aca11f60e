//! Canonical stream surface shared by every provider.
//!
//! A [`StreamHandle`] is what callers get back from
//! [`crate::dispatch::stream`]: a single-consumer, push-driven sequence of
//! [`StreamEvent`]s plus a [`result`](StreamHandle::result) operation that
//! drains the sequence and yields the final [`AssistantMessage`]. Adapters
//! hold the matching [`StreamSender`] and feed it from their own decoding
//! task.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::LLMError;
use crate::types::{AssistantMessage, StreamEvent};

/// Capacity of the event channel. The contract only requires one unread
/// event; a small buffer lets the producer run slightly ahead of a slow
/// consumer without unbounded memory.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Creates a connected sender/handle pair.
///
/// Adapters call this, move the [`StreamSender`] into their decoding task,
/// and return the [`StreamHandle`] to the dispatcher.
pub fn stream_channel() -> (StreamSender, StreamHandle) {
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (result_tx, result_rx) = oneshot::channel();
    (
        StreamSender {
            events: events_tx,
            result: result_tx,
        },
        StreamHandle {
            events: events_rx,
            result: result_rx,
        },
    )
}

/// Producer half owned by the vendor adapter's decoding task.
pub struct StreamSender {
    events: mpsc::Sender<StreamEvent>,
    result: oneshot::Sender<Result<AssistantMessage, LLMError>>,
}

impl StreamSender {
    /// Pushes one canonical event to the consumer.
    ///
    /// Returns `false` when the consumer dropped its handle; producers should
    /// stop decoding at that point since nobody is listening.
    pub async fn send(&self, event: StreamEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Settles the terminal outcome and closes the event channel.
    ///
    /// Must be called exactly once, after the terminal event has been sent.
    pub fn finish(self, result: Result<AssistantMessage, LLMError>) {
        // Dropping `events` closes the channel; an unreceived result just
        // means the consumer went away first.
        let _ = self.result.send(result);
    }
}

/// Consumer half returned to the caller.
///
/// Implements [`Stream`], so events can be read with
/// [`StreamExt::next`](futures_util::StreamExt::next); or skip the events
/// entirely and call [`result`](StreamHandle::result).
///
/// # Examples
///
/// ```no_run
/// # use futures_util::StreamExt;
/// # use tsunagi_llm::stream::StreamHandle;
/// # use tsunagi_llm::types::StreamEvent;
/// # async fn consume(mut handle: StreamHandle) {
/// while let Some(event) = handle.next().await {
///     if let StreamEvent::TextDelta { delta, .. } = event {
///         print!("{delta}");
///     }
/// }
/// # }
/// ```
pub struct StreamHandle {
    events: mpsc::Receiver<StreamEvent>,
    result: oneshot::Receiver<Result<AssistantMessage, LLMError>>,
}

impl StreamHandle {
    /// Drains any remaining events, then resolves to the final message or
    /// rejects with the terminal error.
    ///
    /// By contract the event sequence is fully consumed before the result is
    /// read, so calling this without touching the events is equivalent to a
    /// blocking completion.
    pub async fn result(mut self) -> Result<AssistantMessage, LLMError> {
        while self.next().await.is_some() {}
        match self.result.await {
            Ok(outcome) => outcome,
            // The producer dropped without settling: a bug in the adapter or
            // a task panic. Surface it as a stream failure.
            Err(_) => Err(LLMError::stream("stream ended without a terminal event")),
        }
    }
}

impl Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InputModality, Model, ModelCost, StopReason};

    fn sample_model() -> Model {
        Model {
            id: "m1".to_string(),
            name: "Model One".to_string(),
            api: "x-messages".to_string(),
            provider: "x".to_string(),
            base_url: String::new(),
            reasoning: false,
            input: vec![InputModality::Text],
            cost: ModelCost::default(),
            context_window: 1000,
            max_tokens: 100,
        }
    }

    fn finished_message() -> AssistantMessage {
        let mut message = AssistantMessage::new(&sample_model());
        message.stop_reason = Some(StopReason::Stop);
        message
    }

    #[tokio::test]
    async fn events_arrive_in_order_then_result_resolves() {
        let (sender, mut handle) = stream_channel();
        let message = finished_message();

        let producer = tokio::spawn(async move {
            sender
                .send(StreamEvent::TextStart { content_index: 0 })
                .await;
            sender
                .send(StreamEvent::TextDelta {
                    content_index: 0,
                    delta: "hi".to_string(),
                })
                .await;
            sender
                .send(StreamEvent::Done {
                    reason: StopReason::Stop,
                    message: message.clone(),
                })
                .await;
            sender.finish(Ok(message));
        });

        let first = handle.next().await.expect("first event");
        assert!(matches!(first, StreamEvent::TextStart { content_index: 0 }));

        let result = handle.result().await.expect("result");
        assert_eq!(result.model, "m1");
        producer.await.expect("producer task");
    }

    #[tokio::test]
    async fn result_without_consuming_events_drains_them() {
        let (sender, handle) = stream_channel();
        let message = finished_message();

        tokio::spawn(async move {
            for _ in 0..5 {
                sender
                    .send(StreamEvent::TextDelta {
                        content_index: 0,
                        delta: "x".to_string(),
                    })
                    .await;
            }
            sender.finish(Ok(message));
        });

        let result = handle.result().await.expect("result");
        assert_eq!(result.provider, "x");
    }

    #[tokio::test]
    async fn dropped_sender_without_finish_is_a_stream_error() {
        let (sender, handle) = stream_channel();
        drop(sender);
        let err = handle.result().await.expect_err("must fail");
        assert!(matches!(err, LLMError::Stream { .. }));
    }

    #[tokio::test]
    async fn send_reports_consumer_gone() {
        let (sender, handle) = stream_channel();
        drop(handle);
        let delivered = sender
            .send(StreamEvent::TextStart { content_index: 0 })
            .await;
        assert!(!delivered);
    }
}
