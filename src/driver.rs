//! Completion driver.
//!
//! Runs a model once for the final user turn and normalizes whatever the
//! backend returns (a fragment stream or a whole text) into one ordered
//! sequence of [`DriverEvent`]s.
//!
//! Backend output is pulled by a producer task and handed over through a
//! bounded channel, so a slow client slows the backend down instead of
//! buffering the completion. Dropping the [`CompletionStream`] cancels the
//! producer, which drops the backend stream with it.
//!
//! A completion only ends cleanly after the backend reports `Done`. If the
//! producer goes away first (a backend stream that ends early or panics),
//! the stream yields a final `Backend` error instead of just ending.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{ready, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::api::types::Usage;
use crate::backend::types::{BackendEvent, Completion, ConversationRequest, FragmentStream};
use crate::backend::Model;
use crate::conversation::Conversation;
use crate::error::{RelayError, Result};

/// One item of a normalized completion.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Fragment(String),
    Done(Usage),
}

impl From<BackendEvent> for DriverEvent {
    fn from(event: BackendEvent) -> Self {
        match event {
            BackendEvent::Fragment(text) => DriverEvent::Fragment(text),
            BackendEvent::Done(usage) => DriverEvent::Done(usage),
        }
    }
}

/// Parameters for a single driver run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub history: Conversation,
    pub prompt: String,
    pub system_override: Option<String>,
    pub streaming: bool,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct CompletionDriver {
    channel_capacity: usize,
}

impl CompletionDriver {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Invoke `model` once and start forwarding its output.
    ///
    /// Errors raised while invoking the backend are returned here; errors
    /// raised later arrive as the final item of the returned stream.
    /// Cancelling `cancel`, or dropping the stream, stops the producer.
    pub async fn run(
        &self,
        model: Arc<dyn Model>,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream> {
        // Dropping the stream cancels only this run, never the caller's token.
        let cancel = cancel.child_token();
        let backend_request = ConversationRequest {
            history: request.history,
            prompt: request.prompt,
            system: request.system_override,
            stream: request.streaming,
            temperature: request.temperature,
        };

        let completion = model
            .run_conversation(backend_request, cancel.clone())
            .await
            .map_err(|e| match e {
                RelayError::Backend(_) => e,
                other => RelayError::Backend(other.to_string()),
            })?;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let model_id = model.id().to_string();

        match completion {
            Completion::Whole { text, usage } => {
                // Capacity is at least one, so the first send never waits.
                tokio::spawn(async move {
                    if tx.send(Ok(DriverEvent::Fragment(text))).await.is_ok() {
                        let _ = tx.send(Ok(DriverEvent::Done(usage))).await;
                    }
                });
            }
            Completion::Streaming(stream) => {
                tokio::spawn(forward(stream, tx, cancel.clone(), model_id));
            }
        }

        Ok(CompletionStream {
            events: ReceiverStream::new(rx),
            model_id: model.id().to_string(),
            completed: false,
            closed: false,
            _guard: cancel.drop_guard(),
        })
    }
}

/// Pull backend events into `tx` until the stream ends, the consumer goes
/// away, or `cancel` fires.
async fn forward(
    mut stream: FragmentStream,
    tx: mpsc::Sender<Result<DriverEvent>>,
    cancel: CancellationToken,
    model_id: String,
) {
    let mut fragments = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(model = %model_id, fragments, "completion cancelled");
                break;
            }
            next = stream.next() => next,
        };

        let Some(item) = next else {
            break;
        };
        let is_err = item.is_err();
        if matches!(item, Ok(BackendEvent::Fragment(_))) {
            fragments += 1;
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = tx.send(item.map(DriverEvent::from)) => res.is_ok(),
        };
        if !sent {
            tracing::debug!(model = %model_id, fragments, "consumer gone, stopping backend stream");
            break;
        }
        if is_err {
            break;
        }
    }
    // `stream` drops here, releasing the backend's streaming resources.
}

/// Ordered, single-pass stream of driver events for one completion.
pub struct CompletionStream {
    events: ReceiverStream<Result<DriverEvent>>,
    model_id: String,
    /// `Done` has been received.
    completed: bool,
    /// Nothing more is yielded after an error.
    closed: bool,
    _guard: DropGuard,
}

impl CompletionStream {
    /// Drain the stream into the full text and its usage.
    pub async fn collect_text(mut self) -> Result<(String, Usage)> {
        let mut text = String::new();
        let mut usage = Usage::default();
        while let Some(event) = self.next().await {
            match event? {
                DriverEvent::Fragment(fragment) => text.push_str(&fragment),
                DriverEvent::Done(u) => usage = u,
            }
        }
        Ok((text, usage))
    }
}

impl Stream for CompletionStream {
    type Item = Result<DriverEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        let next = ready!(Pin::new(&mut self.events).poll_next(cx));
        let item = match next {
            Some(Ok(DriverEvent::Done(usage))) => {
                self.completed = true;
                Some(Ok(DriverEvent::Done(usage)))
            }
            Some(Err(e)) => {
                self.closed = true;
                Some(Err(e))
            }
            Some(event) => Some(event),
            None if self.completed => None,
            None => {
                self.closed = true;
                tracing::warn!(model = %self.model_id, "backend stream ended before completion");
                Some(Err(RelayError::Backend(
                    "backend stream ended before completion".to_string(),
                )))
            }
        };
        Poll::Ready(item)
    }
}
