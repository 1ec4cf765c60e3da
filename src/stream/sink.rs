use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::controller::StreamHandle;
use crate::error::StreamError;
use crate::state::StreamState;

/// Receiver of one stream's callbacks.
///
/// `on_token` may be called any number of times; afterwards exactly one of
/// `on_complete` or `on_error` is called, unless the stream was cancelled,
/// in which case neither is.
pub trait StreamSink: Send + 'static {
    fn on_token(&mut self, text: &str);
    fn on_error(&mut self, error: StreamError);
    fn on_complete(&mut self, conversation_id: Option<i64>);
}

type TokenFn = Box<dyn FnMut(&str) + Send>;
type ErrorFn = Box<dyn FnOnce(StreamError) + Send>;
type CompleteFn = Box<dyn FnOnce(Option<i64>) + Send>;

/// [`StreamSink`] assembled from closures. The error and completion
/// callbacks are optional.
pub struct CallbackSink {
    token: TokenFn,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl CallbackSink {
    pub fn new(on_token: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            token: Box::new(on_token),
            error: None,
            complete: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, on_error: impl FnOnce(StreamError) + Send + 'static) -> Self {
        self.error = Some(Box::new(on_error));
        self
    }

    #[must_use]
    pub fn with_complete(mut self, on_complete: impl FnOnce(Option<i64>) + Send + 'static) -> Self {
        self.complete = Some(Box::new(on_complete));
        self
    }
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("has_error", &self.error.is_some())
            .field("has_complete", &self.complete.is_some())
            .finish_non_exhaustive()
    }
}

impl StreamSink for CallbackSink {
    fn on_token(&mut self, text: &str) {
        (self.token)(text);
    }

    fn on_error(&mut self, error: StreamError) {
        match self.error.take() {
            Some(callback) => callback(error),
            None => tracing::debug!(error = %error, "stream failed with no error callback"),
        }
    }

    fn on_complete(&mut self, conversation_id: Option<i64>) {
        if let Some(callback) = self.complete.take() {
            callback(conversation_id);
        }
    }
}

/// One item of a [`ChatStream`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(String),
    Complete { conversation_id: Option<i64> },
    Error(StreamError),
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token(_))
    }
}

/// Sink that forwards every callback into a channel.
#[derive(Debug)]
pub(crate) struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: StreamEvent) {
        // Receiver gone means the ChatStream was dropped, which also cancels.
        let _ = self.tx.send(event);
    }
}

impl StreamSink for ChannelSink {
    fn on_token(&mut self, text: &str) {
        self.send(StreamEvent::Token(text.to_string()));
    }

    fn on_error(&mut self, error: StreamError) {
        self.send(StreamEvent::Error(error));
    }

    fn on_complete(&mut self, conversation_id: Option<i64>) {
        self.send(StreamEvent::Complete { conversation_id });
    }
}

/// How a drained stream ended.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    Completed { conversation_id: Option<i64> },
    Failed(StreamError),
    Cancelled,
}

/// Result of [`ChatStream::collect_text`].
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    /// Number of coalesced chunks the text arrived in.
    pub token_chunks: usize,
    pub outcome: StreamOutcome,
}

/// A running chat stream as a [`Stream`] of [`StreamEvent`]s.
///
/// Yields tokens, then exactly one terminal event, then `None`. Once the
/// stream is cancelled it yields `None` immediately, including for events
/// that were already queued. Dropping it cancels the stream.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    handle: StreamHandle,
    done: bool,
}

impl ChatStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StreamEvent>, handle: StreamHandle) -> Self {
        Self {
            rx,
            handle,
            done: false,
        }
    }

    /// Cancellation handle; clones can be moved to other tasks.
    #[must_use]
    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    #[must_use]
    pub fn stream_id(&self) -> uuid::Uuid {
        self.handle.id()
    }

    /// Drain the stream, concatenating every token.
    pub async fn collect_text(mut self) -> Transcript {
        let mut text = String::new();
        let mut token_chunks = 0;
        let mut outcome = StreamOutcome::Cancelled;

        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Token(chunk) => {
                    text.push_str(&chunk);
                    token_chunks += 1;
                }
                StreamEvent::Complete { conversation_id } => {
                    outcome = StreamOutcome::Completed { conversation_id };
                }
                StreamEvent::Error(err) => outcome = StreamOutcome::Failed(err),
            }
        }

        Transcript {
            text,
            token_chunks,
            outcome,
        }
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        if self.done || self.handle.state() == StreamState::Cancelled {
            self.done = true;
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.done = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
