use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::coalesce::{TokenCoalescer, DEFAULT_COALESCE_INTERVAL};
use super::dispatch::EventDispatcher;
use super::sink::StreamSink;
use super::sse::{sse_event_stream, SseSignal};
use crate::error::{upstream_error_message, StreamError};
use crate::observability::{log_stream_summary, StreamSummary};
use crate::protocol::StreamAction;
use crate::state::{Lifecycle, StreamState};
use crate::transport::{ByteStream, Transport, TransportRequest};

/// Default cap on how much of a non-success body is read for the error message.
pub const DEFAULT_ERROR_BODY_LIMIT: usize = 64 * 1024;
/// Default time allowed for reading a non-success body.
pub const DEFAULT_ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for one stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub coalesce_interval: Duration,
    pub error_body_limit: usize,
    pub error_body_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            coalesce_interval: DEFAULT_COALESCE_INTERVAL,
            error_body_limit: DEFAULT_ERROR_BODY_LIMIT,
            error_body_timeout: DEFAULT_ERROR_BODY_TIMEOUT,
        }
    }
}

/// Cancellation capability for a running stream.
///
/// Cloning is cheap; every clone controls the same stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    id: uuid::Uuid,
    token: CancellationToken,
    lifecycle: Arc<Lifecycle>,
}

impl StreamHandle {
    pub(crate) fn new(id: uuid::Uuid) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            lifecycle: Arc::new(Lifecycle::new(StreamState::Starting)),
        }
    }

    /// Handle for a stream that ended before it started.
    pub(crate) fn finished(id: uuid::Uuid, state: StreamState) -> Self {
        debug_assert!(state.is_terminal());
        Self {
            id,
            token: CancellationToken::new(),
            lifecycle: Arc::new(Lifecycle::new(state)),
        }
    }

    /// Stop the stream. No callback fires afterwards and the connection is
    /// released. Safe to call repeatedly; does nothing once the stream has
    /// completed or failed.
    pub fn cancel(&self) {
        if self.lifecycle.finish(StreamState::Cancelled) {
            tracing::debug!(stream_id = %self.id, "stream cancelled");
            self.token.cancel();
        }
    }

    /// Current lifecycle state.
    ///
    /// The state turns terminal before the sink's `on_complete` or `on_error`
    /// runs, so on a multi-threaded runtime a finished state does not mean the
    /// terminal callback has returned yet. Wait on the sink for that.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.lifecycle.load()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == StreamState::Cancelled
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    #[must_use]
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }
}

/// Report a failure that happened before any network call.
pub(crate) fn reject<S: StreamSink>(mut sink: S, id: uuid::Uuid, error: StreamError) -> StreamHandle {
    tracing::debug!(stream_id = %id, error = %error, "stream rejected before start");
    sink.on_error(error);
    StreamHandle::finished(id, StreamState::Errored)
}

/// Start the pump for `request` on the current Tokio runtime.
///
/// Without a runtime the sink receives a [`StreamError::Config`] and the
/// returned handle is already finished.
pub(crate) fn spawn_stream<T, S>(
    transport: Arc<T>,
    request: TransportRequest,
    options: StreamOptions,
    sink: S,
    id: uuid::Uuid,
) -> StreamHandle
where
    T: Transport,
    S: StreamSink,
{
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            return reject(
                sink,
                id,
                StreamError::Config("stream started outside a Tokio runtime".to_string()),
            );
        }
    };

    let handle = StreamHandle::new(id);
    let pump = Pump {
        emitter: Emitter {
            sink,
            lifecycle: Arc::clone(&handle.lifecycle),
            emitted_bytes: 0,
        },
        cancel: handle.token.clone(),
        coalescer: TokenCoalescer::new(options.coalesce_interval),
        dispatcher: EventDispatcher::new(),
        error_body_limit: options.error_body_limit,
        error_body_timeout: options.error_body_timeout,
    };
    let span = tracing::info_span!("chat_stream", stream_id = %id);
    runtime.spawn(pump.run(transport, request).instrument(span));
    handle
}

/// Routes output to the sink, gated on the shared lifecycle.
struct Emitter<S> {
    sink: S,
    lifecycle: Arc<Lifecycle>,
    emitted_bytes: usize,
}

impl<S: StreamSink> Emitter<S> {
    fn token(&mut self, text: &str) {
        if self.lifecycle.load().is_terminal() {
            return;
        }
        self.emitted_bytes += text.len();
        self.sink.on_token(text);
    }

    fn complete(&mut self, conversation_id: Option<i64>) {
        if self.lifecycle.finish(StreamState::Completed) {
            self.sink.on_complete(conversation_id);
        }
    }

    fn fail(&mut self, error: StreamError) {
        if self.lifecycle.finish(StreamState::Errored) {
            self.sink.on_error(error);
        }
    }
}

enum Outcome {
    Completed(Option<i64>),
    Failed(StreamError),
    Cancelled,
}

struct Pump<S> {
    emitter: Emitter<S>,
    cancel: CancellationToken,
    coalescer: TokenCoalescer,
    dispatcher: EventDispatcher,
    error_body_limit: usize,
    error_body_timeout: Duration,
}

impl<S: StreamSink> Pump<S> {
    async fn run<T: Transport>(mut self, transport: Arc<T>, request: TransportRequest) {
        let started = std::time::Instant::now();
        let outcome = self.drive(transport.as_ref(), request).await;

        // The body is dropped by now; pending text goes out before the terminal callback.
        match outcome {
            Outcome::Completed(conversation_id) => {
                self.flush_pending();
                self.emitter.complete(conversation_id);
            }
            Outcome::Failed(error) => {
                self.flush_pending();
                tracing::warn!(error = %error, category = ?error.category(), "stream failed");
                self.emitter.fail(error);
            }
            Outcome::Cancelled => {}
        }

        log_stream_summary(&StreamSummary {
            state: self.emitter.lifecycle.load(),
            token_events: self.dispatcher.tokens(),
            ignored_events: self.dispatcher.ignored(),
            flushes: self.coalescer.flush_count(),
            emitted_bytes: self.emitter.emitted_bytes,
            elapsed: started.elapsed(),
        });
    }

    async fn drive<T: Transport>(&mut self, transport: &T, request: TransportRequest) -> Outcome {
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Outcome::Cancelled,
            result = transport.post_stream(request) => result,
        };
        let response = match response {
            Ok(response) => response,
            Err(error) => return Outcome::Failed(error),
        };

        let status = response.status;
        if !status.is_success() {
            let body = match response.body {
                Some(body) => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Outcome::Cancelled,
                    body = read_error_body(body, self.error_body_limit, self.error_body_timeout) => body,
                },
                None => Vec::new(),
            };
            return Outcome::Failed(StreamError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(status, &body),
            });
        }

        let Some(body) = response.body else {
            return Outcome::Failed(StreamError::Upstream {
                status: status.as_u16(),
                message: "No response body".to_string(),
            });
        };

        if !self.emitter.lifecycle.begin_streaming() {
            return Outcome::Cancelled;
        }
        tracing::debug!(status = status.as_u16(), "stream open");

        let mut events = std::pin::pin!(sse_event_stream(body));
        loop {
            let deadline = self.coalescer.deadline();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Outcome::Cancelled,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_pending();
                }
                next = events.next() => match next {
                    Some(Ok(SseSignal::Event(event))) => match self.dispatcher.dispatch(event) {
                        Some(StreamAction::Token(text)) => {
                            self.coalescer.append(&text, Instant::now());
                        }
                        Some(StreamAction::Done(conversation_id)) => {
                            return Outcome::Completed(conversation_id);
                        }
                        None => {}
                    },
                    Some(Ok(SseSignal::Terminal)) | None => return Outcome::Completed(None),
                    Some(Err(error)) => return Outcome::Failed(error),
                },
            }
        }
    }

    fn flush_pending(&mut self) {
        if let Some(text) = self.coalescer.flush() {
            self.emitter.token(&text);
        }
    }
}

/// Read up to `limit` bytes of an error body within `timeout`. A read failure
/// or an expired timeout ends the read with whatever arrived so far.
async fn read_error_body(mut body: ByteStream, limit: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < limit {
        match tokio::time::timeout_at(deadline, body.next()).await {
            Ok(Some(Ok(chunk))) => {
                let take = chunk.len().min(limit - out.len());
                out.extend_from_slice(&chunk[..take]);
            }
            Ok(Some(Err(error))) => {
                tracing::debug!(error = %error, "error body read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(read_bytes = out.len(), "error body read timed out");
                break;
            }
        }
    }
    out
}
