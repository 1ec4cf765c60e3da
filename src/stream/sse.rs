//! SSE event parser, frame encoders, and the byte-stream adapter.
//!
//! Only the subset the chat backend emits is understood: `event:` and
//! `data:` fields, blank-line terminators, and the `done` terminal event.
//! `id:`, `retry:` and comments are skipped.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::decoder::ByteDecoder;
use super::lines::LineReassembler;
use crate::error::StreamError;
use crate::protocol::{ParsedEvent, DONE_EVENT};

// ---------------------------------------------------------------------------
// SseEventParser: line-level state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum ParserState {
    #[default]
    Idle,
    InEvent(String),
}

/// Result of feeding one reassembled line to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// A `data:` line produced an event; dispatch it now.
    Event(ParsedEvent),
    /// The block terminating a `done` event ended; stop processing.
    Terminal,
    /// Nothing to do for this line.
    Skip,
}

/// Groups lines into `(event-name, data)` pairs.
///
/// Events are emitted on their `data:` line rather than on the blank
/// terminator, since each block carries a single data line in practice. The
/// pending event name survives until the terminator, so extra `data:` lines
/// in the same block share it.
#[derive(Debug, Default)]
pub struct SseEventParser {
    state: ParserState,
    finished: bool,
}

impl SseEventParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminator of a `done` block has been seen.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Event name recorded by the current block's `event:` line.
    #[must_use]
    pub fn pending_event(&self) -> Option<&str> {
        match &self.state {
            ParserState::Idle => None,
            ParserState::InEvent(name) => Some(name),
        }
    }

    pub fn process_line(&mut self, line: &str) -> LineOutcome {
        if self.finished {
            return LineOutcome::Skip;
        }

        if line.is_empty() {
            let state = std::mem::take(&mut self.state);
            if matches!(&state, ParserState::InEvent(name) if name == DONE_EVENT) {
                self.finished = true;
                return LineOutcome::Terminal;
            }
            return LineOutcome::Skip;
        }

        if let Some(value) = line.strip_prefix("event:") {
            self.state = ParserState::InEvent(value.trim().to_string());
            return LineOutcome::Skip;
        }

        if let Some(value) = line.strip_prefix("data:") {
            // Strip exactly one space after the colon; the rest is payload.
            let value = value.strip_prefix(' ').unwrap_or(value);
            if value.trim().is_empty() {
                return LineOutcome::Skip;
            }
            return LineOutcome::Event(ParsedEvent {
                event_name: self.pending_event().map(str::to_string),
                data: value.to_string(),
            });
        }

        // Unknown field names are ignored for forward compatibility.
        LineOutcome::Skip
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Format a named SSE frame: `event: {name}\ndata: {data}\n\n`.
#[must_use]
pub fn named_sse_frame(name: &str, data: &str) -> String {
    let mut out = String::with_capacity(18 + name.len() + data.len());
    out.push_str("event: ");
    out.push_str(name);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(data);
    out.push_str("\n\n");
    out
}

/// Format a legacy data-only SSE frame: `data: {data}\n\n`.
#[must_use]
pub fn data_sse_frame(data: &str) -> String {
    let mut out = String::with_capacity(8 + data.len());
    out.push_str("data: ");
    out.push_str(data);
    out.push_str("\n\n");
    out
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Item produced by [`sse_event_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseSignal {
    Event(ParsedEvent),
    /// A `done` block was terminated; the stream yields nothing further.
    Terminal,
}

struct EventPipeline<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: ByteDecoder,
    lines: LineReassembler,
    parser: SseEventParser,
    pending: VecDeque<SseSignal>,
    text: String,
}

impl<S> EventPipeline<S> {
    fn feed(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        self.text.clear();
        self.decoder.decode_into(chunk, &mut self.text)?;
        self.lines.push(&self.text);

        while let Some(line) = self.lines.next_line() {
            match self.parser.process_line(line) {
                LineOutcome::Event(event) => self.pending.push_back(SseSignal::Event(event)),
                LineOutcome::Terminal => {
                    self.pending.push_back(SseSignal::Terminal);
                    break;
                }
                LineOutcome::Skip => {}
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        let cut_bytes = self.decoder.finish();
        let tail = self.lines.finish();
        if cut_bytes > 0 || tail.is_some() {
            tracing::warn!(
                tail_len = tail.as_ref().map_or(0, String::len),
                cut_bytes,
                "stream ended with an unterminated line; treating as end of stream"
            );
        }
    }
}

/// Turn a response byte stream into parsed SSE signals.
///
/// Bytes are decoded as UTF-8 across chunk boundaries, split into lines, and
/// run through [`SseEventParser`]. After [`SseSignal::Terminal`] the body is
/// not polled again. The first error ends the stream.
pub fn sse_event_stream<S>(byte_stream: S) -> impl Stream<Item = Result<SseSignal, StreamError>> + Send
where
    S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
{
    let pipeline = EventPipeline {
        body: Box::pin(byte_stream),
        decoder: ByteDecoder::new(),
        lines: LineReassembler::new(),
        parser: SseEventParser::new(),
        pending: VecDeque::with_capacity(8),
        text: String::new(),
    };

    futures_util::stream::unfold(Some(pipeline), |state| async move {
        let mut pipeline = state?;
        loop {
            if let Some(signal) = pipeline.pending.pop_front() {
                return Some((Ok(signal), Some(pipeline)));
            }
            if pipeline.parser.is_finished() {
                return None;
            }

            match pipeline.body.as_mut().next().await {
                Some(Ok(chunk)) => {
                    if let Err(err) = pipeline.feed(&chunk) {
                        return Some((Err(err), None));
                    }
                }
                Some(Err(err)) => return Some((Err(err), None)),
                None => {
                    pipeline.finish();
                    return None;
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
