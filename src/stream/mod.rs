//! Response-side pipeline: bytes -> text -> lines -> SSE events -> actions
//! -> coalesced token callbacks, driven by the controller's pump task.

pub mod coalesce;
pub mod controller;
pub mod decoder;
pub mod dispatch;
pub mod lines;
pub mod sink;
pub mod sse;

pub use coalesce::{TokenCoalescer, DEFAULT_COALESCE_INTERVAL};
pub use controller::{
    StreamHandle, StreamOptions, DEFAULT_ERROR_BODY_LIMIT, DEFAULT_ERROR_BODY_TIMEOUT,
};
pub use decoder::ByteDecoder;
pub use dispatch::{resolve, EventDispatcher};
pub use lines::LineReassembler;
pub use sink::{CallbackSink, ChatStream, StreamEvent, StreamOutcome, StreamSink, Transcript};
pub use sse::{
    data_sse_frame, named_sse_frame, sse_event_stream, LineOutcome, SseEventParser, SseSignal,
};
