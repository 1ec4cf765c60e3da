use serde::Deserialize;

/// Event name carrying a literal text chunk.
pub const TOKEN_EVENT: &str = "token";
/// Event name marking the end of useful stream content.
pub const DONE_EVENT: &str = "done";

/// One semantic unit extracted from the wire.
///
/// `event_name` is `None` when the block had no `event:` line (legacy encoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub event_name: Option<String>,
    pub data: String,
}

impl ParsedEvent {
    #[must_use]
    pub fn named(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_name: Some(name.into()),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn bare(data: impl Into<String>) -> Self {
        Self {
            event_name: None,
            data: data.into(),
        }
    }
}

/// The two encodings the backend has shipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// `event: <name>` followed by `data: <payload>`.
    Named { name: String, payload: String },
    /// `data: <payload>` only; payload is normally a JSON envelope.
    Bare(String),
}

impl From<ParsedEvent> for WireEvent {
    fn from(event: ParsedEvent) -> Self {
        match event.event_name {
            Some(name) => WireEvent::Named {
                name,
                payload: event.data,
            },
            None => WireEvent::Bare(event.data),
        }
    }
}

/// Domain signal both encodings resolve to before any side effect happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    Token(String),
    Done(Option<i64>),
}

/// Payload of a `done` event.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DonePayload {
    #[serde(default)]
    pub(crate) conversation_id: Option<i64>,
}

/// Legacy `{ "event": ..., "data": ... }` envelope carried in a bare `data:` line.
#[derive(Debug, Deserialize)]
pub(crate) struct LegacyEnvelope {
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) data: Option<serde_json::Value>,
}
