use crate::protocol::event::{DonePayload, LegacyEnvelope};
use crate::protocol::{ParsedEvent, StreamAction, WireEvent, DONE_EVENT, TOKEN_EVENT};

/// Resolve one wire event to the action it requests.
///
/// Both encodings end up here:
///
/// | event            | payload                          | action                 |
/// |------------------|----------------------------------|------------------------|
/// | `token`          | raw text                         | `Token(text)`          |
/// | `done`           | `{conversation_id?}` or garbage  | `Done(id or None)`     |
/// | none             | `{event: "token", data}`         | `Token(data)`          |
/// | none             | `{event: "done", data}`          | `Done(data.conversation_id)` |
/// | none             | not JSON                         | `Token(raw payload)`   |
///
/// Malformed completion metadata never fails the stream; it resolves to
/// `Done(None)`. Anything else (unknown names, unrecognized JSON) is ignored.
#[must_use]
pub fn resolve(event: WireEvent) -> Option<StreamAction> {
    match event {
        WireEvent::Named { name, payload } => match name.as_str() {
            TOKEN_EVENT => Some(StreamAction::Token(payload)),
            DONE_EVENT => Some(StreamAction::Done(conversation_id_from_done(&payload))),
            other => {
                tracing::debug!(event = other, "ignoring unknown stream event");
                None
            }
        },
        WireEvent::Bare(payload) => resolve_bare(payload),
    }
}

fn conversation_id_from_done(payload: &str) -> Option<i64> {
    match serde_json::from_str::<DonePayload>(payload) {
        Ok(done) => done.conversation_id,
        Err(err) => {
            tracing::debug!(error = %err, "unparsable done payload; completing without conversation id");
            None
        }
    }
}

fn resolve_bare(payload: String) -> Option<StreamAction> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
        // Not JSON at all: the oldest backends sent plain text chunks.
        return Some(StreamAction::Token(payload));
    };

    let envelope = match serde_json::from_value::<LegacyEnvelope>(value) {
        Ok(envelope) => envelope,
        Err(_) => {
            tracing::debug!("ignoring bare JSON event without an event envelope");
            return None;
        }
    };

    match envelope.event.as_str() {
        TOKEN_EVENT => match envelope.data? {
            serde_json::Value::String(text) => Some(StreamAction::Token(text)),
            serde_json::Value::Null => None,
            other => Some(StreamAction::Token(other.to_string())),
        },
        DONE_EVENT => {
            let conversation_id = envelope
                .data
                .and_then(|data| serde_json::from_value::<DonePayload>(data).ok())
                .and_then(|done| done.conversation_id);
            Some(StreamAction::Done(conversation_id))
        }
        other => {
            tracing::debug!(event = other, "ignoring unknown legacy stream event");
            None
        }
    }
}

/// Stateful wrapper around [`resolve`] that keeps per-stream counters.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    tokens: u64,
    ignored: u64,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, event: ParsedEvent) -> Option<StreamAction> {
        let action = resolve(WireEvent::from(event));
        match &action {
            Some(StreamAction::Token(_)) => self.tokens += 1,
            Some(StreamAction::Done(_)) => {}
            None => self.ignored += 1,
        }
        action
    }

    /// Token events seen so far.
    #[must_use]
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Events that resolved to no action.
    #[must_use]
    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}
