mod stream_id;

use std::sync::atomic::{AtomicU8, Ordering};

pub(crate) use stream_id::StreamIdGenerator;

/// Lifecycle of one stream. `Completed`, `Errored` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamState {
    Starting = 0,
    Streaming = 1,
    Completed = 2,
    Errored = 3,
    Cancelled = 4,
}

impl StreamState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Errored | StreamState::Cancelled
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Starting => "starting",
            StreamState::Streaming => "streaming",
            StreamState::Completed => "completed",
            StreamState::Errored => "errored",
            StreamState::Cancelled => "cancelled",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Starting,
            1 => StreamState::Streaming,
            2 => StreamState::Completed,
            3 => StreamState::Errored,
            _ => StreamState::Cancelled,
        }
    }
}

/// Lifecycle cell shared between the pump task and every handle.
///
/// Transitions into a terminal state go through compare-and-swap, so exactly
/// one of complete / error / cancel wins.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub(crate) fn new(initial: StreamState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
        }
    }

    pub(crate) fn load(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Starting -> Streaming`; false if the stream already ended.
    pub(crate) fn begin_streaming(&self) -> bool {
        self.state
            .compare_exchange(
                StreamState::Starting as u8,
                StreamState::Streaming as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `target` unless a terminal state was already reached.
    pub(crate) fn finish(&self, target: StreamState) -> bool {
        debug_assert!(target.is_terminal());
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if StreamState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
