use std::time::Duration;

use tokio::time::Instant;

/// Flush delay used by the chat UI's typewriter effect.
pub const DEFAULT_COALESCE_INTERVAL: Duration = Duration::from_millis(30);

/// Buffers token text and releases it at a bounded rate.
///
/// The first `append` after a flush schedules the next flush `interval`
/// later; appends before that deadline only grow the buffer. Text is never
/// reordered or dropped, only merged.
#[derive(Debug)]
pub struct TokenCoalescer {
    buffer: String,
    interval: Duration,
    deadline: Option<Instant>,
    flushes: u64,
}

impl TokenCoalescer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            buffer: String::new(),
            interval,
            deadline: None,
            flushes: 0,
        }
    }

    /// Buffer `text`; returns `true` if this call scheduled a flush.
    pub fn append(&mut self, text: &str, now: Instant) -> bool {
        if text.is_empty() {
            return false;
        }
        self.buffer.push_str(text);
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.interval);
        true
    }

    /// When the scheduled flush is due, if one is scheduled.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the whole buffer and clear the schedule. `None` when empty.
    pub fn flush(&mut self) -> Option<String> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        self.flushes += 1;
        Some(std::mem::take(&mut self.buffer))
    }

    /// Bytes waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for TokenCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_COALESCE_INTERVAL)
    }
}
