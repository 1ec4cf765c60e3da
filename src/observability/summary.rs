use std::time::Duration;

use tracing::info;

use crate::state::StreamState;

/// Counters collected by the pump over one stream.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub state: StreamState,
    pub token_events: u64,
    pub ignored_events: u64,
    pub flushes: u64,
    pub emitted_bytes: usize,
    pub elapsed: Duration,
}

impl StreamSummary {
    /// Rough model-token estimate of the delivered text (`bytes / 4`).
    #[must_use]
    pub fn estimated_tokens(&self) -> u64 {
        (self.emitted_bytes as u64).div_ceil(4)
    }

    /// Average token events merged into each delivered chunk.
    #[must_use]
    pub fn coalesce_ratio(&self) -> f64 {
        if self.flushes == 0 {
            return 0.0;
        }
        self.token_events as f64 / self.flushes as f64
    }
}

/// Log one line per finished stream at INFO level.
pub fn log_stream_summary(summary: &StreamSummary) {
    info!(
        state = summary.state.as_str(),
        token_events = summary.token_events,
        ignored_events = summary.ignored_events,
        flushes = summary.flushes,
        coalesce_ratio = summary.coalesce_ratio(),
        emitted_bytes = summary.emitted_bytes,
        estimated_tokens = summary.estimated_tokens(),
        duration_seconds = summary.elapsed.as_secs_f64(),
        "stream finished"
    );
}
