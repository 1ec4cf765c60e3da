use std::sync::atomic::{AtomicU64, Ordering};

/// Per-client stream id source: a random seed mixed with a counter.
#[derive(Debug)]
pub(crate) struct StreamIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl StreamIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub(crate) fn next_id(&self) -> uuid::Uuid {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }
}
