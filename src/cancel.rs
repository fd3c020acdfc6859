//! Generation-token cancellation for foreground fetches.
//!
//! There is no in-flight network cancellation. A foreground load instead
//! snapshots the current generation; starting a newer load bumps the counter,
//! and every continuation of the older load checks its token before mutating
//! shared state and drops silently when stale. Background orchestration
//! deliberately does not participate in this scheme.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of foreground-fetch generations.
#[derive(Debug, Default, Clone)]
pub struct CancelSource {
    current: Arc<AtomicU64>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new generation, invalidating every previously issued token.
    pub fn begin(&self) -> CancelToken {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        CancelToken {
            generation,
            current: self.current.clone(),
        }
    }
}

/// Snapshot of one generation, checked at continuation boundaries.
#[derive(Debug, Clone)]
pub struct CancelToken {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl CancelToken {
    /// True once a newer generation has been started.
    pub fn is_cancelled(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.generation
    }
}
