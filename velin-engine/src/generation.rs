//! Generation tracking
//!
//! A single atomic counter identifies the "current" document state. Every
//! render task carries the generation it was scheduled under, and workers
//! compare it against the tracker before and after executing. This replaces
//! the reentrancy flags of older designs: newer work proceeds while only
//! genuinely stale work is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use velin_types::Generation;

/// Monotonically increasing generation counter
///
/// `next()` is called exactly once per accepted edit batch. Values are never
/// reused within a session. Staleness checks read the counter without
/// locking; they are advisory fast-paths, the cache's content-hash keying is
/// the actual safety net.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    current: AtomicU64,
}

impl GenerationTracker {
    pub fn new() -> Self {
        GenerationTracker {
            current: AtomicU64::new(0),
        }
    }

    /// Advance to and return the next generation
    pub fn next(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently issued generation
    pub fn current(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    /// Whether `generation` is still the current one
    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.current()
    }
}
