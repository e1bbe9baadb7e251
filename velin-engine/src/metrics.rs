//! Engine metrics
//!
//! Lightweight in-process counters for render pipeline behavior: how often
//! passes run, how much scheduled work was shed or discarded as stale, and
//! how the cache is performing. Counters are relaxed atomics; snapshots are
//! cheap and safe to take from any thread.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one engine instance
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Segmentation + scheduling passes triggered by the debouncer
    pub passes: AtomicU64,

    /// Render tasks handed to the worker pool
    pub tasks_submitted: AtomicU64,

    /// Render tasks that invoked the render backend
    pub tasks_executed: AtomicU64,

    /// Tasks discarded because their generation went stale
    pub tasks_stale_dropped: AtomicU64,

    /// Queued tasks removed by overload shedding
    pub tasks_overload_dropped: AtomicU64,

    /// Queued tasks removed by `cancel_all_below`
    pub tasks_cancelled: AtomicU64,

    /// Tasks resolved from the cache without invoking the backend
    pub tasks_cache_hits: AtomicU64,

    /// Render backend failures
    pub renders_failed: AtomicU64,

    /// Updates emitted to the presenter
    pub updates_emitted: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_dropped(&self) {
        self.tasks_stale_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overload_dropped(&self, count: u64) {
        self.tasks_overload_dropped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, count: u64) {
        self.tasks_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_task_cache_hit(&self) {
        self.tasks_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_failed(&self) {
        self.renders_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_emitted(&self) {
        self.updates_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_stale_dropped: self.tasks_stale_dropped.load(Ordering::Relaxed),
            tasks_overload_dropped: self.tasks_overload_dropped.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_cache_hits: self.tasks_cache_hits.load(Ordering::Relaxed),
            renders_failed: self.renders_failed.load(Ordering::Relaxed),
            updates_emitted: self.updates_emitted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of engine metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub passes: u64,
    pub tasks_submitted: u64,
    pub tasks_executed: u64,
    pub tasks_stale_dropped: u64,
    pub tasks_overload_dropped: u64,
    pub tasks_cancelled: u64,
    pub tasks_cache_hits: u64,
    pub renders_failed: u64,
    pub updates_emitted: u64,
}

impl MetricsSnapshot {
    /// Fraction of submitted tasks that never reached the backend
    pub fn elision_rate(&self) -> f64 {
        if self.tasks_submitted == 0 {
            0.0
        } else {
            let elided = self.tasks_stale_dropped
                + self.tasks_overload_dropped
                + self.tasks_cancelled
                + self.tasks_cache_hits;
            elided as f64 / self.tasks_submitted as f64
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Engine Metrics:")?;
        writeln!(
            f,
            "  Passes: {} | Updates: {}",
            self.passes, self.updates_emitted
        )?;
        writeln!(
            f,
            "  Tasks: {} submitted | {} executed | {} cache-resolved",
            self.tasks_submitted, self.tasks_executed, self.tasks_cache_hits
        )?;
        writeln!(
            f,
            "  Dropped: {} stale | {} overload | {} cancelled",
            self.tasks_stale_dropped, self.tasks_overload_dropped, self.tasks_cancelled
        )?;
        writeln!(f, "  Render failures: {}", self.renders_failed)?;
        Ok(())
    }
}
