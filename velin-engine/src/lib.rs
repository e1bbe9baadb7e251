//! Velin Incremental Preview Rendering Engine
//!
//! This crate keeps a live HTML preview in step with a continuously
//! mutating document. It segments the document into stable blocks, caches
//! per-block render results by content hash, schedules re-render work
//! across a bounded worker pool, and merges partial results into coherent
//! output, while guaranteeing the presentation layer never sees results
//! computed from a superseded version of the document.
//!
//! # Architecture
//!
//! The pipeline, one accepted edit batch at a time:
//!
//! ```text
//! notify_edit → debounce → segment → cache lookup → schedule misses
//!                                                        ↓
//! presenter ← merge (hits + placeholders + results) ← worker pool
//! ```
//!
//! ## Key Properties
//!
//! - **Content-Addressed Caching**: render output is keyed by a hash of the
//!   block's text, so unchanged and moved blocks never re-render
//! - **Stale-Task Elision**: every task carries the generation it was
//!   scheduled under; work whose generation is superseded and whose content
//!   left the document is dropped, not delivered
//! - **Priority Scheduling**: the block at the cursor beats visible blocks,
//!   which beat speculative pre-renders
//! - **Never-Blocking Merge**: the merger always returns the best
//!   currently-available output; pending blocks show placeholders
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use velin_engine::prelude::*;
//!
//! let engine = PreviewEngine::with_markdown(EngineConfig::default())?;
//! let updates = engine.updates();
//!
//! engine.notify_edit("# Title\n\nHello world.".to_string());
//! while let Ok(update) = updates.recv() {
//!     if update.is_complete() {
//!         break;
//!     }
//! }
//! engine.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

// Core modules
pub mod cache;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod generation;
pub mod merge;
pub mod metrics;
pub mod predict;
pub mod scheduler;
pub mod segment;

// Re-export main types
pub use cache::{BlockCache, CacheStats, ContentHash, DEFAULT_CACHE_CAPACITY};
pub use config::{ConfigError, DebounceConfig, EngineConfig};
pub use debounce::Debouncer;
pub use engine::PreviewEngine;
pub use generation::GenerationTracker;
pub use merge::{BlockDelta, MergedOutput, Merger, PreviewUpdate};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use predict::PredictiveScheduler;
pub use scheduler::{default_worker_count, LiveSet, RenderResult, RenderTask, WorkerPool};
pub use segment::{segment, Block, DocumentSnapshot};
pub use velin_render::{MarkdownBackend, RenderBackend, RenderError};
pub use velin_types::{BlockId, Generation, RenderPriority, VisibleRange};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DebounceConfig, EngineConfig};
    pub use crate::engine::PreviewEngine;
    pub use crate::merge::{MergedOutput, PreviewUpdate};
    pub use velin_render::{MarkdownBackend, RenderBackend, RenderError};
    pub use velin_types::{BlockId, Generation, RenderPriority, VisibleRange};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_construction() {
        let engine = PreviewEngine::with_markdown(EngineConfig::default()).unwrap();
        assert_eq!(engine.current_generation(), Generation::ZERO);
        engine.shutdown();
    }
}
