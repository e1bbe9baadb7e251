//! Engine façade and control loop
//!
//! `PreviewEngine` wires the components together: edits flow through the
//! debouncer into a segmentation + scheduling pass, workers deliver render
//! results over a channel, and a single consumption loop on the control
//! thread folds them into presenter updates. The control thread never
//! executes a render itself, so UI-facing state is never blocked behind the
//! backend.
//!
//! Updates are delivered newest-generation-only: the emit path refuses any
//! update whose generation is lower than the last one emitted, so the
//! presenter can apply the stream as-is.

use crate::cache::{BlockCache, CacheStats};
use crate::config::{ConfigError, EngineConfig};
use crate::debounce::Debouncer;
use crate::generation::GenerationTracker;
use crate::merge::{Merger, PreviewUpdate};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::predict::PredictiveScheduler;
use crate::scheduler::{default_worker_count, LiveSet, RenderResult, RenderTask, WorkerPool};
use crate::segment::{segment, Block, DocumentSnapshot};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use velin_render::{MarkdownBackend, RenderBackend};
use velin_types::{Generation, RenderPriority, VisibleRange};

enum ControlMsg {
    Edit(String),
    Cursor(usize),
    Scroll(VisibleRange),
    Shutdown,
}

/// The incremental preview rendering engine
///
/// One instance serves one open document. All state is in-memory and dies
/// with the instance; nothing is persisted.
pub struct PreviewEngine {
    cache: Arc<BlockCache>,
    tracker: Arc<GenerationTracker>,
    metrics: Arc<EngineMetrics>,
    pool: Arc<WorkerPool>,
    debouncer: Debouncer,
    control_tx: Sender<ControlMsg>,
    updates_rx: Receiver<PreviewUpdate>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl PreviewEngine {
    /// Build an engine around the given render backend
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn RenderBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = Arc::new(BlockCache::new(config.cache_capacity));
        let tracker = Arc::new(GenerationTracker::new());
        let metrics = Arc::new(EngineMetrics::new());
        let live = Arc::new(LiveSet::new());

        let (results_tx, results_rx) = unbounded::<RenderResult>();
        let (control_tx, control_rx) = unbounded::<ControlMsg>();
        let (updates_tx, updates_rx) = unbounded::<PreviewUpdate>();

        let pool = Arc::new(WorkerPool::new(
            default_worker_count(config.worker_multiplier),
            config.queue_overload_limit,
            backend,
            cache.clone(),
            tracker.clone(),
            live.clone(),
            results_tx,
            metrics.clone(),
        ));

        let control = {
            let mut control_loop = ControlLoop {
                predictor: PredictiveScheduler::new(config.max_predictions),
                merger: Merger::new(config.accelerated),
                config: config.clone(),
                cache: cache.clone(),
                tracker: tracker.clone(),
                metrics: metrics.clone(),
                pool: pool.clone(),
                live,
                snapshot: None,
                cursor: None,
                visible: None,
                last_emitted: None,
                deadline: None,
                updates_tx,
            };
            thread::Builder::new()
                .name("velin-control".to_string())
                .spawn(move || control_loop.run(&control_rx, &results_rx))
                .expect("failed to spawn control thread")
        };

        let debouncer = {
            let control_tx = control_tx.clone();
            Debouncer::new(config.debounce.clone(), move |text| {
                let _ = control_tx.send(ControlMsg::Edit(text));
            })
        };

        Ok(PreviewEngine {
            cache,
            tracker,
            metrics,
            pool,
            debouncer,
            control_tx,
            updates_rx,
            control: Mutex::new(Some(control)),
        })
    }

    /// Engine with the default markdown backend
    pub fn with_markdown(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(MarkdownBackend::new()))
    }

    /// Record an edit; a pass fires once the document goes quiet
    pub fn notify_edit(&self, full_text: String) {
        self.debouncer.notify_edit(full_text);
    }

    /// Update the cursor position used for prioritization and prediction
    pub fn notify_cursor(&self, position: usize) {
        let _ = self.control_tx.send(ControlMsg::Cursor(position));
    }

    /// Update the visible byte range used for prioritization and prediction
    pub fn notify_scroll(&self, visible_range: Range<usize>) {
        let _ = self
            .control_tx
            .send(ControlMsg::Scroll(visible_range.into()));
    }

    /// Stream of presenter updates, newest generation only
    pub fn updates(&self) -> Receiver<PreviewUpdate> {
        self.updates_rx.clone()
    }

    /// Most recently issued generation
    pub fn current_generation(&self) -> Generation {
        self.tracker.current()
    }

    /// Block cache hit/miss/occupancy counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Point-in-time engine counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Tear down without firing pending debounced work
    pub fn shutdown(&self) {
        self.debouncer.shutdown();
        let _ = self.control_tx.send(ControlMsg::Shutdown);
        if let Some(handle) = self.control.lock().take() {
            let _ = handle.join();
        }
        self.pool.shutdown();
    }
}

impl Drop for PreviewEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PreviewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewEngine")
            .field("generation", &self.tracker.current())
            .finish()
    }
}

struct ControlLoop {
    config: EngineConfig,
    cache: Arc<BlockCache>,
    tracker: Arc<GenerationTracker>,
    metrics: Arc<EngineMetrics>,
    pool: Arc<WorkerPool>,
    live: Arc<LiveSet>,
    predictor: PredictiveScheduler,
    merger: Merger,
    snapshot: Option<DocumentSnapshot>,
    cursor: Option<usize>,
    visible: Option<VisibleRange>,
    last_emitted: Option<Generation>,
    deadline: Option<Instant>,
    updates_tx: Sender<PreviewUpdate>,
}

impl ControlLoop {
    fn run(&mut self, control_rx: &Receiver<ControlMsg>, results_rx: &Receiver<RenderResult>) {
        loop {
            let timeout = self
                .deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_secs(60));

            select! {
                recv(control_rx) -> msg => match msg {
                    Ok(ControlMsg::Edit(text)) => self.run_pass(&text),
                    Ok(ControlMsg::Cursor(position)) => {
                        self.cursor = Some(position);
                        self.schedule_predictions();
                    }
                    Ok(ControlMsg::Scroll(range)) => {
                        self.visible = Some(range);
                        self.schedule_predictions();
                    }
                    Ok(ControlMsg::Shutdown) | Err(_) => return,
                },
                recv(results_rx) -> result => match result {
                    Ok(result) => self.handle_result(&result),
                    Err(_) => return,
                },
                default(timeout) => self.handle_deadline(),
            }
        }
    }

    /// One segmentation + scheduling pass over the full document text
    fn run_pass(&mut self, text: &str) {
        let generation = self.tracker.next();
        self.metrics.record_pass();

        let snapshot = DocumentSnapshot::new(generation, segment(text));
        info!(%generation, blocks = snapshot.blocks.len(), "render pass");

        self.live
            .replace(snapshot.blocks.iter().map(|b| b.content_hash));
        self.pool.cancel_all_below(generation);

        let mut submitted: HashSet<_> = HashSet::new();
        for block in &snapshot.blocks {
            if self.cache.contains(&block.content_hash) {
                continue;
            }
            // One task per distinct content; a single result fills every
            // block sharing the hash.
            if !submitted.insert(block.content_hash) {
                continue;
            }
            let priority = self.classify(block);
            self.submit(block, generation, priority);
        }

        let update = self.merger.begin_generation(snapshot.clone(), &self.cache);
        self.snapshot = Some(snapshot);
        self.deadline = if update.is_complete() {
            None
        } else {
            Some(Instant::now() + self.config.completion_deadline())
        };
        self.emit(update);
    }

    fn handle_result(&mut self, result: &RenderResult) {
        if let Some(update) = self.merger.apply_result(result) {
            let complete = update.is_complete();
            self.emit(update);
            if complete {
                debug!(generation = %self.tracker.current(), "generation complete");
                self.deadline = None;
            }
        }
    }

    fn handle_deadline(&mut self) {
        let Some(deadline) = self.deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        self.deadline = None;
        if !self.merger.is_complete() {
            warn!(
                generation = %self.tracker.current(),
                "completion deadline lapsed, showing partial render"
            );
            if let Some(update) = self.merger.current_update() {
                self.emit(update);
            }
        }
    }

    fn schedule_predictions(&mut self) {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return;
        };
        let picked = self
            .predictor
            .predict(snapshot, self.cursor, self.visible.as_ref());
        let generation = self.tracker.current();
        for id in picked {
            let Some(block) = snapshot.blocks.iter().find(|b| b.id == id) else {
                continue;
            };
            if self.cache.contains(&block.content_hash) {
                continue;
            }
            self.submit(block, generation, RenderPriority::Predictive);
        }
    }

    fn submit(&self, block: &Block, generation: Generation, priority: RenderPriority) {
        self.pool.submit(RenderTask {
            block_id: block.id,
            content_hash: block.content_hash,
            raw_text: block.raw_text.clone(),
            generation,
            priority,
        });
        self.metrics.record_submitted();
    }

    /// Interactive for the cursor block, Visible inside the viewport,
    /// Predictive for everything off-screen. With no viewport information
    /// yet, everything is Visible.
    fn classify(&self, block: &Block) -> RenderPriority {
        if let Some(cursor) = self.cursor {
            if block.span.contains(&cursor) {
                return RenderPriority::Interactive;
            }
        }
        match &self.visible {
            Some(range) if !range.overlaps(&block.span) => RenderPriority::Predictive,
            _ => RenderPriority::Visible,
        }
    }

    fn emit(&mut self, update: PreviewUpdate) {
        // Presenter guard: never deliver output older than what was shown.
        if let Some(last) = self.last_emitted {
            if update.generation() < last {
                return;
            }
        }
        self.last_emitted = Some(update.generation());
        self.metrics.record_update_emitted();
        let _ = self.updates_tx.send(update);
    }
}
