//! Worker pool and render task scheduling
//!
//! A bounded set of worker threads consumes a priority queue of render
//! tasks. Ordering: priority first (Interactive > Visible > Predictive),
//! then generation descending (newer work preferred), then FIFO within a
//! tie.
//!
//! Staleness is the core correctness mechanism here, not an optimization:
//! workers are unbounded in how late a task may run relative to when it was
//! enqueued, so every task is re-checked against the generation tracker
//! before execution and again at completion. Because cache writes are keyed
//! by content hash, a stale task whose content still exists in the current
//! snapshot is allowed to write through; staleness only blocks tasks whose
//! target content vanished.

use crate::cache::{BlockCache, ContentHash};
use crate::generation::GenerationTracker;
use crate::metrics::EngineMetrics;
use crossbeam_channel::Sender;
use dashmap::DashSet;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};
use velin_render::{RenderBackend, RenderError};
use velin_types::{BlockId, Generation, RenderPriority};

/// One unit of render work
#[derive(Debug, Clone)]
pub struct RenderTask {
    pub block_id: BlockId,
    pub content_hash: ContentHash,
    pub raw_text: String,
    pub generation: Generation,
    pub priority: RenderPriority,
}

/// Outcome of one render task, delivered to the merger over the results
/// channel
#[derive(Debug)]
pub struct RenderResult {
    pub block_id: BlockId,
    pub content_hash: ContentHash,
    pub generation: Generation,
    pub html: Result<String, RenderError>,
}

/// Content hashes present in the current snapshot
///
/// Replaced wholesale on every pass. Workers consult it for the
/// write-through carve-out: a stale task whose hash is still live computes
/// output the current document also needs.
#[derive(Debug, Default)]
pub struct LiveSet {
    hashes: DashSet<ContentHash>,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in the hashes of a new snapshot
    pub fn replace(&self, hashes: impl IntoIterator<Item = ContentHash>) {
        self.hashes.clear();
        for hash in hashes {
            self.hashes.insert(hash);
        }
    }

    /// Whether the hash exists in the current snapshot
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.hashes.contains(hash)
    }

    /// Number of distinct live hashes
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the current snapshot has no blocks
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Queue entry; `seq` provides the FIFO tie-break
struct QueuedTask {
    task: RenderTask,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then(self.task.generation.cmp(&other.task.generation))
            // Lower seq dequeues first within a tie.
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct PoolShared {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    available: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
    overload_limit: usize,
}

/// Bounded worker pool executing render tasks via the backend
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<EngineMetrics>,
}

/// Pool size for a configured multiple of available parallelism
pub fn default_worker_count(multiplier: usize) -> usize {
    let parallelism = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    parallelism * multiplier.max(1)
}

impl WorkerPool {
    /// Spawn `worker_count` threads consuming the task queue
    ///
    /// A count of zero is permitted (tasks queue but never execute), which
    /// tests use to inspect queue behavior in isolation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_count: usize,
        overload_limit: usize,
        backend: Arc<dyn RenderBackend>,
        cache: Arc<BlockCache>,
        tracker: Arc<GenerationTracker>,
        live: Arc<LiveSet>,
        results: Sender<RenderResult>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            overload_limit: overload_limit.max(1),
        });

        let workers = (0..worker_count)
            .map(|index| {
                let shared = shared.clone();
                let backend = backend.clone();
                let cache = cache.clone();
                let tracker = tracker.clone();
                let live = live.clone();
                let results = results.clone();
                let metrics = metrics.clone();

                thread::Builder::new()
                    .name(format!("velin-render-{index}"))
                    .spawn(move || {
                        worker_loop(&shared, &*backend, &cache, &tracker, &live, &results, &metrics)
                    })
                    .expect("failed to spawn render worker")
            })
            .collect();

        WorkerPool {
            shared,
            workers: Mutex::new(workers),
            metrics,
        }
    }

    /// Enqueue a render task
    ///
    /// If the queue depth exceeds the overload bound, the lowest-priority
    /// queued tasks are shed first; Interactive tasks are never shed.
    pub fn submit(&self, task: RenderTask) {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.shared.queue.lock();
            queue.push(QueuedTask { task, seq });

            if queue.len() > self.shared.overload_limit {
                let dropped = shed_overflow(&mut queue, self.shared.overload_limit);
                if dropped > 0 {
                    self.metrics.record_overload_dropped(dropped);
                    warn!(dropped, "render queue overloaded, shed low-priority tasks");
                }
            }
        }
        self.shared.available.notify_one();
    }

    /// Remove queued tasks older than `generation`
    ///
    /// Hard for queued-but-not-started work; advisory for in-flight work,
    /// which finishes and is discarded by the completion-time staleness
    /// check instead.
    pub fn cancel_all_below(&self, generation: Generation) {
        let removed = {
            let mut queue = self.shared.queue.lock();
            let before = queue.len();
            queue.retain(|queued| queued.task.generation >= generation);
            (before - queue.len()) as u64
        };
        if removed > 0 {
            self.metrics.record_cancelled(removed);
            debug!(removed, %generation, "cancelled queued tasks below generation");
        }
    }

    /// Number of queued (not yet started) tasks
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Stop accepting work and join all workers
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue_depth", &self.queue_depth())
            .finish()
    }
}

fn worker_loop(
    shared: &PoolShared,
    backend: &dyn RenderBackend,
    cache: &BlockCache,
    tracker: &GenerationTracker,
    live: &LiveSet,
    results: &Sender<RenderResult>,
    metrics: &EngineMetrics,
) {
    loop {
        let queued = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(queued) = queue.pop() {
                    break queued;
                }
                shared.available.wait(&mut queue);
            }
        };
        let task = queued.task;

        if is_stale(&task, tracker, live) {
            metrics.record_stale_dropped();
            continue;
        }

        // Another task may have rendered the same content in the meantime;
        // the backend is pure, so the cached fragment is the answer.
        if let Some(html) = cache.get(&task.content_hash) {
            metrics.record_task_cache_hit();
            let _ = results.send(RenderResult {
                block_id: task.block_id,
                content_hash: task.content_hash,
                generation: task.generation,
                html: Ok(html),
            });
            continue;
        }

        let rendered = backend.render_block(&task.raw_text);

        // Cancellation of in-flight work is advisory: the render ran to
        // completion, now decide whether anyone still wants the output.
        if is_stale(&task, tracker, live) {
            metrics.record_stale_dropped();
            continue;
        }

        metrics.record_executed();
        match rendered {
            Ok(html) => {
                cache.put(task.content_hash, html.clone());
                let _ = results.send(RenderResult {
                    block_id: task.block_id,
                    content_hash: task.content_hash,
                    generation: task.generation,
                    html: Ok(html),
                });
            }
            Err(err) => {
                // Errors are never cached; the next generation retries.
                metrics.record_render_failed();
                debug!(block = task.block_id.as_u64(), %err, "render backend failed");
                let _ = results.send(RenderResult {
                    block_id: task.block_id,
                    content_hash: task.content_hash,
                    generation: task.generation,
                    html: Err(err),
                });
            }
        }
    }
}

fn is_stale(task: &RenderTask, tracker: &GenerationTracker, live: &LiveSet) -> bool {
    !tracker.is_current(task.generation) && !live.contains(&task.content_hash)
}

/// Drop least-urgent non-Interactive entries until the queue fits
fn shed_overflow(queue: &mut BinaryHeap<QueuedTask>, limit: usize) -> u64 {
    if queue.len() <= limit {
        return 0;
    }

    let mut entries = std::mem::take(queue).into_vec();
    // Ascending order puts the least urgent entries first.
    entries.sort();

    let mut to_drop = entries.len() - limit;
    let mut dropped = 0u64;
    let mut kept = Vec::with_capacity(limit);
    for entry in entries {
        if to_drop > 0 && entry.task.priority != RenderPriority::Interactive {
            to_drop -= 1;
            dropped += 1;
        } else {
            kept.push(entry);
        }
    }

    *queue = BinaryHeap::from(kept);
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    struct EchoBackend;

    impl RenderBackend for EchoBackend {
        fn render_block(&self, raw_text: &str) -> Result<String, RenderError> {
            Ok(format!("<p>{raw_text}</p>"))
        }
    }

    fn task(text: &str, generation: u64, priority: RenderPriority) -> RenderTask {
        RenderTask {
            block_id: BlockId::new(generation),
            content_hash: ContentHash::of(text),
            raw_text: text.to_string(),
            generation: Generation(generation),
            priority,
        }
    }

    fn idle_pool(worker_count: usize, overload_limit: usize) -> (WorkerPool, crossbeam_channel::Receiver<RenderResult>, Arc<GenerationTracker>, Arc<LiveSet>) {
        let (tx, rx) = unbounded();
        let tracker = Arc::new(GenerationTracker::new());
        let live = Arc::new(LiveSet::new());
        let pool = WorkerPool::new(
            worker_count,
            overload_limit,
            Arc::new(EchoBackend),
            Arc::new(BlockCache::new(16)),
            tracker.clone(),
            live.clone(),
            tx,
            Arc::new(EngineMetrics::new()),
        );
        (pool, rx, tracker, live)
    }

    #[test]
    fn test_queue_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedTask { task: task("p", 3, RenderPriority::Predictive), seq: 0 });
        heap.push(QueuedTask { task: task("v-old", 2, RenderPriority::Visible), seq: 1 });
        heap.push(QueuedTask { task: task("v-new", 3, RenderPriority::Visible), seq: 2 });
        heap.push(QueuedTask { task: task("i1", 3, RenderPriority::Interactive), seq: 3 });
        heap.push(QueuedTask { task: task("i2", 3, RenderPriority::Interactive), seq: 4 });

        let order: Vec<String> = std::iter::from_fn(|| heap.pop())
            .map(|q| q.task.raw_text)
            .collect();

        // Priority first, newer generations next, FIFO within ties.
        assert_eq!(order, vec!["i1", "i2", "v-new", "v-old", "p"]);
    }

    #[test]
    fn test_live_set_replace() {
        let live = LiveSet::new();
        let a = ContentHash::of("a");
        let b = ContentHash::of("b");

        live.replace([a]);
        assert!(live.contains(&a));
        assert!(!live.contains(&b));

        live.replace([b]);
        assert!(!live.contains(&a));
        assert!(live.contains(&b));
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_stale_task_dropped() {
        let (pool, rx, tracker, _live) = idle_pool(1, 64);
        tracker.next();
        tracker.next(); // current is now g2

        pool.submit(task("old", 1, RenderPriority::Visible));

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        pool.shutdown();
    }

    #[test]
    fn test_stale_task_with_live_hash_writes_through() {
        let (pool, rx, tracker, live) = idle_pool(1, 64);
        tracker.next();
        tracker.next();
        live.replace([ContentHash::of("still here")]);

        pool.submit(task("still here", 1, RenderPriority::Visible));

        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("live-hash task should execute");
        assert_eq!(result.html.unwrap(), "<p>still here</p>");
        pool.shutdown();
    }

    #[test]
    fn test_current_task_executes() {
        let (pool, rx, tracker, _live) = idle_pool(2, 64);
        let generation = tracker.next();

        pool.submit(task("hello", generation.as_u64(), RenderPriority::Interactive));

        let result = rx.recv_timeout(Duration::from_secs(2)).expect("result");
        assert_eq!(result.generation, generation);
        assert_eq!(result.html.unwrap(), "<p>hello</p>");
        pool.shutdown();
    }

    #[test]
    fn test_cancel_all_below_removes_queued() {
        // Zero workers: tasks stay queued for inspection.
        let (pool, _rx, _tracker, _live) = idle_pool(0, 64);

        pool.submit(task("a", 1, RenderPriority::Visible));
        pool.submit(task("b", 1, RenderPriority::Predictive));
        pool.submit(task("c", 2, RenderPriority::Visible));
        assert_eq!(pool.queue_depth(), 3);

        pool.cancel_all_below(Generation(2));
        assert_eq!(pool.queue_depth(), 1);
    }

    #[test]
    fn test_overload_sheds_predictive_never_interactive() {
        let (pool, _rx, _tracker, _live) = idle_pool(0, 4);

        for i in 0..3 {
            pool.submit(task(&format!("i{i}"), 1, RenderPriority::Interactive));
        }
        for i in 0..4 {
            pool.submit(task(&format!("p{i}"), 1, RenderPriority::Predictive));
        }

        // 7 submitted, limit 4: predictive overflow shed, interactive kept.
        assert_eq!(pool.queue_depth(), 4);

        let mut queue = pool.shared.queue.lock();
        let interactive = queue
            .drain()
            .filter(|q| q.task.priority == RenderPriority::Interactive)
            .count();
        assert_eq!(interactive, 3);
    }
}
