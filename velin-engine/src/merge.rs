//! Result merging and presenter-facing output
//!
//! Assembles per-block fragments (cache hits plus fresh render results)
//! into coherent output in original block order. The merger never blocks:
//! each invocation returns the best currently-available output, with
//! placeholders standing in for blocks whose render is still pending.
//! Completion is reached when every block has a non-placeholder entry;
//! inline error fragments count, so one failing block never holds up the
//! document.
//!
//! Output shape follows the presenter capability chosen at construction:
//! accelerated presenters get whole-document HTML, software presenters get
//! per-block deltas to minimize re-layout.

use crate::cache::{BlockCache, ContentHash};
use crate::scheduler::RenderResult;
use crate::segment::{Block, DocumentSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use velin_render::{escape_html, RenderError};
use velin_types::{BlockId, Generation};

/// Consecutive failing generations before the inline error marker becomes
/// sticky
pub const STICKY_FAILURE_THRESHOLD: u32 = 3;

/// Assembled whole-document output
#[derive(Debug, Clone, Serialize)]
pub struct MergedOutput {
    pub generation: Generation,
    pub html: String,
    pub complete: bool,
}

/// Single-block replacement for the software presenter path
#[derive(Debug, Clone, Serialize)]
pub struct BlockDelta {
    pub block_id: BlockId,
    pub order_index: usize,
    pub html: String,
}

/// One presenter-facing event
///
/// Delivered newest-generation-only: the engine never emits an update whose
/// generation is lower than one already emitted.
#[derive(Debug, Clone, Serialize)]
pub enum PreviewUpdate {
    /// Whole-document HTML blob (accelerated presentation)
    Full(MergedOutput),

    /// Per-block replacements (software fallback)
    Deltas {
        generation: Generation,
        deltas: Vec<BlockDelta>,
        complete: bool,
    },
}

impl PreviewUpdate {
    pub fn generation(&self) -> Generation {
        match self {
            PreviewUpdate::Full(output) => output.generation,
            PreviewUpdate::Deltas { generation, .. } => *generation,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            PreviewUpdate::Full(output) => output.complete,
            PreviewUpdate::Deltas { complete, .. } => *complete,
        }
    }
}

struct MergeState {
    generation: Generation,
    blocks: Vec<Block>,
    pending: usize,
}

/// Incremental assembler for the current generation
pub struct Merger {
    accelerated: bool,
    failure_streaks: HashMap<ContentHash, u32>,
    state: Option<MergeState>,
}

impl Merger {
    pub fn new(accelerated: bool) -> Self {
        Merger {
            accelerated,
            failure_streaks: HashMap::new(),
            state: None,
        }
    }

    /// Start assembling a new generation, consuming cache hits immediately
    ///
    /// Returns the first (possibly already complete) update for the
    /// generation: filled blocks from the cache, placeholders elsewhere.
    pub fn begin_generation(
        &mut self,
        snapshot: DocumentSnapshot,
        cache: &BlockCache,
    ) -> PreviewUpdate {
        let DocumentSnapshot {
            generation,
            mut blocks,
        } = snapshot;

        for block in &mut blocks {
            block.rendered_html = cache.get(&block.content_hash);
        }
        let pending = blocks.iter().filter(|b| b.rendered_html.is_none()).count();

        // Streaks for content that left the document no longer matter.
        self.failure_streaks
            .retain(|hash, _| blocks.iter().any(|b| b.content_hash == *hash));

        debug!(%generation, blocks = blocks.len(), pending, "merge pass started");

        let state = MergeState {
            generation,
            blocks,
            pending,
        };
        let update = self.render_update(&state, None);
        self.state = Some(state);
        update
    }

    /// Fold one render result into the current generation
    ///
    /// Matches by content hash, so a write-through result from a stale
    /// generation still fills the blocks that share its content. Returns
    /// `None` when the result touches nothing currently pending.
    pub fn apply_result(&mut self, result: &RenderResult) -> Option<PreviewUpdate> {
        let state = self.state.as_mut()?;

        let fragment = match &result.html {
            Ok(html) => {
                self.failure_streaks.remove(&result.content_hash);
                html.clone()
            }
            Err(err) => {
                let streak = self
                    .failure_streaks
                    .entry(result.content_hash)
                    .and_modify(|s| *s += 1)
                    .or_insert(1);
                error_fragment(result.block_id, err, *streak >= STICKY_FAILURE_THRESHOLD)
            }
        };

        let mut filled: Vec<usize> = Vec::new();
        for (index, block) in state.blocks.iter_mut().enumerate() {
            if block.content_hash == result.content_hash && block.rendered_html.is_none() {
                block.rendered_html = Some(fragment.clone());
                filled.push(index);
            }
        }
        if filled.is_empty() {
            return None;
        }
        state.pending -= filled.len();

        let state = self.state.as_ref()?;
        Some(self.render_update(state, Some(&filled)))
    }

    /// Generation currently being assembled
    pub fn current_generation(&self) -> Option<Generation> {
        self.state.as_ref().map(|s| s.generation)
    }

    /// Whether every block of the current generation is non-placeholder
    pub fn is_complete(&self) -> bool {
        self.state.as_ref().map(|s| s.pending == 0).unwrap_or(false)
    }

    /// Re-emit the best currently-available output, e.g. when the
    /// completion deadline lapses
    pub fn current_update(&self) -> Option<PreviewUpdate> {
        self.state.as_ref().map(|s| self.render_update(s, None))
    }

    fn render_update(&self, state: &MergeState, changed: Option<&[usize]>) -> PreviewUpdate {
        let complete = state.pending == 0;
        if self.accelerated {
            let html = state
                .blocks
                .iter()
                .map(fragment_or_placeholder)
                .collect::<Vec<_>>()
                .join("\n");
            PreviewUpdate::Full(MergedOutput {
                generation: state.generation,
                html,
                complete,
            })
        } else {
            let indices: Vec<usize> = match changed {
                Some(indices) => indices.to_vec(),
                None => (0..state.blocks.len()).collect(),
            };
            let deltas = indices
                .into_iter()
                .map(|index| {
                    let block = &state.blocks[index];
                    BlockDelta {
                        block_id: block.id,
                        order_index: block.order_index,
                        html: fragment_or_placeholder(block),
                    }
                })
                .collect();
            PreviewUpdate::Deltas {
                generation: state.generation,
                deltas,
                complete,
            }
        }
    }
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("generation", &self.current_generation())
            .field("complete", &self.is_complete())
            .finish()
    }
}

fn fragment_or_placeholder(block: &Block) -> String {
    match &block.rendered_html {
        Some(html) => html.clone(),
        None => placeholder_fragment(block.id),
    }
}

fn placeholder_fragment(block_id: BlockId) -> String {
    format!(
        r#"<div class="velin-block velin-pending" data-block="{:016x}">rendering…</div>"#,
        block_id.as_u64()
    )
}

fn error_fragment(block_id: BlockId, error: &RenderError, sticky: bool) -> String {
    let class = if sticky {
        "velin-block velin-error velin-error-sticky"
    } else {
        "velin-block velin-error"
    };
    format!(
        r#"<div class="{class}" data-block="{:016x}">{}</div>"#,
        block_id.as_u64(),
        escape_html(&error.to_string())
    )
}
