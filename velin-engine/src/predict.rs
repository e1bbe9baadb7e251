//! Predictive pre-rendering
//!
//! Speculative layer over the scheduler: cursor and scroll positions hint at
//! which blocks the user will touch next, and those blocks are enqueued at
//! Predictive priority so idle workers can warm the cache. A wrong
//! prediction costs nothing; the block simply renders on demand later.
//! Starvation of real work is prevented entirely by the queue's priority
//! ordering, not by any throttling here.

use crate::segment::DocumentSnapshot;
use velin_types::{BlockId, VisibleRange};

/// Picks blocks likely to be edited or viewed next
#[derive(Debug, Clone)]
pub struct PredictiveScheduler {
    max_predictions: usize,
}

impl PredictiveScheduler {
    pub fn new(max_predictions: usize) -> Self {
        Self { max_predictions }
    }

    /// Up to `max_predictions` block ids, nearest-first
    ///
    /// Candidates, in order: the first block below the visible range (the
    /// scroll-ahead target), then the blocks just after and just before the
    /// cursor block.
    pub fn predict(
        &self,
        snapshot: &DocumentSnapshot,
        cursor_position: Option<usize>,
        visible: Option<&VisibleRange>,
    ) -> Vec<BlockId> {
        if self.max_predictions == 0 || snapshot.blocks.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<usize> = Vec::new();

        if let Some(range) = visible {
            if let Some(below) = snapshot
                .blocks
                .iter()
                .position(|b| b.span.start >= range.end)
            {
                candidates.push(below);
            }
        }

        if let Some(cursor) = cursor_position {
            if let Some(at_cursor) = snapshot.block_at(cursor) {
                if at_cursor + 1 < snapshot.blocks.len() {
                    candidates.push(at_cursor + 1);
                }
                if at_cursor > 0 {
                    candidates.push(at_cursor - 1);
                }
            }
        }

        let mut picked = Vec::new();
        for index in candidates {
            let id = snapshot.blocks[index].id;
            if !picked.contains(&id) {
                picked.push(id);
            }
            if picked.len() == self.max_predictions {
                break;
            }
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::segment;
    use velin_types::Generation;

    fn snapshot(text: &str) -> DocumentSnapshot {
        DocumentSnapshot::new(Generation(1), segment(text))
    }

    #[test]
    fn test_predicts_neighbors_of_cursor() {
        let snap = snapshot("one\n\ntwo\n\nthree\n\nfour");
        let predictor = PredictiveScheduler::new(3);

        // Cursor inside "two" (offset of 't' in "two" is 5).
        let picked = predictor.predict(&snap, Some(6), None);

        assert_eq!(picked, vec![snap.blocks[2].id, snap.blocks[0].id]);
    }

    #[test]
    fn test_predicts_block_below_viewport_first() {
        let text = "one\n\ntwo\n\nthree\n\nfour";
        let snap = snapshot(text);
        let predictor = PredictiveScheduler::new(3);

        // Viewport covers the first two blocks.
        let visible = VisibleRange::new(0, 8);
        let picked = predictor.predict(&snap, Some(6), Some(&visible));

        assert_eq!(picked[0], snap.blocks[2].id);
        assert!(picked.len() <= 3);
    }

    #[test]
    fn test_bounded_and_deduplicated() {
        let snap = snapshot("one\n\ntwo\n\nthree");
        let predictor = PredictiveScheduler::new(1);

        let visible = VisibleRange::new(0, 3);
        let picked = predictor.predict(&snap, Some(0), Some(&visible));

        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = snapshot("");
        let predictor = PredictiveScheduler::new(3);

        assert!(predictor.predict(&snap, Some(0), None).is_empty());
    }
}
