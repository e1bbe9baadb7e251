//! Block segmentation
//!
//! Splits raw document text into an ordered sequence of logical blocks on
//! structural delimiters: blank lines, ATX headings, fenced code blocks, and
//! table-row runs. Re-run on every accepted edit; blocks whose content is
//! unchanged keep the same content hash (and therefore reuse the cache), and
//! a block that merely moved keeps its id.
//!
//! Segmentation never fails. Malformed structure degrades to coarser
//! blocks; worst case the entire document is one block. An unterminated
//! fence extends to end-of-document.

use crate::cache::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use velin_types::{BlockId, Generation};

/// A contiguous, independently renderable unit of document structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Stable identifier: content fingerprint + occurrence index
    pub id: BlockId,

    /// Cache key for this block's rendered fragment
    pub content_hash: ContentHash,

    /// The block's source text
    pub raw_text: String,

    /// Rendered HTML, filled in by the merger; `None` until computed
    pub rendered_html: Option<String>,

    /// Position within the document at segmentation time
    pub order_index: usize,

    /// Byte range of the block in the source text
    pub span: Range<usize>,
}

/// An immutable view of the document at one generation
///
/// Created once per debounced edit batch. Block order defines the order of
/// the final assembled HTML.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub generation: Generation,
    pub blocks: Vec<Block>,
}

impl DocumentSnapshot {
    pub fn new(generation: Generation, blocks: Vec<Block>) -> Self {
        Self { generation, blocks }
    }

    /// Index of the block containing (or nearest after) a byte position
    pub fn block_at(&self, position: usize) -> Option<usize> {
        if self.blocks.is_empty() {
            return None;
        }
        let found = self.blocks.iter().position(|b| position < b.span.end);
        Some(found.unwrap_or(self.blocks.len() - 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Paragraph,
    Table,
}

/// Split document text into ordered blocks
pub fn segment(text: &str) -> Vec<Block> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut run: Option<(Range<usize>, RunKind)> = None;
    let mut fence: Option<(Range<usize>, FenceMarker)> = None;

    let mut offset = 0;
    for raw_line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += raw_line.len();

        let content = raw_line.strip_suffix('\n').unwrap_or(raw_line);
        let content = content.strip_suffix('\r').unwrap_or(content);
        let line_end = line_start + content.len();

        // Inside a fence everything is literal until the closing marker.
        if let Some((mut span, open)) = fence.take() {
            span.end = line_end;
            if closes_fence(content, open) {
                spans.push(span);
            } else {
                fence = Some((span, open));
            }
            continue;
        }

        if content.trim().is_empty() {
            if let Some((span, _)) = run.take() {
                spans.push(span);
            }
            continue;
        }

        if let Some(open) = fence_marker(content) {
            if let Some((span, _)) = run.take() {
                spans.push(span);
            }
            fence = Some((line_start..line_end, open));
            continue;
        }

        if is_atx_heading(content) {
            if let Some((span, _)) = run.take() {
                spans.push(span);
            }
            spans.push(line_start..line_end);
            continue;
        }

        let kind = if content.trim_start().starts_with('|') {
            RunKind::Table
        } else {
            RunKind::Paragraph
        };

        match run.take() {
            Some((mut span, current)) if current == kind => {
                span.end = line_end;
                run = Some((span, current));
            }
            Some((span, _)) => {
                spans.push(span);
                run = Some((line_start..line_end, kind));
            }
            None => run = Some((line_start..line_end, kind)),
        }
    }

    // Unterminated fence extends to end-of-document.
    if let Some((span, _)) = fence.take() {
        spans.push(span);
    }
    if let Some((span, _)) = run.take() {
        spans.push(span);
    }

    build_blocks(text, spans)
}

fn build_blocks(text: &str, spans: Vec<Range<usize>>) -> Vec<Block> {
    let mut occurrences: HashMap<ContentHash, u64> = HashMap::new();
    spans
        .into_iter()
        .enumerate()
        .map(|(order_index, span)| {
            let raw_text = text[span.clone()].to_string();
            let content_hash = ContentHash::of(&raw_text);
            let occurrence = occurrences.entry(content_hash).or_insert(0);
            let id = derive_block_id(&content_hash, *occurrence);
            *occurrence += 1;

            Block {
                id,
                content_hash,
                raw_text,
                rendered_html: None,
                order_index,
                span,
            }
        })
        .collect()
}

/// Stable id from content fingerprint and occurrence index
fn derive_block_id(hash: &ContentHash, occurrence: u64) -> BlockId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(hash.as_bytes());
    hasher.update(&occurrence.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    BlockId(u64::from_le_bytes(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FenceMarker {
    delimiter: char,
    count: usize,
}

fn fence_marker(line: &str) -> Option<FenceMarker> {
    let trimmed = line.trim_start();
    let delimiter = trimmed.chars().next()?;
    if delimiter != '`' && delimiter != '~' {
        return None;
    }
    let count = trimmed.chars().take_while(|&c| c == delimiter).count();
    if count >= 3 {
        Some(FenceMarker { delimiter, count })
    } else {
        None
    }
}

fn closes_fence(line: &str, open: FenceMarker) -> bool {
    let trimmed = line.trim_start();
    let count = trimmed.chars().take_while(|&c| c == open.delimiter).count();
    count >= open.count && trimmed.chars().skip(count).all(|c| c.is_whitespace())
}

fn is_atx_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes)
        && matches!(trimmed.as_bytes().get(hashes), None | Some(b' ') | Some(b'\t'))
}
