//! # velin-render
//!
//! Render backend adapter for the velin preview engine.
//!
//! The engine treats markup-to-HTML conversion as an opaque pure function
//! behind the [`RenderBackend`] trait: side-effect free, deterministic for a
//! given input, and safe to call concurrently from worker threads. This
//! crate provides the trait, the default markdown implementation
//! ([`MarkdownBackend`]), and the HTML escaping helpers the engine uses when
//! it has to synthesize fragments itself (placeholders, inline errors).

pub mod escape;
pub mod markdown;

pub use escape::escape_html;
pub use markdown::MarkdownBackend;

/// Errors produced by a render backend for a single block
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The backend failed to convert the block
    #[error("render backend failed: {0}")]
    Backend(String),
}

/// Opaque markup-to-HTML conversion, callable from worker threads
///
/// Implementations must be pure: no side effects, and identical input
/// always produces identical output. The engine relies on this to treat
/// equal content hashes as interchangeable.
pub trait RenderBackend: Send + Sync {
    /// Convert one block of raw markup into an HTML fragment
    fn render_block(&self, raw_text: &str) -> Result<String, RenderError>;
}

impl<T: RenderBackend + ?Sized> RenderBackend for std::sync::Arc<T> {
    fn render_block(&self, raw_text: &str) -> Result<String, RenderError> {
        (**self).render_block(raw_text)
    }
}
