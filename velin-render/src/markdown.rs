//! Default markdown render backend built on pulldown-cmark.

use crate::{RenderBackend, RenderError};
use pulldown_cmark::{html, Options, Parser};

/// Markdown-to-HTML backend used when the host editor does not supply its
/// own conversion
///
/// Stateless apart from the parser option set, so a single instance can be
/// shared across all worker threads.
pub struct MarkdownBackend {
    options: Options,
}

impl MarkdownBackend {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        Self { options }
    }
}

impl Default for MarkdownBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for MarkdownBackend {
    fn render_block(&self, raw_text: &str) -> Result<String, RenderError> {
        let parser = Parser::new_ext(raw_text, self.options);
        let mut output = String::with_capacity(raw_text.len() * 2);
        html::push_html(&mut output, parser);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading() {
        let backend = MarkdownBackend::new();
        let html = backend.render_block("# Title").unwrap();

        assert!(html.contains("<h1>Title</h1>"), "got: {}", html);
    }

    #[test]
    fn test_paragraph() {
        let backend = MarkdownBackend::new();
        let html = backend.render_block("Para one.").unwrap();

        assert!(html.contains("<p>Para one.</p>"), "got: {}", html);
    }

    #[test]
    fn test_code_fence() {
        let backend = MarkdownBackend::new();
        let html = backend.render_block("```rust\nfn main() {}\n```").unwrap();

        assert!(html.contains("<pre><code"), "got: {}", html);
        assert!(html.contains("fn main"), "got: {}", html);
    }

    #[test]
    fn test_table() {
        let backend = MarkdownBackend::new();
        let html = backend
            .render_block("| a | b |\n|---|---|\n| 1 | 2 |")
            .unwrap();

        assert!(html.contains("<table>"), "got: {}", html);
        assert!(html.contains("<td>1</td>"), "got: {}", html);
    }

    #[test]
    fn test_deterministic() {
        let backend = MarkdownBackend::new();
        let a = backend.render_block("Some *emphasis* here.").unwrap();
        let b = backend.render_block("Some *emphasis* here.").unwrap();

        assert_eq!(a, b);
    }
}
