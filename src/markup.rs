//! Rich-text to plain-text reduction.
//!
//! Stored document content is rich text (HTML from the editing surface).
//! Embeddings over markup are lower quality, and the chunker needs
//! paragraph boundaries, so closing block tags become blank lines before
//! the markup is stripped.

use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;

static BLOCK_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(p|div|h[1-6]|li|ul|ol|section|article|blockquote|tr|pre)>|<br\s*/?>")
        .expect("block boundary pattern")
});

/// Reduce rich text to plain text, preserving paragraph boundaries as
/// blank lines. Plain-text input passes through with whitespace intact.
pub fn strip_markup(content: &str) -> String {
    if !content.contains('<') {
        return content.trim().to_string();
    }

    let with_breaks = BLOCK_BOUNDARY.replace_all(content, "\n\n");
    let fragment = Html::parse_fragment(&with_breaks);
    let text: String = fragment.root_element().text().collect();

    // Collapse runs of blank lines introduced by nested block elements.
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line.trim_end());
        blank_run = 0;
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        let text = "First paragraph.\n\nSecond paragraph.";
        assert_eq!(strip_markup(text), text);
    }

    #[test]
    fn test_tags_removed() {
        let html = "<p>Hello <strong>world</strong></p>";
        assert_eq!(strip_markup(html), "Hello world");
    }

    #[test]
    fn test_block_tags_become_paragraphs() {
        let html = "<h1>Title</h1><p>First.</p><p>Second.</p>";
        let plain = strip_markup(html);
        assert_eq!(plain, "Title\n\nFirst.\n\nSecond.");
    }

    #[test]
    fn test_entities_decoded() {
        let html = "<p>Fish &amp; chips</p>";
        assert_eq!(strip_markup(html), "Fish & chips");
    }

    #[test]
    fn test_list_items_separated() {
        let html = "<ul><li>one</li><li>two</li></ul>";
        let plain = strip_markup(html);
        assert!(plain.contains("one"));
        assert!(plain.contains("two"));
        assert_ne!(plain, "onetwo");
    }
}
