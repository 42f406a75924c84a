//! Semantic-boundary text chunker.
//!
//! Splits plain document text into fragments bounded by `max_chunk_size`
//! characters. Splitting prefers heading boundaries, then paragraph
//! boundaries, then sentence boundaries; a single sentence longer than the
//! limit stands alone rather than being cut mid-sentence. Fragments
//! shorter than `min_fragment_len` (stray headings, separators) are
//! dropped at the end.
//!
//! Adjacent chunks carry no overlapping text. Sliding-window overlap would
//! improve retrieval recall at chunk boundaries; the chunker keeps the
//! simpler contiguous split.

/// Chunk size used when indexing document content.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4000;

/// Fragments shorter than this are treated as noise and dropped.
pub const DEFAULT_MIN_FRAGMENT_LEN: usize = 50;

/// Split `text` into non-empty fragments of at most `max_chunk_size`
/// characters, except where a single sentence alone exceeds the limit.
pub fn chunk_text(text: &str, max_chunk_size: usize, min_fragment_len: usize) -> Vec<String> {
    let clean = normalize_whitespace(text);
    if clean.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();

    for section in split_sections(&clean) {
        if section.len() <= max_chunk_size {
            chunks.push(section.to_string());
            continue;
        }

        let mut buf = String::new();
        for paragraph in section.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            if paragraph.len() > max_chunk_size {
                flush(&mut chunks, &mut buf);
                pack_sentences(&mut chunks, paragraph, max_chunk_size);
                continue;
            }

            let would_be = if buf.is_empty() {
                paragraph.len()
            } else {
                buf.len() + 2 + paragraph.len()
            };
            if would_be > max_chunk_size {
                flush(&mut chunks, &mut buf);
            }
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(paragraph);
        }
        flush(&mut chunks, &mut buf);
    }

    chunks
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| c.len() >= min_fragment_len)
        .collect()
}

fn flush(chunks: &mut Vec<String>, buf: &mut String) {
    if !buf.trim().is_empty() {
        chunks.push(buf.trim().to_string());
    }
    buf.clear();
}

/// Greedily pack sentences up to the limit. A sentence exceeding the limit
/// by itself becomes its own fragment.
fn pack_sentences(chunks: &mut Vec<String>, paragraph: &str, max_chunk_size: usize) {
    let mut buf = String::new();
    for sentence in split_sentences(paragraph) {
        if buf.len() + sentence.len() > max_chunk_size && !buf.trim().is_empty() {
            flush(chunks, &mut buf);
        }
        if sentence.len() > max_chunk_size {
            flush(chunks, &mut buf);
            chunks.push(sentence.trim().to_string());
            continue;
        }
        buf.push_str(sentence);
        buf.push(' ');
    }
    flush(chunks, &mut buf);
}

/// Collapse horizontal whitespace runs and squeeze blank-line runs down to
/// single paragraph breaks, keeping line structure for heading detection.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        blank_run = 0;
    }
    out
}

/// Split at Markdown-style heading lines, keeping the heading with the
/// section it introduces.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if is_heading(line) && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current.clear();
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }
    sections
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// Split on sentence-ending punctuation followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let next = i + 1;
            if next >= bytes.len() || bytes[next].is_ascii_whitespace() {
                let piece = text[start..next].trim();
                if !piece.is_empty() {
                    sentences.push(piece);
                }
                start = next;
            }
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("A short note about expense approvals.", 1000, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "A short note about expense approvals.");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 1000, 10).is_empty());
        assert!(chunk_text("   \n\n  ", 1000, 10).is_empty());
    }

    #[test]
    fn test_paragraphs_packed_greedily() {
        let text = "First paragraph about billing.\n\nSecond paragraph about invoices.\n\nThird paragraph about refunds.";
        let chunks = chunk_text(text, 70, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 70, "fragment too long: {}", c.len());
        }
    }

    #[test]
    fn test_oversize_paragraph_split_at_sentences() {
        let text = "Open the admin panel. Select the billing tab. Export the monthly report. Archive the previous export.";
        let chunks = chunk_text(text, 60, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 60, "fragment too long: {:?}", c);
            assert!(c.ends_with('.'));
        }
    }

    #[test]
    fn test_single_long_sentence_stands_alone() {
        let long = format!(
            "This single sentence {} never ends.",
            "keeps going and going ".repeat(10)
        );
        let text = format!("Short intro sentence here. {}", long);
        let chunks = chunk_text(&text, 80, 10);
        assert!(chunks.iter().any(|c| c.len() > 80));
        assert!(chunks.iter().any(|c| c.contains("never ends")));
    }

    #[test]
    fn test_all_words_preserved() {
        let text = "# Setup\n\nInstall the agent on every host.\n\nVerify connectivity afterwards.\n\n# Rollout\n\nEnable the feature flag for one tenant. Watch the dashboards closely. Then enable it everywhere.";
        let chunks = chunk_text(text, 1000, 3);
        let joined = chunks.join(" ");
        for word in text.split_whitespace() {
            assert!(joined.contains(word), "missing word: {}", word);
        }
    }

    #[test]
    fn test_noise_fragments_dropped() {
        let text = "# X\n\nA real paragraph with enough length to survive the noise filter in place.";
        let chunks = chunk_text(text, 30, 50);
        assert!(chunks.iter().all(|c| c.len() >= 50));
        assert!(!chunks.iter().any(|c| c == "# X"));
    }

    #[test]
    fn test_headings_start_new_sections() {
        let text = "# Alpha\n\nAlpha body text that is long enough to matter here.\n\n# Beta\n\nBeta body text that is long enough to matter here.";
        let chunks = chunk_text(text, 70, 10);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].contains("Alpha"));
        assert!(!chunks[0].contains("Beta body"));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha paragraph body.\n\nBeta paragraph body.\n\nGamma paragraph body.";
        assert_eq!(chunk_text(text, 40, 5), chunk_text(text, 40, 5));
    }
}
