//! Heading-aware, overlapping chunking of note text into passage-level windows.

use serde::{Deserialize, Serialize};

/// Heading level at which a note is split into independent sections before
/// windowing. `None` treats the whole note as a single section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
    None,
}

impl HeadingLevel {
    fn marker(self) -> Option<&'static str> {
        match self {
            HeadingLevel::H1 => Some("# "),
            HeadingLevel::H2 => Some("## "),
            HeadingLevel::H3 => Some("### "),
            HeadingLevel::None => None,
        }
    }
}

/// Clamp chunk size to [200, 2000] words.
pub fn clamp_chunk_words(words: usize) -> usize {
    words.clamp(200, 2000)
}

/// Clamp overlap to [0, size - 1].
pub fn clamp_overlap_words(overlap: usize, size: usize) -> usize {
    if size == 0 {
        0
    } else {
        overlap.min(size - 1)
    }
}

/// A single windowed passage before it is assigned an ordinal/key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub start_word: usize,
    pub end_word: usize,
    pub text: String,
}

/// Split `text` at Markdown headings of `level` (if not `None`), returning the
/// section bodies in order. A heading line is dropped from its own section's
/// body but still marks where the next section begins.
///
/// If `level` requires headings and none are found, returns no sections at
/// all — a file with no matching heading is deliberately skipped rather than
/// falling back to treating the whole text as one section.
fn split_sections(text: &str, level: HeadingLevel) -> Vec<String> {
    let Some(marker) = level.marker() else {
        return vec![text.to_string()];
    };

    let mut sections = Vec::new();
    let mut current = String::new();
    let mut seen_heading = false;

    for line in text.lines() {
        let is_heading = is_heading_at_level(line, marker);
        if is_heading {
            if seen_heading || !current.trim().is_empty() {
                sections.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            seen_heading = true;
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    if seen_heading && (!current.trim().is_empty() || sections.is_empty()) {
        sections.push(current);
    }

    if !seen_heading {
        return Vec::new();
    }

    sections.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// A line is a heading "at level" `marker` when it starts with exactly that
/// many `#` characters followed by a space (so `## ` does not also match as
/// an `# ` heading).
fn is_heading_at_level(line: &str, marker: &str) -> bool {
    let trimmed = line.trim_start();
    if !trimmed.starts_with(marker) {
        return false;
    }
    let hashes = marker.trim_end().len();
    // The character right after the marker's hashes must not be another '#'.
    trimmed.as_bytes().get(hashes) != Some(&b'#')
}

/// Slide a window of `size` words with step `max(1, size - overlap)` over
/// `section`, emitting one `RawChunk` per window. Offsets are section-local.
fn window_section(section: &str, size: usize, overlap: usize) -> Vec<RawChunk> {
    let words: Vec<&str> = section.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    if words.len() <= size {
        return vec![RawChunk {
            start_word: 0,
            end_word: words.len(),
            text: words.join(" "),
        }];
    }

    let step = (size.saturating_sub(overlap)).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(words.len());
        chunks.push(RawChunk {
            start_word: start,
            end_word: end,
            text: words[start..end].join(" "),
        });
        if end >= words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk raw note text per §4.1: split into heading sections (if requested),
/// then slide a word window over each section independently.
pub fn chunk_text(text: &str, size_words: usize, overlap_words: usize, heading: HeadingLevel) -> Vec<RawChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let size = clamp_chunk_words(size_words);
    let overlap = clamp_overlap_words(overlap_words, size);

    let sections = split_sections(text, heading);
    let mut out = Vec::new();
    for section in sections {
        out.extend(window_section(&section, size, overlap));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_zero_chunks() {
        assert!(chunk_text("", 200, 50, HeadingLevel::None).is_empty());
        assert!(chunk_text("   \n\t", 200, 50, HeadingLevel::H2).is_empty());
    }

    #[test]
    fn short_section_yields_one_chunk() {
        let chunks = chunk_text("the quick brown fox", 200, 50, HeadingLevel::None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_word, 0);
        assert_eq!(chunks[0].end_word, 4);
    }

    #[test]
    fn sliding_window_covers_whole_text_with_overlap() {
        let words: Vec<String> = (0..450).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text, 200, 50, HeadingLevel::None);
        // step = 150; windows: [0,200), [150,350), [300,450)
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_word, 0);
        assert_eq!(chunks[0].end_word, 200);
        assert_eq!(chunks[1].start_word, 150);
        assert_eq!(chunks[1].end_word, 350);
        assert_eq!(chunks[2].start_word, 300);
        assert_eq!(chunks[2].end_word, 450);
    }

    #[test]
    fn heading_mode_splits_into_independent_sections() {
        let text = "# Intro\nhello world\n# Body\nfoo bar baz";
        let chunks = chunk_text(text, 200, 0, HeadingLevel::H1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.trim(), "hello world");
        assert_eq!(chunks[1].text.trim(), "foo bar baz");
    }

    #[test]
    fn heading_mode_with_no_matching_heading_yields_zero_chunks() {
        // No H2 heading present anywhere — the file is deliberately skipped.
        let text = "# Only an H1\nsome words here";
        let chunks = chunk_text(text, 200, 0, HeadingLevel::H2);
        assert!(chunks.is_empty());
    }

    #[test]
    fn clamps_are_applied() {
        assert_eq!(clamp_chunk_words(10), 200);
        assert_eq!(clamp_chunk_words(5000), 2000);
        assert_eq!(clamp_overlap_words(900, 200), 199);
    }
}
