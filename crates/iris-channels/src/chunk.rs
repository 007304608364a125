//! Split oversized outbound text along paragraph/sentence/word boundaries to
//! per-platform limits, without dropping or reordering any character.

use std::sync::OnceLock;

use regex::Regex;

/// Per-platform outbound text limits (§4.3).
pub const MAX_LEN_TELEGRAM: usize = 4096;
pub const MAX_LEN_DISCORD: usize = 2000;
pub const MAX_LEN_WHATSAPP: usize = 65536;
pub const MAX_LEN_SLACK: usize = 40000;

/// A boundary is only accepted past this fraction of `max_length`, to avoid
/// emitting tiny leading chunks.
const MIN_BOUNDARY_FRACTION: f64 = 0.30;

fn sentence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+[A-Z]").expect("valid sentence regex"))
}

/// Split `text` into ordered, non-empty substrings whose concatenation
/// equals `text` and each of which is at most `max_length` bytes.
pub fn chunk_text(text: &str, max_length: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    assert!(max_length > 0, "max_length must be positive");

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > max_length {
        let split_at = best_break_point(remaining, max_length);
        let (head, tail) = remaining.split_at(split_at);
        chunks.push(head.to_string());
        remaining = tail;
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }

    chunks
}

/// Find the best byte offset at which to split `text` (itself possibly
/// longer than `max_length`), preferring — in order — a paragraph break, a
/// sentence boundary, a bare newline, a word boundary, then a hard cut.
/// The chosen offset never exceeds `max_length` and is always > 0.
fn best_break_point(text: &str, max_length: usize) -> usize {
    let window_end = max_length.min(text.len());
    let window = char_safe_floor(text, window_end);
    let min_floor = ((max_length as f64) * MIN_BOUNDARY_FRACTION) as usize;

    if let Some(pos) = find_last_after(window, "\n\n", min_floor) {
        return pos;
    }

    if let Some(m) = sentence_regex().find_iter(window).last() {
        // Split right after the whitespace, before the capital letter —
        // i.e. at `m.end() - 1` (the matched capital letter stays in the
        // next chunk).
        let split = m.end() - 1;
        if split > min_floor && split <= window.len() {
            return split;
        }
    }

    if let Some(pos) = find_last_after(window, "\n", min_floor) {
        return pos;
    }

    if let Some(pos) = find_last_after(window, " ", min_floor) {
        return pos;
    }

    window_end.max(1)
}

/// Byte offset just after the last occurrence of `needle` in `haystack`,
/// provided that offset is greater than `min_floor`.
fn find_last_after(haystack: &str, needle: &str, min_floor: usize) -> Option<usize> {
    let pos = haystack.rfind(needle)?;
    let end = pos + needle.len();
    if end > min_floor && end <= haystack.len() {
        Some(end)
    } else {
        None
    }
}

/// Clamp `idx` down to the nearest char boundary at or before `idx`, so we
/// never split inside a multi-byte UTF-8 sequence.
fn char_safe_floor(text: &str, idx: usize) -> &str {
    let mut idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    &text[..idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trips(text: &str, max: usize) {
        let chunks = chunk_text(text, max);
        let joined: String = chunks.concat();
        assert_eq!(joined, text, "chunks must concatenate back to the input");
        for c in &chunks {
            assert!(!c.is_empty());
            assert!(c.len() <= max, "chunk exceeded max_length: {} > {}", c.len(), max);
        }
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = chunk_text("hello", 100);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn paragraph_boundary_preferred() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        assert_round_trips(text, 35);
        let chunks = chunk_text(text, 35);
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let text = "a".repeat(100);
        assert_round_trips(&text, 10);
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks.len(), 10);
    }

    #[test]
    fn word_boundary_used_for_long_plain_text() {
        let text = "one two three four five six seven eight nine ten";
        assert_round_trips(text, 20);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert_eq!(chunk_text("", 10), Vec::<String>::new());
    }

    #[test]
    fn multibyte_text_never_splits_mid_char() {
        let text = "héllo wörld ".repeat(20);
        assert_round_trips(&text, 15);
    }
}
