//! Accumulate streaming Agent deltas; flush on size, idle, or end (§4.4).

use std::time::{Duration, Instant};

use iris_core::config::{BreakOn, StreamingConfig};
use regex::Regex;
use std::sync::OnceLock;

fn sentence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+[A-Z]").expect("valid sentence regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushKind {
    /// First emission: send as a new outbound message.
    NewMessage,
    /// Subsequent emission under `editInPlace`: replace the first message's text.
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    pub text: String,
    pub kind: FlushKind,
}

/// Per-`agentSessionId` state machine. Not `Send`-shared directly — the
/// router keys one coalescer per in-flight session and serializes access
/// to it (§5 concurrency model).
pub struct StreamCoalescer {
    config: StreamingConfig,
    buffer: String,
    full_text: String,
    has_flushed_once: bool,
    last_append: Option<Instant>,
}

impl StreamCoalescer {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config, buffer: String::new(), full_text: String::new(), has_flushed_once: false, last_append: None }
    }

    /// Grow the buffer, reset the idle timer, and flush as many full chunks
    /// as the buffer now permits.
    pub fn append(&mut self, delta: &str) -> Vec<Flush> {
        self.buffer.push_str(delta);
        self.full_text.push_str(delta);
        self.last_append = Some(Instant::now());

        let mut flushes = Vec::new();
        while self.buffer.len() >= self.config.max_chars {
            let split = break_point(&self.buffer, self.config.max_chars, self.config.break_on);
            let chunk: String = self.buffer.drain(..split).collect();
            flushes.push(self.emit(chunk));
        }
        flushes
    }

    /// Whether the idle timer has elapsed with enough buffered content to
    /// be worth flushing. The caller (router) polls this on its own timer.
    pub fn should_idle_flush(&self) -> bool {
        let Some(last) = self.last_append else { return false };
        !self.buffer.is_empty()
            && self.buffer.len() >= self.config.min_chars
            && last.elapsed() >= Duration::from_millis(self.config.idle_ms)
    }

    /// Flush on idle timeout, per `should_idle_flush`'s check.
    pub fn flush_idle(&mut self) -> Option<Flush> {
        if !self.should_idle_flush() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(self.emit(text))
    }

    /// Flush any residue unconditionally; cancels the idle timer.
    pub fn end(&mut self) -> Option<Flush> {
        self.last_append = None;
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(self.emit(text))
    }

    fn emit(&mut self, chunk: String) -> Flush {
        if self.config.edit_in_place && self.has_flushed_once {
            Flush { text: self.full_text.clone(), kind: FlushKind::Edit }
        } else {
            self.has_flushed_once = true;
            Flush { text: chunk, kind: FlushKind::NewMessage }
        }
    }
}

/// Find the best split point for `buffer` at or before `max_chars`, biased
/// toward the configured boundary preference, falling back to a hard cut.
fn break_point(buffer: &str, max_chars: usize, break_on: BreakOn) -> usize {
    let window_end = char_safe_floor(buffer, max_chars.min(buffer.len()));

    let found = match break_on {
        BreakOn::Paragraph => window_end.rfind("\n\n").map(|p| p + 2),
        BreakOn::Sentence => sentence_regex().find_iter(&buffer[..window_end]).last().map(|m| m.end() - 1),
        BreakOn::Word => window_end.rfind(' ').map(|p| p + 1),
    };

    found.filter(|&p| p > 0 && p <= window_end).unwrap_or_else(|| window_end.max(1))
}

fn char_safe_floor(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: usize, max: usize, break_on: BreakOn, edit_in_place: bool) -> StreamingConfig {
        StreamingConfig { enabled: true, min_chars: min, max_chars: max, idle_ms: 50, break_on, edit_in_place }
    }

    #[test]
    fn append_flushes_at_word_boundary_when_over_max_chars() {
        let mut c = StreamCoalescer::new(config(10, 20, BreakOn::Word, false));
        let mut flushes = c.append("Hello ");
        flushes.extend(c.append("world this "));
        flushes.extend(c.append("is a long "));
        flushes.extend(c.append("message."));
        let end_flush = c.end();

        let mut all_text: String = flushes.iter().map(|f| f.text.clone()).collect();
        if let Some(f) = &end_flush {
            all_text.push_str(&f.text);
        }
        assert_eq!(all_text, "Hello world this is a long message.");
        for f in &flushes {
            assert!(f.text.len() <= 20);
        }
    }

    #[test]
    fn end_flushes_residue_unconditionally_even_below_min_chars() {
        let mut c = StreamCoalescer::new(config(100, 200, BreakOn::Word, false));
        c.append("hi");
        let flush = c.end();
        assert_eq!(flush.unwrap().text, "hi");
    }

    #[test]
    fn end_with_empty_buffer_emits_nothing() {
        let mut c = StreamCoalescer::new(config(10, 20, BreakOn::Word, false));
        assert!(c.end().is_none());
    }

    #[test]
    fn edit_in_place_sends_full_text_on_second_flush() {
        let mut c = StreamCoalescer::new(config(1, 5, BreakOn::Word, true));
        let first = c.append("abcde");
        assert_eq!(first[0].kind, FlushKind::NewMessage);
        assert_eq!(first[0].text, "abcde");

        let second = c.append("fghij");
        assert_eq!(second[0].kind, FlushKind::Edit);
        assert_eq!(second[0].text, "abcdefghij");
    }

    #[test]
    fn should_idle_flush_requires_min_chars_and_elapsed_idle() {
        let mut c = StreamCoalescer::new(config(5, 1000, BreakOn::Word, false));
        c.append("ab");
        assert!(!c.should_idle_flush());
        c.append("cdef");
        std::thread::sleep(Duration::from_millis(60));
        assert!(c.should_idle_flush());
        let flush = c.flush_idle().unwrap();
        assert_eq!(flush.text, "abcdef");
        assert!(!c.should_idle_flush());
    }
}
