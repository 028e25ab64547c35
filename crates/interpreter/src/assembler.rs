//! Final text normalization, `[memory]` extraction and display sanitizing.

use std::sync::LazyLock;

use regex::Regex;
use shared::events::InterpreterEvent;
use shared::memory::MemoryStore;
use tracing::{debug, warn};

use crate::context::EventSink;
use crate::extractor::{scan_fences, FenceKind};

static NEWLINE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static BARE_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\n?^[ \t]*---[ \t]*$\n?").expect("valid regex"));

static MEMORY_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\[memory\](.*?)\[/memory\]").expect("valid regex"));

/// Fence kinds hidden from rendered chat text.
pub const DEFAULT_BLOCKED_FENCES: &[FenceKind] = &[FenceKind::Image, FenceKind::Audio, FenceKind::Ui];

/// Runs of three or more newlines become exactly two.
pub fn collapse_newlines(text: &str) -> String {
    NEWLINE_RUN.replace_all(text, "\n\n").into_owned()
}

/// Pad bare `---` lines with a blank line on each side, collapse newline runs
/// and trim.
pub fn normalize_text(text: &str) -> String {
    let padded = BARE_RULE.replace_all(text, "\n\n---\n\n");
    collapse_newlines(&padded).trim().to_string()
}

/// Remove `[memory]...[/memory]` spans (case-insensitive), returning the
/// remaining text and the trimmed, non-empty span bodies in order.
pub fn extract_memories(text: &str) -> (String, Vec<String>) {
    let memories = MEMORY_SPAN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    let stripped = MEMORY_SPAN.replace_all(text, "").into_owned();
    (stripped, memories)
}

/// Strip memory spans, store each once, then normalize what is left.
pub fn finalize_text(text: &str, memory: &dyn MemoryStore, events: &EventSink) -> String {
    let (stripped, memories) = extract_memories(text);
    for entry in memories {
        match memory.add_entry(&entry) {
            Ok(()) => {
                debug!(len = entry.len(), "memory stored");
                events.send(InterpreterEvent::MemoryStored { text: entry });
            }
            Err(e) => warn!("memory store rejected entry: {}", e),
        }
    }
    normalize_text(&stripped)
}

/// Remove fences of the `blocked` kinds from text meant for display.
pub fn sanitize_markdown(text: &str, blocked: &[FenceKind]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for fence in scan_fences(text) {
        let is_blocked = FenceKind::parse(&fence.lang)
            .map(|kind| blocked.contains(&kind))
            .unwrap_or(false);
        if is_blocked {
            out.push_str(&text[last..fence.span.start]);
            last = fence.span.end;
        }
    }
    out.push_str(&text[last..]);
    collapse_newlines(&out).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::memory::InMemoryStore;

    #[test]
    fn test_bare_rule_padding() {
        assert_eq!(normalize_text("Hello\n\n\n\n---"), "Hello\n\n---");
        assert_eq!(normalize_text("a\n---\nb"), "a\n\n---\n\nb");
        assert_eq!(normalize_text("a\n  ---  \nb"), "a\n\n---\n\nb");
        // inline dashes and longer rules are left alone
        assert_eq!(normalize_text("a --- b"), "a --- b");
        assert_eq!(normalize_text("a\n----\nb"), "a\n----\nb");
    }

    #[test]
    fn test_memory_spans_removed() {
        let (text, memories) =
            extract_memories("Sure.[memory]likes cats[/memory] Done [MEMORY] [/Memory]");
        assert_eq!(text, "Sure. Done ");
        assert_eq!(memories, vec!["likes cats"]);
    }

    #[test]
    fn test_multiline_memory() {
        let (text, memories) = extract_memories("[memory]\nline one\nline two\n[/memory]ok");
        assert_eq!(text, "ok");
        assert_eq!(memories, vec!["line one\nline two"]);
    }

    #[test]
    fn test_finalize_forwards_once() {
        let store = InMemoryStore::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let events = EventSink::new(tx);

        let text = finalize_text("Hi [memory]note here[/memory]\n\n\n\nBye", &store, &events);
        assert_eq!(text, "Hi \n\nBye");
        assert_eq!(store.entries(), vec!["note here"]);
        assert!(matches!(
            rx.try_recv(),
            Ok(InterpreterEvent::MemoryStored { text }) if text == "note here"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sanitize_markdown() {
        let text = "See:\n```image\na cat\n```\n```rust\nfn main() {}\n```\n```ui\nclick x\n```";
        assert_eq!(
            sanitize_markdown(text, DEFAULT_BLOCKED_FENCES),
            "See:\n\n```rust\nfn main() {}\n```"
        );
        assert_eq!(sanitize_markdown(text, &[]), text);
    }
}
