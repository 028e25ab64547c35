//! Splits a raw response into prose and positioned instructions.
//!
//! Handled fences (`image`, `audio`, `ui`, `voice`, `video`) are located
//! first and hidden from the JSON scan, so JSON written inside a `ui` fence
//! stays that fence's payload. The JSON scan is bracket-balanced and
//! string-aware, and braces inside double-quoted prose never open a section.
//! Out-of-band `tool_calls` get negative positions so they run before
//! anything found in the text, in array order.

use std::ops::Range;

use serde_json::Value;

use crate::assembler::collapse_newlines;
use crate::json_repair;

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceKind {
    Image,
    Audio,
    Ui,
    Voice,
    Video,
}

impl FenceKind {
    pub fn parse(lang: &str) -> Option<FenceKind> {
        match lang {
            "image" => Some(FenceKind::Image),
            "audio" => Some(FenceKind::Audio),
            "ui" => Some(FenceKind::Ui),
            "voice" => Some(FenceKind::Voice),
            "video" => Some(FenceKind::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FenceKind::Image => "image",
            FenceKind::Audio => "audio",
            FenceKind::Ui => "ui",
            FenceKind::Voice => "voice",
            FenceKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Entry of the message's out-of-band `tool_calls` array
    ToolCall(Value),
    /// JSON object or array embedded in the prose
    Section(Value),
    /// Handled fence; `content` is trimmed and non-empty
    Fence { kind: FenceKind, content: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset in the source text; negative for tool calls
    pub position: i64,
    pub kind: InstructionKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub instructions: Vec<Instruction>,
    pub leftover_text: String,
}

/// A complete triple-backtick block.
#[derive(Debug, Clone)]
pub(crate) struct FenceSpan {
    pub span: Range<usize>,
    pub lang: String,
    pub content: Range<usize>,
}

/// Every complete fence in `text`, in order. An unterminated fence (or one
/// without a language line) ends the scan.
pub(crate) fn scan_fences(text: &str) -> Vec<FenceSpan> {
    let mut fences = Vec::new();
    let mut idx = 0;
    while let Some(offset) = text[idx..].find(FENCE) {
        let start = idx + offset;
        let lang_start = start + FENCE.len();
        let Some(lang_len) = text[lang_start..].find('\n') else {
            break;
        };
        let lang_end = lang_start + lang_len;
        let body_start = lang_end + 1;
        let Some(body_len) = text[body_start..].find(FENCE) else {
            break;
        };
        let body_end = body_start + body_len;
        let end = body_end + FENCE.len();
        fences.push(FenceSpan {
            span: start..end,
            lang: text[lang_start..lang_end].trim().to_lowercase(),
            content: body_start..body_end,
        });
        idx = end;
    }
    fences
}

struct Section {
    span: Range<usize>,
    value: Value,
}

/// Balanced `{...}` / `[...]` runs that repair to a genuine object or array.
fn scan_json_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut start: Option<usize> = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;
    // Double quotes in the surrounding prose; reset at each line break
    let mut in_prose_quote = false;

    for (i, ch) in text.char_indices() {
        let Some(section_start) = start else {
            match ch {
                '"' => in_prose_quote = !in_prose_quote,
                '\n' => in_prose_quote = false,
                _ => {}
            }
            if (ch == '{' || ch == '[') && !in_prose_quote {
                start = Some(i);
                depth = 1;
                in_string = false;
                escape = false;
            }
            continue;
        };
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    let end = i + ch.len_utf8();
                    let snippet = &text[section_start..end];
                    if let Some(value) = json_repair::try_parse(snippet) {
                        if value.is_object() || value.is_array() {
                            sections.push(Section {
                                span: section_start..end,
                                value,
                            });
                        }
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }
    sections
}

/// Same text with `ranges` blanked to spaces; byte offsets are unchanged.
fn mask(text: &str, ranges: &[Range<usize>]) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for range in ranges {
        for b in &mut bytes[range.clone()] {
            *b = b' ';
        }
    }
    // Ranges are whole fence spans starting and ending on ASCII backticks, so
    // every multibyte character in them is blanked completely
    String::from_utf8(bytes).unwrap_or_else(|_| text.to_string())
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Drop fences whose body is blank, typically a ```json block emptied by
/// section extraction.
fn drop_empty_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for fence in scan_fences(text) {
        if text[fence.content.clone()].trim().is_empty() {
            out.push_str(&text[last..fence.span.start]);
            last = fence.span.end;
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Split `raw_text` into prose and instructions, ordered by position.
pub fn extract(raw_text: &str, tool_calls: &[Value]) -> Extraction {
    let mut instructions = Vec::new();
    let mut leftover = String::new();

    if !raw_text.trim().is_empty() {
        let handled: Vec<(FenceSpan, FenceKind)> = scan_fences(raw_text)
            .into_iter()
            .filter_map(|f| FenceKind::parse(&f.lang).map(|kind| (f, kind)))
            .collect();
        let fence_spans: Vec<Range<usize>> = handled.iter().map(|(f, _)| f.span.clone()).collect();
        // A section wrapped around a handled fence only parses because the
        // fence was blanked; the fence wins
        let sections: Vec<Section> = scan_json_sections(&mask(raw_text, &fence_spans))
            .into_iter()
            .filter(|section| !fence_spans.iter().any(|f| overlaps(f, &section.span)))
            .collect();

        let mut removed: Vec<Range<usize>> = fence_spans;
        for (fence, kind) in handled {
            let content = raw_text[fence.content].trim();
            if !content.is_empty() {
                instructions.push(Instruction {
                    position: fence.span.start as i64,
                    kind: InstructionKind::Fence {
                        kind,
                        content: content.to_string(),
                    },
                });
            }
        }
        for section in sections {
            instructions.push(Instruction {
                position: section.span.start as i64,
                kind: InstructionKind::Section(section.value),
            });
            removed.push(section.span);
        }

        removed.sort_by_key(|r| r.start);
        let mut prose = String::with_capacity(raw_text.len());
        let mut last = 0;
        for range in removed {
            if range.start > last {
                prose.push_str(&raw_text[last..range.start]);
            }
            last = last.max(range.end);
        }
        prose.push_str(&raw_text[last..]);
        leftover = collapse_newlines(&drop_empty_fences(&prose))
            .trim()
            .to_string();
    }

    let call_count = tool_calls.len() as i64;
    for (i, call) in tool_calls.iter().enumerate() {
        instructions.push(Instruction {
            position: i as i64 - call_count,
            kind: InstructionKind::ToolCall(call.clone()),
        });
    }

    instructions.sort_by_key(|ins| ins.position);
    Extraction {
        instructions,
        leftover_text: leftover,
    }
}
