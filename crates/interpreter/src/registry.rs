//! Tool registry and loose tool-name normalization.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use shared::tool::Tool;

pub const IMAGE: &str = "image";
pub const TTS: &str = "tts";
pub const UI: &str = "ui";

const IMAGE_HINTS: &[&str] = &["image", "picture", "photo", "draw", "art"];
const TTS_HINTS: &[&str] = &["audio", "speak", "voice", "sound", "speech", "tts"];
const UI_HINTS: &[&str] = &["ui", "command", "action", "control"];

/// Map a model-supplied tool name onto a canonical one.
///
/// Matching is by lower-cased substring, checked image, then tts, then ui;
/// anything else passes through lower-cased. `None` for a blank name.
pub fn map_tool_name(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }
    let normalized = name.to_lowercase();
    let contains_any = |hints: &[&str]| hints.iter().any(|h| normalized.contains(h));

    let canonical = if contains_any(IMAGE_HINTS) {
        IMAGE.to_string()
    } else if contains_any(TTS_HINTS) {
        TTS.to_string()
    } else if contains_any(UI_HINTS) {
        UI.to_string()
    } else {
        normalized
    };
    Some(canonical)
}

/// Registry of invocable tools keyed by canonical name
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its lower-cased name, replacing any previous one
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_lowercase(), tool);
        self
    }

    /// Exact lookup by canonical name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Normalize a loose name, then look it up.
    pub fn resolve(&self, name: &str) -> Option<(String, &Arc<dyn Tool>)> {
        let canonical = map_tool_name(name)?;
        let tool = self.tools.get(&canonical)?;
        Some((canonical, tool))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function-tool definitions in the chat API's `tools` format.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }
}
