//! Executes extracted instructions against the tool registry.
//!
//! The walk is a recursive descent over loosely-shaped JSON. Each object is
//! matched against at most one call shape (function call, `name` +
//! arguments, `tool`, `type`), then its shorthand fields (`image`, `tts`,
//! `ui`, ...) are walked with a forced parent tool, then its text-bearing
//! keys are appended to the output. Keys a tool consumed as its primary
//! argument are skipped by the last two steps, so nothing runs twice.
//!
//! Tools run strictly in instruction order; no invocation starts before the
//! previous one settled.

use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use shared::agent_api::truthy;
use shared::events::InterpreterEvent;
use shared::tool::{AudioOutput, ImageOutput, StructuredOutput, ToolArgs, ToolResult, UiOutput};
use shared::ui_command::{validate, UiCommand};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::assembler::{collapse_newlines, normalize_text};
use crate::context::EventSink;
use crate::extractor::{Extraction, FenceKind, InstructionKind};
use crate::json_repair;
use crate::registry::{map_tool_name, ToolRegistry, IMAGE, TTS, UI};
use crate::tools::ui::parse_command_string;

const ARG_KEYS: &[&str] = &[
    "arguments", "args", "parameters", "payload", "data", "input", "options", "values",
];

const CONTROL_KEYS: &[&str] = &[
    "tool", "name", "type", "function", "tool_calls", "tools", "commands", "command", "ui",
    "image", "images", "audio", "tts", "voice", "speak",
];

const TEXT_KEYS: &[&str] = &["text", "message", "response", "reply", "caption", "description"];

const SHORTHAND_FIELDS: &[(&str, ParentTool)] = &[
    ("image", ParentTool::Image),
    ("images", ParentTool::Image),
    ("audio", ParentTool::Tts),
    ("tts", ParentTool::Tts),
    ("voice", ParentTool::Voice),
    ("speak", ParentTool::Tts),
    ("ui", ParentTool::Ui),
    ("command", ParentTool::Ui),
];

const IMAGE_ARG_KEYS: &[&str] = &["prompt", "description", "text", "query", "input"];
const IMAGE_ORIGINAL_KEYS: &[&str] = &["prompt", "description", "text"];
const TTS_ARG_KEYS: &[&str] = &["text", "prompt", "speech", "say", "message", "content"];
const TTS_ORIGINAL_KEYS: &[&str] = &["text", "speech", "message"];
const VOICE_KEYS: &[&str] = &["text", "message", "prompt", "say", "response"];

/// Tool context forced by a shorthand field such as `{"image": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentTool {
    Image,
    Tts,
    Ui,
    /// Not a tool: values are collected as lines to speak
    Voice,
}

impl ParentTool {
    fn tool_name(&self) -> &'static str {
        match self {
            ParentTool::Image => IMAGE,
            ParentTool::Tts => TTS,
            ParentTool::Ui => UI,
            ParentTool::Voice => "voice",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub parent: Option<ParentTool>,
    pub depth: usize,
}

impl Context {
    fn nested(&self, parent: Option<ParentTool>) -> Context {
        Context {
            parent,
            depth: self.depth + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    /// Deepest nesting walked; anything below is ignored
    pub max_depth: usize,
    /// Top-level instructions processed per pass
    pub max_instructions: usize,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_instructions: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// At least one tool ran to completion
    pub handled: bool,
    pub text: String,
    pub structured: StructuredOutput,
}

/// Where a tool's primary argument came from.
enum Original<'a> {
    Object(&'a Map<String, Value>),
    Scalar(String),
    None,
}

impl Original<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Original::Object(map) => map.get(key).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    fn scalar(&self) -> Option<&str> {
        match self {
            Original::Scalar(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Arguments extracted from an object, plus whether they were copied flat
/// from its own keys (and so name keys of that object).
struct ExtractedArgs {
    args: ToolArgs,
    flat: bool,
}

#[derive(Default)]
struct Execution {
    executed: bool,
    /// Key of the invoking object used as the primary argument
    consumed: Option<&'static str>,
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Argument payload as an object: strings are repaired or become `{prompt}`,
/// arrays become `{values}`, objects are copied.
fn parse_arg_payload(payload: Option<&Value>) -> ToolArgs {
    match payload {
        Some(Value::String(s)) => match json_repair::try_parse(s) {
            Some(Value::Object(map)) => map,
            Some(Value::Array(list)) => single("values", Value::Array(list)),
            _ => single("prompt", Value::String(s.clone())),
        },
        Some(Value::Array(list)) => single("values", Value::Array(list.clone())),
        Some(Value::Object(map)) => map.clone(),
        _ => ToolArgs::new(),
    }
}

fn single(key: &str, value: Value) -> ToolArgs {
    let mut args = ToolArgs::new();
    args.insert(key.to_string(), value);
    args
}

fn extract_args(source: &Map<String, Value>) -> ExtractedArgs {
    for key in ARG_KEYS {
        if let Some(payload) = source.get(*key).filter(|v| !v.is_null()) {
            let parsed = parse_arg_payload(Some(payload));
            if !parsed.is_empty() {
                return ExtractedArgs {
                    args: parsed,
                    flat: false,
                };
            }
        }
    }

    let mut args: ToolArgs = source
        .iter()
        .filter(|(k, _)| !CONTROL_KEYS.contains(&k.as_str()) && !TEXT_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for key in ["prompt", "text"] {
        if let Some(v) = source.get(key).filter(|v| !v.is_null()) {
            args.entry(key).or_insert_with(|| v.clone());
        }
    }
    if let Some(cmd) = source.get("command").filter(|v| v.is_object()) {
        args.entry("command").or_insert_with(|| cmd.clone());
    }
    ExtractedArgs { args, flat: true }
}

/// First non-empty string among `args[arg_keys]`, then `original[original_keys]`,
/// then a scalar original. Reports which key of the invoking object supplied
/// it, if any.
fn pick_primary(
    args: &ToolArgs,
    arg_keys: &[&'static str],
    original: &Original,
    original_keys: &[&'static str],
    flat: bool,
) -> Option<(String, Option<&'static str>)> {
    for key in arg_keys {
        if let Some(s) = non_empty_str(args.get(*key)) {
            return Some((s.to_string(), flat.then_some(*key)));
        }
    }
    for key in original_keys {
        if let Some(s) = non_empty_str(original.get(key)) {
            return Some((s.to_string(), Some(*key)));
        }
    }
    original
        .scalar()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| (s.to_string(), None))
}

/// Executes instructions against a [`ToolRegistry`].
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    events: EventSink,
    limits: DispatchLimits,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            events: EventSink::default(),
            limits: DispatchLimits::default(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_limits(mut self, limits: DispatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run every instruction in order and assemble the outgoing text.
    pub async fn dispatch(&self, extraction: Extraction) -> DispatchOutcome {
        let Extraction {
            mut instructions,
            leftover_text,
        } = extraction;

        if instructions.len() > self.limits.max_instructions {
            warn!(
                total = instructions.len(),
                limit = self.limits.max_instructions,
                "dropping instructions over the per-pass limit"
            );
            instructions.truncate(self.limits.max_instructions);
        }

        let mut pass = Pass {
            dispatcher: self,
            handled: false,
            text: Vec::new(),
            structured: StructuredOutput::default(),
            depth_warned: false,
        };

        for instruction in &instructions {
            let root = Context::default();
            match &instruction.kind {
                InstructionKind::ToolCall(value) | InstructionKind::Section(value) => {
                    pass.process(value, root).await
                }
                InstructionKind::Fence { kind, content } => match kind {
                    FenceKind::Voice => pass.structured.voice.push(content.clone()),
                    FenceKind::Image => {
                        pass.process(&json!({"tool": IMAGE, "prompt": content}), root)
                            .await
                    }
                    FenceKind::Audio => {
                        pass.process(&json!({"tool": TTS, "text": content}), root)
                            .await
                    }
                    FenceKind::Ui => {
                        pass.process(&json!({"tool": UI, "command": content}), root)
                            .await
                    }
                    FenceKind::Video => {
                        pass.process(&json!({"tool": kind.as_str(), "prompt": content}), root)
                            .await
                    }
                },
            }
        }

        let mut parts = Vec::new();
        let leftover = collapse_newlines(&leftover_text).trim().to_string();
        if !leftover.is_empty() {
            parts.push(leftover);
        }
        let from_tools = pass.text.join("\n\n").trim().to_string();
        if !from_tools.is_empty() {
            parts.push(from_tools);
        }

        debug!(
            instructions = instructions.len(),
            handled = pass.handled,
            outputs = pass.structured.len(),
            "dispatch finished"
        );

        DispatchOutcome {
            handled: pass.handled,
            text: normalize_text(&parts.join("\n\n")),
            structured: pass.structured,
        }
    }
}

/// Accumulator for one dispatch pass.
struct Pass<'d> {
    dispatcher: &'d Dispatcher,
    handled: bool,
    text: Vec<String>,
    structured: StructuredOutput,
    depth_warned: bool,
}

impl<'d> Pass<'d> {
    fn process<'a>(&'a mut self, value: &'a Value, ctx: Context) -> BoxFuture<'a, ()> {
        async move {
            if ctx.depth > self.dispatcher.limits.max_depth {
                if !self.depth_warned {
                    warn!(limit = self.dispatcher.limits.max_depth, "instruction nesting too deep");
                    self.depth_warned = true;
                }
                return;
            }
            match value {
                Value::Null => {}
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                    if let Some(text) = scalar_text(value) {
                        self.process_scalar(text, ctx).await;
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        self.process(item, ctx.nested(ctx.parent)).await;
                    }
                }
                Value::Object(map) => self.process_object(map, ctx).await,
            }
        }
        .boxed()
    }

    async fn process_scalar(&mut self, text: String, ctx: Context) {
        let Some(parent) = ctx.parent else {
            self.text.push(text);
            return;
        };
        let (key, canonical) = match parent {
            ParentTool::Voice => {
                self.structured.voice.push(text);
                return;
            }
            ParentTool::Image => ("prompt", IMAGE),
            ParentTool::Tts => ("text", TTS),
            ParentTool::Ui => ("command", UI),
        };
        let args = single(key, Value::String(text.clone()));
        self.execute(canonical, args, Original::Scalar(text), false)
            .await;
    }

    async fn process_object(&mut self, map: &Map<String, Value>, ctx: Context) {
        if let Some(parent) = ctx.parent {
            if parent == ParentTool::Voice {
                let picked = VOICE_KEYS.iter().find_map(|k| non_empty_str(map.get(*k)));
                if let Some(line) = picked {
                    self.structured.voice.push(line.to_string());
                }
                return;
            }
            let extracted = extract_args(map);
            let run = self
                .execute(parent.tool_name(), extracted.args, Original::Object(map), extracted.flat)
                .await;
            if run.executed {
                return;
            }
        }

        let child = ctx.nested(None);
        for key in ["tool_calls", "tools"] {
            if let Some(Value::Array(items)) = map.get(key) {
                for item in items {
                    self.process(item, child).await;
                }
            }
        }
        if let Some(Value::Array(commands)) = map.get("commands") {
            for command in commands {
                let wrapped = match command {
                    Value::Object(fields) => {
                        let mut wrapped = Map::new();
                        wrapped.insert("tool".into(), Value::String(UI.into()));
                        wrapped.extend(fields.clone());
                        Value::Object(wrapped)
                    }
                    Value::String(s) => json!({"tool": UI, "command": s}),
                    _ => continue,
                };
                self.process(&wrapped, child).await;
            }
        }

        let run = self.dispatch_call_shape(map, child).await;
        let consumed = run.consumed;

        for (key, parent) in SHORTHAND_FIELDS {
            if consumed == Some(*key) {
                continue;
            }
            if let Some(value) = map.get(*key).filter(|v| !v.is_null()) {
                self.process(value, ctx.nested(Some(*parent))).await;
            }
        }

        for key in TEXT_KEYS {
            if consumed == Some(*key) {
                continue;
            }
            if let Some(text) = non_empty_str(map.get(*key)) {
                self.text.push(text.to_string());
            }
        }
    }

    /// Match the first applicable call shape and run it.
    async fn dispatch_call_shape(&mut self, map: &Map<String, Value>, child: Context) -> Execution {
        if let Some(function) = map.get("function").and_then(Value::as_object) {
            if let Some(name) = non_empty_str(function.get("name")) {
                let payload = ["arguments", "args", "parameters", "payload"]
                    .iter()
                    .find_map(|k| function.get(*k).filter(|v| !v.is_null()));
                let args = parse_arg_payload(payload);
                let run = self
                    .execute(name, args, Original::Object(function), false)
                    .await;
                return Execution {
                    executed: run.executed,
                    consumed: None,
                };
            }
        }

        if let Some(name) = non_empty_str(map.get("name")) {
            let payload = ["arguments", "args", "parameters"]
                .iter()
                .find_map(|k| map.get(*k).filter(|v| truthy(v)));
            if payload.is_some() {
                let args = parse_arg_payload(payload);
                return self.execute(name, args, Original::Object(map), false).await;
            }
        }

        let selector = map
            .get("tool")
            .filter(|v| truthy(v))
            .or_else(|| map.get("type").filter(|v| truthy(v)));
        match selector {
            Some(Value::Object(_)) | Some(Value::Array(_)) => {
                if let Some(nested) = selector {
                    self.process(nested, child).await;
                }
                Execution::default()
            }
            Some(name) => {
                let name = scalar_text(name).unwrap_or_default();
                let extracted = extract_args(map);
                self.execute(&name, extracted.args, Original::Object(map), extracted.flat)
                    .await
            }
            None => Execution::default(),
        }
    }

    /// Resolve `name`, fill the tool's required argument and invoke it.
    async fn execute(
        &mut self,
        name: &str,
        args: ToolArgs,
        original: Original<'_>,
        flat: bool,
    ) -> Execution {
        let Some(canonical) = map_tool_name(name) else {
            return Execution::default();
        };
        let Some(tool) = self.dispatcher.registry.get(&canonical).cloned() else {
            debug!(tool = %canonical, "no tool registered");
            return Execution::default();
        };

        let mut args = args;
        let mut consumed = None;
        match canonical.as_str() {
            IMAGE => {
                let Some((prompt, key)) =
                    pick_primary(&args, IMAGE_ARG_KEYS, &original, IMAGE_ORIGINAL_KEYS, flat)
                else {
                    return Execution::default();
                };
                args.insert("prompt".into(), Value::String(prompt));
                consumed = key;
            }
            TTS => {
                let Some((text, key)) =
                    pick_primary(&args, TTS_ARG_KEYS, &original, TTS_ORIGINAL_KEYS, flat)
                else {
                    return Execution::default();
                };
                args.insert("text".into(), Value::String(text));
                consumed = key;
            }
            UI => {
                let Some((command, key)) = self.resolve_ui_command(&args, &original, flat) else {
                    return Execution::default();
                };
                consumed = key;
                args = single("command", command.to_value());
                self.structured.ui.push(UiOutput { command });
            }
            _ => {}
        }

        let invocation_id = Uuid::new_v4();
        let dispatcher = self.dispatcher;
        let events = &dispatcher.events;
        events.send(InterpreterEvent::ToolStarted {
            invocation_id,
            tool: canonical.clone(),
        });
        let start = Instant::now();

        let result = tool.invoke(args.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                events.send(InterpreterEvent::ToolCompleted {
                    invocation_id,
                    result: result.clone(),
                    duration_ms,
                });
                self.record(result, args);
                self.handled = true;
                Execution {
                    executed: true,
                    consumed,
                }
            }
            Err(e) => {
                warn!(tool = %canonical, "tool invocation failed: {}", e);
                events.send(InterpreterEvent::ToolFailed {
                    invocation_id,
                    error: e.to_string(),
                    duration_ms,
                });
                Execution::default()
            }
        }
    }

    /// `args.command`, else the original's `command`, else the arguments
    /// themselves. Strings go through [`parse_command_string`]; missing or
    /// array commands are rebuilt from `action`/`target`/`value`.
    fn resolve_ui_command(
        &self,
        args: &ToolArgs,
        original: &Original,
        flat: bool,
    ) -> Option<(UiCommand, Option<&'static str>)> {
        let (candidate, consumed) = if let Some(cmd) = args.get("command").filter(|v| !v.is_null()) {
            (cmd.clone(), flat.then_some("command"))
        } else if let Some(cmd) = original.get("command") {
            (cmd.clone(), Some("command"))
        } else if let Some(s) = original.scalar() {
            (Value::String(s.to_string()), None)
        } else {
            (Value::Object(args.clone()), None)
        };

        let command = match candidate {
            Value::String(s) => parse_command_string(&s)?,
            Value::Array(_) | Value::Null => {
                let mut rebuilt = Map::new();
                for key in ["action", "target", "value"] {
                    let field = args
                        .get(key)
                        .filter(|v| !v.is_null())
                        .or_else(|| original.get(key));
                    if let Some(field) = field {
                        rebuilt.insert(key.into(), field.clone());
                    }
                }
                Value::Object(rebuilt)
            }
            other => other,
        };

        if !validate(&command) {
            warn!(command = %command, "rejected ui command");
            return None;
        }
        UiCommand::from_value(&command).map(|cmd| (cmd, consumed))
    }

    fn record(&mut self, result: ToolResult, args: ToolArgs) {
        if let Some(url) = result.image_url.filter(|u| !u.is_empty()) {
            self.structured.images.push(ImageOutput {
                url,
                prompt: args.get("prompt").and_then(Value::as_str).map(String::from),
                options: Value::Object(args.clone()),
            });
        }
        if let Some(url) = result.audio_url.filter(|u| !u.is_empty()) {
            self.structured.audio.push(AudioOutput {
                url,
                text: args.get("text").and_then(Value::as_str).map(String::from),
                options: Value::Object(args.clone()),
            });
        }
        if let Some(text) = result.text {
            let text = text.trim();
            if !text.is_empty() {
                self.text.push(text.to_string());
            }
        }
    }
}
