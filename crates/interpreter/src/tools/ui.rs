use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared::tool::{Tool, ToolArgs, ToolError, ToolResult};
use shared::ui_command::{ui_command_schema, validate, UiCommand};
use tracing::warn;

use crate::commands::{parse_spoken, UiExecutor};
use crate::json_repair;
use crate::registry::UI;

/// Naive `action target...` split: first token is the action, the rest the
/// target.
fn split_tokens(text: &str) -> Option<Value> {
    let mut tokens = text.split(' ').map(str::trim).filter(|t| !t.is_empty());
    let action = tokens.next()?;
    let rest: Vec<&str> = tokens.collect();

    let mut map = Map::new();
    map.insert("action".into(), Value::String(action.to_string()));
    if !rest.is_empty() {
        map.insert("target".into(), Value::String(rest.join(" ")));
    }
    Some(Value::Object(map))
}

/// Resolve a command given as a string.
///
/// Tries a JSON (or near-JSON) object, then the token split, then the spoken
/// grammar. Returns the first candidate that validates.
pub fn parse_command_string(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(parsed) = json_repair::try_parse(trimmed).filter(Value::is_object) {
        if validate(&parsed) {
            return Some(parsed);
        }
    }
    if let Some(split) = split_tokens(trimmed).filter(validate) {
        return Some(split);
    }
    parse_spoken(trimmed).map(|spoken| spoken.to_ui_command().to_value())
}

/// Executes validated UI commands. The side effect is the whole result.
pub struct UiTool {
    executor: Arc<UiExecutor>,
}

impl UiTool {
    pub fn new(executor: Arc<UiExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for UiTool {
    fn name(&self) -> &str {
        UI
    }

    fn description(&self) -> &str {
        "Execute a UI command"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"command": ui_command_schema()},
            "required": ["command"]
        })
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let raw = args.get("command").cloned().unwrap_or(Value::Null);
        let Some(command) = UiCommand::from_value(&raw) else {
            warn!(command = %raw, "invalid ui command");
            return Ok(ToolResult::empty());
        };
        if let Err(e) = self.executor.execute(&command) {
            warn!("ui command failed: {}", e);
        }
        Ok(ToolResult::empty())
    }
}
