//! Structured UI commands and their validator.
//!
//! A command is `{action, target?, value?}` with a closed action set. The
//! validator is a pure predicate over loosely-typed JSON so it can run before
//! anything is deserialized or executed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UiAction {
    OpenScreensaver,
    CloseScreensaver,
    ChangeTheme,
    ChangeModel,
    SetValue,
    Click,
}

impl UiAction {
    pub fn all() -> &'static [UiAction] {
        &[
            UiAction::OpenScreensaver,
            UiAction::CloseScreensaver,
            UiAction::ChangeTheme,
            UiAction::ChangeModel,
            UiAction::SetValue,
            UiAction::Click,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UiAction::OpenScreensaver => "openScreensaver",
            UiAction::CloseScreensaver => "closeScreensaver",
            UiAction::ChangeTheme => "changeTheme",
            UiAction::ChangeModel => "changeModel",
            UiAction::SetValue => "setValue",
            UiAction::Click => "click",
        }
    }

    pub fn parse(name: &str) -> Option<UiAction> {
        UiAction::all().iter().copied().find(|a| a.as_str() == name)
    }

    fn requires_target(&self) -> bool {
        matches!(
            self,
            UiAction::ChangeTheme | UiAction::ChangeModel | UiAction::Click | UiAction::SetValue
        )
    }

    fn requires_value(&self) -> bool {
        matches!(self, UiAction::SetValue)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UiCommand {
    pub action: UiAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl UiCommand {
    pub fn new(action: UiAction) -> Self {
        Self {
            action,
            target: None,
            value: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Validate and convert in one step.
    pub fn from_value(candidate: &Value) -> Option<UiCommand> {
        if !validate(candidate) {
            return None;
        }
        serde_json::from_value(candidate.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("action".into(), Value::String(self.action.as_str().into()));
        if let Some(target) = &self.target {
            map.insert("target".into(), Value::String(target.clone()));
        }
        if let Some(value) = &self.value {
            map.insert("value".into(), Value::String(value.clone()));
        }
        Value::Object(map)
    }

    /// Re-check a typed command against the field rules.
    pub fn is_valid(&self) -> bool {
        validate(&self.to_value())
    }
}

/// Is `candidate` a well-formed UI command?
///
/// Rejects non-objects, unknown actions, non-string `target`/`value`, missing
/// fields required by the action and any key besides `action`, `target` and
/// `value`.
pub fn validate(candidate: &Value) -> bool {
    let Some(map) = candidate.as_object() else {
        return false;
    };
    if map
        .keys()
        .any(|k| !matches!(k.as_str(), "action" | "target" | "value"))
    {
        return false;
    }
    let Some(action) = map
        .get("action")
        .and_then(|a| a.as_str())
        .and_then(UiAction::parse)
    else {
        return false;
    };

    let field_ok = |key: &str, required: bool| match map.get(key) {
        None => !required,
        Some(v) => v.is_string(),
    };

    field_ok("target", action.requires_target()) && field_ok("value", action.requires_value())
}

/// JSON schema handed to the chat API as the `ui` tool's `command` parameter.
pub fn ui_command_schema() -> Value {
    let actions: Vec<&str> = UiAction::all().iter().map(|a| a.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "action": {"type": "string", "enum": actions},
            "target": {"type": "string"},
            "value": {"type": "string"}
        },
        "required": ["action"],
        "additionalProperties": false
    })
}
