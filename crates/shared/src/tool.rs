//! Tool contract and the per-response output accumulator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ui_command::UiCommand;

/// Arguments handed to a tool: always a flat JSON object.
pub type ToolArgs = Map<String, Value>;

/// What one tool invocation produced. Any subset may be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ToolResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn audio(url: impl Into<String>) -> Self {
        Self {
            audio_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOutput {
    pub url: String,
    pub prompt: Option<String>,
    pub options: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutput {
    pub url: String,
    pub text: Option<String>,
    pub options: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiOutput {
    pub command: UiCommand,
}

/// Side effects accumulated during one dispatch pass. Append-only, never
/// deduplicated; empty categories are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<AudioOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ui: Vec<UiOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub voice: Vec<String>,
}

impl StructuredOutput {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.audio.is_empty() && self.ui.is_empty() && self.voice.is_empty()
    }

    /// `None` when nothing was produced, for attaching as message metadata.
    pub fn into_metadata(self) -> Option<StructuredOutput> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// Total entries across all categories.
    pub fn len(&self) -> usize {
        self.images.len() + self.audio.len() + self.ui.len() + self.voice.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Invalid arguments for {name}: {message}")]
    InvalidArguments { name: String, message: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(#[from] anyhow::Error),
}

/// A named side-effecting capability the model can invoke.
///
/// Implementations should degrade to an empty [`ToolResult`] on collaborator
/// failure; an `Err` tells the dispatcher the invocation did not happen.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical name the registry files this tool under
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn invoke(&self, args: ToolArgs) -> Result<ToolResult, ToolError>;
}
