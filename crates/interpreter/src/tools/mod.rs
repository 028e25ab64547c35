//! Built-in tools: image generation, speech synthesis and UI commands.
//!
//! Each tool swallows collaborator failures and answers with an empty
//! [`ToolResult`](shared::tool::ToolResult); one failing tool must not stop
//! the rest of a dispatch pass.

pub mod image;
pub mod tts;
pub mod ui;

pub use image::ImageTool;
pub use tts::TtsTool;
pub use ui::UiTool;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use shared::agent_api::BinaryData;
use shared::tool::ToolArgs;

/// Inline `data:` URL for generated media.
pub fn to_data_url(data: &BinaryData) -> String {
    format!("data:{};base64,{}", data.content_type, BASE64.encode(&data.bytes))
}

/// Non-empty trimmed string under `key`.
pub(crate) fn string_arg<'a>(args: &'a ToolArgs, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
