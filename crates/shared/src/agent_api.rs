//! Chat API wire types and the collaborator traits the interpreter calls out to.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::{ImageDefaults, SpeechDefaults};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Map a transcript role onto the chat schema. Local transcripts store the
    /// model's turns as `ai`; roles outside the basic chat flow are dropped.
    pub fn from_transcript(role: &str) -> Option<Role> {
        match role.trim().to_lowercase().as_str() {
            "ai" | "assistant" => Some(Role::Assistant),
            "user" => Some(Role::User),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(rename = "private", skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

impl ChatResponse {
    /// The first choice's message, or an empty one.
    pub fn into_message(self) -> ResponseMessage {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: ResponseMessage,
}

/// Message content is either a plain string or an array of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<MessageContent>,
    /// Kept loose: models emit many near-OpenAI shapes here.
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
}

/// Display text and media pulled out of a response message's content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenedContent {
    pub text: String,
    pub image_urls: Vec<String>,
    pub audio_urls: Vec<String>,
}

impl ResponseMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<Value>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    /// Concatenate text parts and collect `image_url` / `audio` part URLs.
    pub fn flatten(&self) -> FlattenedContent {
        let mut out = FlattenedContent::default();
        match &self.content {
            None => {}
            Some(MessageContent::Text(text)) => out.text = text.clone(),
            Some(MessageContent::Parts(parts)) => {
                for part in parts {
                    if let Some(s) = part.as_str() {
                        out.text.push_str(s);
                        continue;
                    }
                    match part.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                                out.text.push_str(t);
                            }
                        }
                        Some("image_url") => {
                            if let Some(url) = part
                                .get("image_url")
                                .and_then(|i| i.get("url"))
                                .and_then(|u| u.as_str())
                            {
                                out.image_urls.push(url.to_string());
                            }
                        }
                        Some("audio") => {
                            if let Some(url) = part
                                .get("audio")
                                .and_then(|a| a.get("url"))
                                .and_then(|u| u.as_str())
                            {
                                out.audio_urls.push(url.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        out
    }
}

/// What the interpreter receives: a bare string or a full message object.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    Text(String),
    Message(ResponseMessage),
}

impl RawResponse {
    pub fn text(&self) -> String {
        match self {
            RawResponse::Text(text) => text.clone(),
            RawResponse::Message(message) => message.flatten().text,
        }
    }

    pub fn tool_calls(&self) -> &[Value] {
        match self {
            RawResponse::Message(ResponseMessage {
                tool_calls: Some(calls),
                ..
            }) => calls.as_slice(),
            _ => &[],
        }
    }
}

impl From<&str> for RawResponse {
    fn from(text: &str) -> Self {
        RawResponse::Text(text.to_string())
    }
}

impl From<ResponseMessage> for RawResponse {
    fn from(message: ResponseMessage) -> Self {
        RawResponse::Message(message)
    }
}

/// Model listings used to decide which request features a model supports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub image: Value,
    #[serde(default)]
    pub text: Value,
    #[serde(default)]
    pub audio: Value,
}

impl Capabilities {
    fn text_model(&self, model: &str) -> Option<&Value> {
        match &self.text {
            Value::Object(map) => map.get(model),
            Value::Array(list) => list.iter().find(|m| {
                m.get("name").and_then(|n| n.as_str()) == Some(model)
                    || m.as_str() == Some(model)
            }),
            _ => None,
        }
    }

    pub fn supports_tools(&self, model: &str) -> bool {
        self.text_model(model)
            .and_then(|info| info.get("tools"))
            .map(truthy)
            .unwrap_or(false)
    }
}

/// Loose truthiness for model-written JSON: null, false, zero and `""` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Binary payload returned by the image or speech endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryData {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedImage {
    Url(String),
    Binary(BinaryData),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageOptions {
    pub width: u32,
    pub height: u32,
    pub private: bool,
    pub nologo: bool,
    pub safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Ask for a JSON-wrapped URL instead of image bytes
    pub json: bool,
}

impl From<&ImageDefaults> for ImageOptions {
    fn from(defaults: &ImageDefaults) -> Self {
        Self {
            width: defaults.width,
            height: defaults.height,
            private: true,
            nologo: true,
            safe: true,
            model: defaults.model.clone(),
            seed: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechOptions {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl From<&SpeechDefaults> for SpeechOptions {
    fn from(defaults: &SpeechDefaults) -> Self {
        Self {
            model: defaults.model.clone(),
            voice: defaults.voice.clone(),
        }
    }
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Model listings; callers treat an error as "no capabilities".
    async fn capabilities(&self) -> Result<Capabilities> {
        Ok(Capabilities::default())
    }
}

#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn generate(&self, prompt: &str, options: &ImageOptions) -> Result<GeneratedImage>;

    /// Build a direct image URL without fetching anything.
    fn image_url(&self, _prompt: &str, _options: &ImageOptions) -> Option<String> {
        None
    }

    /// Decorate a URL with the credentials the API expects.
    fn authorize_url(&self, url: &str) -> String {
        url.to_string()
    }
}

#[async_trait]
pub trait SpeechApi: Send + Sync {
    async fn synthesize(&self, text: &str, options: &SpeechOptions) -> Result<BinaryData>;
}
