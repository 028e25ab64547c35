//! In-process fakes for the interpreter's collaborators.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use shared::agent_api::{
    BinaryData, Capabilities, ChatApi, ChatChoice, ChatRequest, ChatResponse, GeneratedImage,
    ImageApi, ImageOptions, ResponseMessage, SpeechApi, SpeechOptions,
};
use shared::dom::{DomSurface, ElementHandle, ElementIndex};
use shared::memory::InMemoryStore;
use shared::settings::ClientSettings;
use shared::tool::{Tool, ToolArgs, ToolError, ToolResult};

use crate::context::{AppContext, Collaborators};

/// Records every DOM action; `value_ids` lists elements that hold a value.
#[derive(Default)]
pub(crate) struct FakeDom {
    pub index: ElementIndex,
    pub value_ids: Vec<String>,
    pub models: Vec<String>,
    pub screensaver: bool,
    pub clicks: Mutex<Vec<String>>,
    pub values: Mutex<Vec<(String, String)>>,
}

impl FakeDom {
    pub(crate) fn standard() -> Self {
        let index = ElementIndex::new()
            .with("send-button", ["Send"])
            .with("ping", ["Ping"])
            .with("console", ["Console"])
            .with("toggle-screensaver", ["Screensaver"])
            .with("volume", ["Volume"])
            .with("theme-select", Vec::<&str>::new())
            .with("model-select", Vec::<&str>::new())
            .with("pause", ["Pause"]);
        Self {
            index,
            value_ids: vec!["volume".into(), "theme-select".into(), "model-select".into()],
            models: vec!["OpenAI GPT-4o".into(), "Mistral Small".into()],
            ..Default::default()
        }
    }

    pub(crate) fn clicked(&self) -> Vec<String> {
        self.clicks.lock().clone()
    }
}

impl DomSurface for FakeDom {
    fn find_element(&self, phrase: &str) -> Option<ElementHandle> {
        self.index.find(phrase)
    }

    fn click(&self, element: &ElementHandle) -> Result<()> {
        self.clicks.lock().push(element.0.clone());
        Ok(())
    }

    fn set_value(&self, element: &ElementHandle, value: &str) -> Result<bool> {
        if !self.value_ids.contains(&element.0) {
            return Ok(false);
        }
        self.values.lock().push((element.0.clone(), value.to_string()));
        Ok(true)
    }

    fn select_option(&self, element: &ElementHandle, phrase: &str) -> Result<Option<String>> {
        let wanted = phrase.to_lowercase();
        let Some(label) = self.models.iter().find(|m| m.to_lowercase().contains(&wanted)) else {
            return Ok(None);
        };
        self.values.lock().push((element.0.clone(), label.clone()));
        Ok(Some(label.clone()))
    }

    fn screensaver_active(&self) -> bool {
        self.screensaver
    }
}

/// Chat API answering every request with one canned message.
#[derive(Default)]
pub(crate) struct FakeChat {
    reply: ResponseMessage,
    fail: bool,
    capabilities: Option<Value>,
    caps_fail: bool,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub capability_calls: Mutex<usize>,
}

impl FakeChat {
    pub(crate) fn replying(reply: ResponseMessage) -> Self {
        Self {
            reply,
            ..Default::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// `text` is the text-model listing, e.g. `{"openai": {"tools": true}}`.
    pub(crate) fn with_capabilities(mut self, text: Value) -> Self {
        self.capabilities = Some(text);
        self
    }

    pub(crate) fn failing_capabilities(mut self) -> Self {
        self.caps_fail = true;
        self
    }

    pub(crate) fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(anyhow!("upstream returned 500"));
        }
        Ok(ChatResponse {
            choices: vec![ChatChoice {
                message: self.reply.clone(),
            }],
        })
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        *self.capability_calls.lock() += 1;
        if self.caps_fail {
            return Err(anyhow!("models endpoint unreachable"));
        }
        Ok(Capabilities {
            text: self.capabilities.clone().unwrap_or(Value::Null),
            ..Default::default()
        })
    }
}

/// Image API returning a URL derived from the prompt.
#[derive(Default)]
pub(crate) struct FakeImages {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageApi for FakeImages {
    async fn generate(&self, prompt: &str, _options: &ImageOptions) -> Result<GeneratedImage> {
        self.prompts.lock().push(prompt.to_string());
        Ok(GeneratedImage::Url(format!(
            "https://img.test/{}.jpg",
            prompt.replace(' ', "-")
        )))
    }

    fn authorize_url(&self, url: &str) -> String {
        if url.starts_with("https://img.test") && !url.contains('?') {
            format!("{url}?referrer=test")
        } else {
            url.to_string()
        }
    }
}

/// Speech API returning the bytes `mp3` for any text.
#[derive(Default)]
pub(crate) struct FakeSpeech {
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechApi for FakeSpeech {
    async fn synthesize(&self, text: &str, _options: &SpeechOptions) -> Result<BinaryData> {
        self.texts.lock().push(text.to_string());
        Ok(BinaryData {
            bytes: b"mp3".to_vec(),
            content_type: "audio/mpeg".into(),
        })
    }
}

pub(crate) fn collaborators(chat: Arc<FakeChat>) -> Collaborators {
    Collaborators {
        chat,
        images: Arc::new(FakeImages::default()),
        speech: Arc::new(FakeSpeech::default()),
        dom: Arc::new(FakeDom::standard()),
        memory: Arc::new(InMemoryStore::new()),
    }
}

/// A context over fakes, keeping typed handles to each of them.
pub(crate) struct Harness {
    pub chat: Arc<FakeChat>,
    pub images: Arc<FakeImages>,
    pub speech: Arc<FakeSpeech>,
    pub dom: Arc<FakeDom>,
    pub memory: Arc<InMemoryStore>,
    pub context: Arc<AppContext>,
}

impl Harness {
    pub(crate) fn new(chat: FakeChat) -> Self {
        Self::with_settings(chat, ClientSettings::default())
    }

    pub(crate) fn with_settings(chat: FakeChat, settings: ClientSettings) -> Self {
        let chat = Arc::new(chat);
        let images = Arc::new(FakeImages::default());
        let speech = Arc::new(FakeSpeech::default());
        let dom = Arc::new(FakeDom::standard());
        let memory = Arc::new(InMemoryStore::new());
        let context = Arc::new(AppContext::new(
            settings,
            Collaborators {
                chat: chat.clone(),
                images: images.clone(),
                speech: speech.clone(),
                dom: dom.clone(),
                memory: memory.clone(),
            },
        ));
        Self {
            chat,
            images,
            speech,
            dom,
            memory,
            context,
        }
    }
}

/// Shared log of `(tool name, arguments)` across recording tools.
#[derive(Clone, Default)]
pub(crate) struct Recorded(Arc<Mutex<Vec<(String, Value)>>>);

impl Recorded {
    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.0.lock().clone()
    }
}

/// Tool that logs its arguments and returns a fixed result.
pub(crate) struct RecordingTool {
    name: String,
    recorded: Recorded,
    result: ToolResult,
    fail: bool,
}

impl RecordingTool {
    pub(crate) fn new(name: &str, recorded: Recorded) -> Self {
        Self {
            name: name.to_string(),
            recorded,
            result: ToolResult::empty(),
            fail: false,
        }
    }

    pub(crate) fn returning(mut self, result: ToolResult) -> Self {
        self.result = result;
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "records its arguments"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        self.recorded
            .0
            .lock()
            .push((self.name.clone(), Value::Object(args)));
        if self.fail {
            return Err(ToolError::ExecutionFailed(anyhow!("tool exploded")));
        }
        Ok(self.result.clone())
    }
}
