//! Application context: collaborators, settings and caches handed to the
//! interpreter explicitly instead of living in process-wide globals.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use providers::PolliClient;
use shared::agent_api::{Capabilities, ChatApi, ImageApi, SpeechApi};
use shared::dom::DomSurface;
use shared::events::InterpreterEvent;
use shared::memory::MemoryStore;
use shared::settings::ClientSettings;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::commands::UiExecutor;
use crate::registry::ToolRegistry;
use crate::tools::{ImageTool, TtsTool, UiTool};

/// Optional event channel shared by every component of one context.
///
/// Clones share the channel, so detaching it in one place silences all of
/// them.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<InterpreterEvent>>>>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<InterpreterEvent>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    pub fn send(&self, event: InterpreterEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // Receiver may have been dropped
            let _ = sender.send(event);
        }
    }

    pub fn detach(&self) {
        self.sender.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.sender.lock().is_some()
    }
}

/// External services the interpreter drives.
#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatApi>,
    pub images: Arc<dyn ImageApi>,
    pub speech: Arc<dyn SpeechApi>,
    pub dom: Arc<dyn DomSurface>,
    pub memory: Arc<dyn MemoryStore>,
}

pub struct AppContext {
    settings: ClientSettings,
    collaborators: Collaborators,
    events: EventSink,
    capabilities: RwLock<Option<Capabilities>>,
}

impl AppContext {
    pub fn new(settings: ClientSettings, collaborators: Collaborators) -> Self {
        Self {
            settings,
            collaborators,
            events: EventSink::default(),
            capabilities: RwLock::new(None),
        }
    }

    /// Context backed by the HTTP client for chat, images and speech.
    pub fn with_client(
        settings: ClientSettings,
        dom: Arc<dyn DomSurface>,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        let client = Arc::new(PolliClient::new(&settings)?);
        let collaborators = Collaborators {
            chat: client.clone(),
            images: client.clone(),
            speech: client,
            dom,
            memory,
        };
        Ok(Self::new(settings, collaborators))
    }

    pub fn with_events(mut self, sender: mpsc::UnboundedSender<InterpreterEvent>) -> Self {
        self.events = EventSink::new(sender);
        self
    }

    /// Warm the capability cache.
    pub async fn init(&self) {
        let caps = self.capabilities().await;
        debug!(
            text_models = caps.text.as_object().map(|m| m.len()).unwrap_or(0),
            "context initialized"
        );
    }

    /// Drop cached state and detach the event channel.
    pub fn teardown(&self) {
        self.capabilities.write().take();
        self.events.detach();
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn chat(&self) -> &Arc<dyn ChatApi> {
        &self.collaborators.chat
    }

    pub fn images(&self) -> &Arc<dyn ImageApi> {
        &self.collaborators.images
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.collaborators.memory
    }

    pub fn dom(&self) -> &Arc<dyn DomSurface> {
        &self.collaborators.dom
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Model capabilities, fetched once. A failed fetch caches an empty set.
    pub async fn capabilities(&self) -> Capabilities {
        if let Some(caps) = self.capabilities.read().as_ref() {
            return caps.clone();
        }
        let caps = match self.collaborators.chat.capabilities().await {
            Ok(caps) => caps,
            Err(e) => {
                warn!("capabilities fetch failed: {}", e);
                Capabilities::default()
            }
        };
        self.capabilities
            .write()
            .get_or_insert_with(|| caps.clone())
            .clone()
    }

    pub fn ui_executor(&self) -> Arc<UiExecutor> {
        Arc::new(UiExecutor::new(
            self.collaborators.dom.clone(),
            self.events.clone(),
        ))
    }

    /// Registry holding the built-in `image`, `tts` and `ui` tools.
    pub fn builtin_registry(&self, executor: Arc<UiExecutor>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(ImageTool::new(
                self.collaborators.images.clone(),
                self.settings.image.clone(),
            )))
            .register(Arc::new(TtsTool::new(
                self.collaborators.speech.clone(),
                self.settings.speech.clone(),
            )))
            .register(Arc::new(UiTool::new(executor)));
        registry
    }
}
