//! Chat-send flow: transcript replay, the chat API round trip and
//! interpretation of the reply.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, ChatRequest, RawResponse, Role};
use shared::tool::StructuredOutput;
use tracing::{debug, warn};

use crate::assembler::{sanitize_markdown, DEFAULT_BLOCKED_FENCES};
use crate::Interpreter;

/// Transcript role for the model's turns
pub const AI_ROLE: &str = "ai";

/// One message as stored in the local transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StructuredOutput>,
}

impl TranscriptMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Content with image, audio and ui fences removed, for rendering.
    pub fn display_text(&self) -> String {
        sanitize_markdown(&self.content, DEFAULT_BLOCKED_FENCES)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("No model selected.")]
    NoModel,

    #[error("Failed to get a response.")]
    Transport(#[source] anyhow::Error),
}

impl ChatError {
    /// The line shown in place of the reply.
    pub fn user_message(&self) -> String {
        format!("Error: {self}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatTurnOutcome {
    /// The assistant message appended to the transcript
    Reply(TranscriptMessage),
    /// Nothing was appended; the text is meant for the user
    Failed(String),
}

/// A conversation with the chat API.
pub struct ChatSession {
    interpreter: Arc<Interpreter>,
    model: Option<String>,
    messages: Vec<TranscriptMessage>,
}

impl ChatSession {
    /// Session using the configured default model.
    pub fn new(interpreter: Arc<Interpreter>) -> Self {
        let model = Some(interpreter.context().settings().model.clone());
        Self {
            interpreter,
            model,
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<TranscriptMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(TranscriptMessage::user(content));
    }

    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    /// Messages for the next request.
    ///
    /// System instructions, then remembered notes, then up to `history_len`
    /// transcript messages before the newest one, then the newest one (or
    /// `override_content`) as the user turn.
    pub fn build_messages(&self, override_content: Option<&str>) -> Vec<ChatMessage> {
        let context = self.interpreter.context();
        let settings = context.settings();
        let mut out = Vec::new();

        if let Some(instructions) = settings.instructions.as_deref().filter(|s| !s.trim().is_empty())
        {
            out.push(ChatMessage::new(Role::System, instructions));
        }

        let memories = context.memory().entries();
        if !memories.is_empty() {
            out.push(ChatMessage::new(
                Role::System,
                format!(
                    "Relevant memory:\n{}\nUse it in your response.",
                    memories.join("\n")
                ),
            ));
        }

        let last = match self.messages.len() {
            0 => None,
            len => {
                let end = len - 1;
                let start = end.saturating_sub(settings.history_len);
                for message in &self.messages[start..end] {
                    let Some(role) = Role::from_transcript(&message.role) else {
                        continue;
                    };
                    if !message.content.is_empty() {
                        out.push(ChatMessage::new(role, message.content.clone()));
                    }
                }
                Some(self.messages[end].content.as_str())
            }
        };

        if let Some(user) = override_content.or(last).filter(|s| !s.is_empty()) {
            out.push(ChatMessage::new(Role::User, user));
        }
        out
    }

    /// Send the transcript and append the interpreted reply.
    ///
    /// Failures leave the transcript untouched and come back as the text to
    /// show in place of the reply.
    pub async fn send(&mut self, override_content: Option<&str>) -> ChatTurnOutcome {
        match self.round_trip(override_content).await {
            Ok(message) => {
                self.messages.push(message.clone());
                ChatTurnOutcome::Reply(message)
            }
            Err(e) => {
                warn!(error = ?e, "chat request failed");
                ChatTurnOutcome::Failed(e.user_message())
            }
        }
    }

    async fn round_trip(&self, override_content: Option<&str>) -> Result<TranscriptMessage, ChatError> {
        let model = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(ChatError::NoModel)?;

        let context = self.interpreter.context();
        let mut request = ChatRequest {
            model: model.to_string(),
            messages: self.build_messages(override_content),
            ..Default::default()
        };
        if context.capabilities().await.supports_tools(model) {
            request.tools = Some(self.interpreter.tool_definitions());
            request.json = Some(true);
        }
        debug!(
            model,
            messages = request.messages.len(),
            tools = request.tools.is_some(),
            "sending chat request"
        );

        let response = context
            .chat()
            .chat(&request)
            .await
            .map_err(ChatError::Transport)?;
        let message = response.into_message();
        let flattened = message.flatten();
        let mut image_urls: Vec<String> = flattened
            .image_urls
            .iter()
            .map(|url| context.images().authorize_url(url))
            .collect();
        let mut audio_urls = flattened.audio_urls;

        let outcome = self
            .interpreter
            .interpret(&RawResponse::Message(message))
            .await;

        // Media produced by tools follows the media parts of the reply
        image_urls.extend(outcome.structured.images.iter().map(|i| i.url.clone()));
        audio_urls.extend(outcome.structured.audio.iter().map(|a| a.url.clone()));

        Ok(TranscriptMessage {
            role: AI_ROLE.to_string(),
            content: outcome.text,
            image_urls,
            audio_urls,
            metadata: outcome.structured.into_metadata(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChat, Harness};
    use serde_json::json;
    use shared::agent_api::{MessageContent, ResponseMessage};
    use shared::memory::MemoryStore;
    use shared::settings::ClientSettings;

    fn session(harness: &Harness) -> ChatSession {
        ChatSession::new(Arc::new(Interpreter::new(harness.context.clone())))
    }

    #[test]
    fn test_history_window_and_roles() {
        let settings = ClientSettings {
            instructions: Some("Be brief.".into()),
            history_len: 4,
            ..Default::default()
        };
        let harness = Harness::with_settings(FakeChat::default(), settings);
        harness.memory.add_entry("likes cats").unwrap();

        let session = session(&harness).with_messages(vec![
            TranscriptMessage::user("a"),
            TranscriptMessage::new(AI_ROLE, "b"),
            TranscriptMessage::new("tool", "t"),
            TranscriptMessage::user("c"),
            TranscriptMessage::new(AI_ROLE, ""),
            TranscriptMessage::user("d"),
        ]);

        assert_eq!(
            session.build_messages(None),
            vec![
                ChatMessage::new(Role::System, "Be brief."),
                ChatMessage::new(
                    Role::System,
                    "Relevant memory:\nlikes cats\nUse it in your response."
                ),
                ChatMessage::new(Role::Assistant, "b"),
                ChatMessage::new(Role::User, "c"),
                ChatMessage::new(Role::User, "d"),
            ]
        );

        let overridden = session.build_messages(Some("e"));
        assert_eq!(overridden.last(), Some(&ChatMessage::new(Role::User, "e")));
    }

    #[test]
    fn test_empty_transcript() {
        let harness = Harness::new(FakeChat::default());
        let session = session(&harness);
        assert!(session.build_messages(None).is_empty());
        assert_eq!(
            session.build_messages(Some("hi")),
            vec![ChatMessage::new(Role::User, "hi")]
        );
    }

    #[tokio::test]
    async fn test_send_with_tools() {
        let chat = FakeChat::replying(ResponseMessage::text(
            "Here you go! {\"image\": \"a cat\"}",
        ))
        .with_capabilities(json!({"openai": {"tools": true}}));
        let harness = Harness::new(chat);
        let mut session = session(&harness);
        session.push_user("draw a cat");

        let ChatTurnOutcome::Reply(reply) = session.send(None).await else {
            panic!("expected a reply");
        };

        let request = harness.chat.last_request().unwrap();
        assert_eq!(request.model, "openai");
        assert_eq!(request.json, Some(true));
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(3));

        assert_eq!(reply.role, AI_ROLE);
        assert_eq!(reply.content, "Here you go!");
        let metadata = reply.metadata.unwrap();
        assert_eq!(metadata.images.len(), 1);
        assert_eq!(metadata.images[0].prompt.as_deref(), Some("a cat"));
        assert_eq!(reply.image_urls, vec!["https://img.test/a-cat.jpg?referrer=test"]);
        assert!(reply.audio_urls.is_empty());
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_send_without_tool_support() {
        let chat = FakeChat::replying(ResponseMessage::text("Plain answer."))
            .with_capabilities(json!({"openai": {"tools": false}}));
        let harness = Harness::new(chat);
        let mut session = session(&harness);
        session.push_user("hello");

        let outcome = session.send(None).await;
        let request = harness.chat.last_request().unwrap();
        assert!(request.tools.is_none());
        assert!(request.json.is_none());
        match outcome {
            ChatTurnOutcome::Reply(reply) => {
                assert_eq!(reply.content, "Plain answer.");
                assert!(reply.metadata.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_media_parts_collected() {
        let message = ResponseMessage {
            content: Some(MessageContent::Parts(vec![
                json!({"type": "text", "text": "Look"}),
                json!({"type": "image_url", "image_url": {"url": "https://img.test/p.jpg"}}),
                json!({"type": "audio", "audio": {"url": "https://audio.test/a.mp3"}}),
            ])),
            tool_calls: None,
        };
        let harness = Harness::new(FakeChat::replying(message));
        let mut session = session(&harness);
        session.push_user("show me");

        let ChatTurnOutcome::Reply(reply) = session.send(None).await else {
            panic!("expected a reply");
        };
        assert_eq!(reply.content, "Look");
        assert_eq!(reply.image_urls, vec!["https://img.test/p.jpg?referrer=test"]);
        assert_eq!(reply.audio_urls, vec!["https://audio.test/a.mp3"]);
    }

    #[tokio::test]
    async fn test_tool_media_follows_part_media() {
        let message = ResponseMessage {
            content: Some(MessageContent::Parts(vec![
                json!({"type": "image_url", "image_url": {"url": "https://img.test/p.jpg"}}),
                json!({"type": "text", "text": "{\"image\": \"a fox\", \"tts\": \"hi\"}"}),
            ])),
            tool_calls: None,
        };
        let harness = Harness::new(FakeChat::replying(message));
        let mut session = session(&harness);
        session.push_user("show and tell");

        let ChatTurnOutcome::Reply(reply) = session.send(None).await else {
            panic!("expected a reply");
        };
        assert_eq!(
            reply.image_urls,
            vec![
                "https://img.test/p.jpg?referrer=test",
                "https://img.test/a-fox.jpg?referrer=test",
            ]
        );
        assert_eq!(reply.audio_urls, vec!["data:audio/mpeg;base64,bXAz"]);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let harness = Harness::new(FakeChat::failing());
        let mut session = session(&harness);
        session.push_user("hello");

        assert_eq!(
            session.send(None).await,
            ChatTurnOutcome::Failed("Error: Failed to get a response.".into())
        );
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_no_model_selected() {
        let harness = Harness::new(FakeChat::default());
        let mut session = session(&harness).with_model("  ");
        session.push_user("hello");

        assert_eq!(
            session.send(None).await,
            ChatTurnOutcome::Failed("Error: No model selected.".into())
        );
        assert!(harness.chat.requests.lock().is_empty());
    }

    #[test]
    fn test_display_text_hides_tool_fences() {
        let message = TranscriptMessage::new(AI_ROLE, "Done.\n```ui\nclick ping\n```");
        assert_eq!(message.display_text(), "Done.");
    }
}
