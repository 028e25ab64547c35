use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use shared::agent_api::{Capabilities, ChatApi, ChatRequest, ChatResponse};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::client::PolliClient;
use crate::error::ProviderError;
use crate::sse::SseParser;

// ── Streaming response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<Value>>,
}

/// Incremental output of [`PolliClient::chat_stream`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    Text(String),
    /// Raw `tool_calls` delta entries, forwarded as received
    ToolCallDelta(Vec<Value>),
    Done { finish_reason: Option<String> },
}

impl PolliClient {
    fn chat_url(&self) -> String {
        format!("{}/openai", self.text_base)
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = serde_json::to_value(request)?;
        let resp = self.post_json(&self.chat_url(), body, None).await?;
        let text = resp.text().await.map_err(ProviderError::from)?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Malformed(format!("chat response: {}", e)))?;
        debug!(choices = parsed.choices.len(), "chat response received");
        Ok(parsed)
    }

    /// Stream a chat completion as SSE. Errors before the first byte are
    /// returned; afterwards the stream simply ends with `Done`.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
        tx: UnboundedSender<ChatStreamEvent>,
    ) -> Result<()> {
        let mut body = serde_json::to_value(request)?;
        if let Some(map) = body.as_object_mut() {
            map.insert("stream".into(), Value::Bool(true));
        }

        let resp = self
            .post_json(&self.chat_url(), body, Some("text/event-stream"))
            .await?;

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("chat stream read error: {}", e);
                    break;
                }
            };
            for event in parser.feed(&bytes) {
                if event.data.trim() == "[DONE]" {
                    let _ = tx.send(ChatStreamEvent::Done {
                        finish_reason: None,
                    });
                    return Ok(());
                }
                let Ok(resp) = serde_json::from_str::<StreamResponse>(&event.data) else {
                    // Skip unparseable SSE lines (e.g. keep-alive comments)
                    continue;
                };
                let Some(choice) = resp.choices.into_iter().next() else {
                    continue;
                };
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        let _ = tx.send(ChatStreamEvent::Text(content));
                    }
                }
                if let Some(calls) = choice.delta.tool_calls {
                    let _ = tx.send(ChatStreamEvent::ToolCallDelta(calls));
                }
                if let Some(reason) = choice.finish_reason {
                    let _ = tx.send(ChatStreamEvent::Done {
                        finish_reason: Some(reason),
                    });
                    return Ok(());
                }
            }
        }

        let _ = tx.send(ChatStreamEvent::Done {
            finish_reason: None,
        });
        Ok(())
    }

    pub async fn text_models(&self) -> Result<Value> {
        let url = self.endpoint(&self.text_base, &["models"])?;
        let resp = self.get(url, None).await?;
        Ok(resp.json().await.map_err(ProviderError::from)?)
    }

    pub async fn image_models(&self) -> Result<Value> {
        let url = self.endpoint(&self.image_base, &["models"])?;
        let resp = self.get(url, None).await?;
        Ok(resp.json().await.map_err(ProviderError::from)?)
    }

    /// Fetch both model listings; a failing listing contributes `{}`.
    pub async fn model_capabilities(&self) -> Capabilities {
        let (image, text) = tokio::join!(self.image_models(), self.text_models());
        let image = image.unwrap_or_else(|e| {
            warn!("image model listing failed: {}", e);
            Value::Object(Default::default())
        });
        let text = text.unwrap_or_else(|e| {
            warn!("text model listing failed: {}", e);
            Value::Object(Default::default())
        });
        let audio = text
            .get("openai-audio")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Capabilities { image, text, audio }
    }
}

#[async_trait]
impl ChatApi for PolliClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        PolliClient::chat(self, request).await
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.model_capabilities().await)
    }
}
