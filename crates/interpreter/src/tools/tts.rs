use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::agent_api::{SpeechApi, SpeechOptions};
use shared::settings::SpeechDefaults;
use shared::tool::{Tool, ToolArgs, ToolError, ToolResult};
use tracing::warn;

use super::{string_arg, to_data_url};
use crate::registry::TTS;

pub struct TtsTool {
    api: Arc<dyn SpeechApi>,
    defaults: SpeechDefaults,
}

impl TtsTool {
    pub fn new(api: Arc<dyn SpeechApi>, defaults: SpeechDefaults) -> Self {
        Self { api, defaults }
    }
}

#[async_trait]
impl Tool for TtsTool {
    fn name(&self) -> &str {
        TTS
    }

    fn description(&self) -> &str {
        "Convert text to speech"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Text to speak"}
            },
            "required": ["text"]
        })
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let text = string_arg(&args, "text").ok_or_else(|| ToolError::InvalidArguments {
            name: TTS.into(),
            message: "missing text".into(),
        })?;
        let options = SpeechOptions::from(&self.defaults);
        match self.api.synthesize(text, &options).await {
            Ok(audio) if !audio.bytes.is_empty() => Ok(ToolResult::audio(to_data_url(&audio))),
            Ok(_) => {
                warn!("speech synthesis returned no audio");
                Ok(ToolResult::empty())
            }
            Err(e) => {
                warn!("speech synthesis failed: {}", e);
                Ok(ToolResult::empty())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use parking_lot::Mutex;
    use shared::agent_api::BinaryData;

    #[derive(Default)]
    struct FakeSpeech {
        fail: bool,
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SpeechApi for FakeSpeech {
        async fn synthesize(&self, text: &str, options: &SpeechOptions) -> Result<BinaryData> {
            self.seen.lock().push((text.to_string(), options.model.clone()));
            if self.fail {
                return Err(anyhow!("503"));
            }
            Ok(BinaryData {
                bytes: b"mp3".to_vec(),
                content_type: "audio/mpeg".into(),
            })
        }
    }

    fn args(text: &str) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("text".into(), json!(text));
        args
    }

    #[tokio::test]
    async fn test_synthesizes_with_audio_model() {
        let api = Arc::new(FakeSpeech::default());
        let tool = TtsTool::new(api.clone(), SpeechDefaults::default());
        let result = tool.invoke(args("say apple")).await.unwrap();
        assert_eq!(result.audio_url.as_deref(), Some("data:audio/mpeg;base64,bXAz"));
        assert_eq!(
            api.seen.lock().as_slice(),
            &[("say apple".to_string(), "openai-audio".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let api = Arc::new(FakeSpeech {
            fail: true,
            ..Default::default()
        });
        let tool = TtsTool::new(api, SpeechDefaults::default());
        assert_eq!(tool.invoke(args("hi")).await.unwrap(), ToolResult::empty());
        assert!(tool.invoke(ToolArgs::new()).await.is_err());
    }
}
