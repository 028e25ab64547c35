use anyhow::Result;
use async_trait::async_trait;
use shared::agent_api::{BinaryData, SpeechApi, SpeechOptions};
use tracing::debug;
use url::Url;

use crate::client::PolliClient;
use crate::error::ProviderError;

const DEFAULT_AUDIO_TYPE: &str = "audio/mpeg";

impl PolliClient {
    fn speech_url(&self, text: &str, options: &SpeechOptions) -> Result<Url, ProviderError> {
        let mut url = self.endpoint(&self.text_base, &[text])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("model", &options.model);
            if let Some(voice) = &options.voice {
                query.append_pair("voice", voice);
            }
        }
        Ok(url)
    }

    /// Synthesize speech for `text`.
    pub async fn tts(&self, text: &str, options: &SpeechOptions) -> Result<BinaryData> {
        let url = self.speech_url(text, options)?;
        let resp = self.get(url, Some("audio/*")).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| ct.starts_with("audio/"))
            .unwrap_or(DEFAULT_AUDIO_TYPE)
            .to_string();
        let bytes = resp.bytes().await.map_err(ProviderError::from)?;
        debug!(len = bytes.len(), %content_type, "speech synthesized");
        Ok(BinaryData {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[async_trait]
impl SpeechApi for PolliClient {
    async fn synthesize(&self, text: &str, options: &SpeechOptions) -> Result<BinaryData> {
        self.tts(text, options).await
    }
}
