use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use shared::agent_api::{BinaryData, GeneratedImage, ImageApi, ImageOptions};
use tracing::debug;
use url::Url;

use crate::client::PolliClient;
use crate::error::ProviderError;

/// Does a model listing entry advertise JSON output?
fn model_supports_json(info: &Value) -> bool {
    if info.get("json").and_then(|v| v.as_bool()) == Some(true) {
        return true;
    }
    ["output", "outputs", "formats", "format"].iter().any(|key| {
        info.get(*key)
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter().any(|f| match f {
                    Value::String(s) => s.eq_ignore_ascii_case("json"),
                    other => other.to_string().eq_ignore_ascii_case("json"),
                })
            })
            .unwrap_or(false)
    })
}

impl PolliClient {
    fn prompt_url(&self, prompt: &str, options: &ImageOptions) -> Result<Url, ProviderError> {
        let mut url = self.endpoint(&self.image_base, &["prompt", prompt])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(model) = &options.model {
                query.append_pair("model", model);
            }
            if let Some(seed) = options.seed {
                query.append_pair("seed", &seed.to_string());
            }
            query
                .append_pair("width", &options.width.to_string())
                .append_pair("height", &options.height.to_string())
                .append_pair("nologo", bool_param(options.nologo))
                .append_pair("private", bool_param(options.private))
                .append_pair("safe", bool_param(options.safe));
        }
        Ok(url)
    }

    /// Direct image URL for `prompt`; nothing is fetched.
    pub fn generate_image_url(&self, prompt: &str, options: &ImageOptions) -> Result<String> {
        let mut url = self.prompt_url(prompt, options)?;
        self.add_auth_params(&mut url);
        Ok(url.to_string())
    }

    async fn json_supported(&self, model: &str) -> bool {
        match self.image_models().await {
            Ok(models) => models.get(model).map(model_supports_json).unwrap_or(false),
            Err(e) => {
                debug!("image model listing unavailable: {}", e);
                false
            }
        }
    }

    /// Generate an image. With `options.json` and a model that supports it
    /// the API answers with a JSON-wrapped URL; otherwise the image bytes.
    pub async fn image(&self, prompt: &str, options: &ImageOptions) -> Result<GeneratedImage> {
        let mut url = self.prompt_url(prompt, options)?;

        let mut accept = None;
        if options.json {
            if let Some(model) = &options.model {
                if self.json_supported(model).await {
                    url.query_pairs_mut().append_pair("json", "true");
                    accept = Some("application/json");
                }
            }
        }

        let resp = self.get(url, accept).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("application/json") {
            let data: Value = resp.json().await.map_err(ProviderError::from)?;
            return match data.get("url").and_then(|u| u.as_str()) {
                Some(url) if !url.is_empty() => Ok(GeneratedImage::Url(self.authorize_url(url))),
                _ => Err(ProviderError::ImagePending.into()),
            };
        }

        let bytes = resp.bytes().await.map_err(ProviderError::from)?;
        Ok(GeneratedImage::Binary(BinaryData {
            bytes: bytes.to_vec(),
            content_type: if content_type.is_empty() {
                "image/jpeg".to_string()
            } else {
                content_type
            },
        }))
    }

    /// Point an existing image URL at a fresh seed. Only URLs served by this
    /// client's image origin are accepted.
    pub fn refresh_image_url(&self, raw: &str, seed: u64) -> Result<String, ProviderError> {
        let mut url = Url::parse(raw).map_err(|_| ProviderError::InvalidUrl(raw.to_string()))?;
        let image_origin = Url::parse(&self.image_base)
            .map_err(|_| ProviderError::InvalidUrl(self.image_base.clone()))?
            .origin();
        if url.origin() != image_origin {
            return Err(ProviderError::ForeignImage(raw.to_string()));
        }

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "seed")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (k, v) in &kept {
                query.append_pair(k, v);
            }
            query.append_pair("seed", &seed.to_string());
        }
        self.add_auth_params(&mut url);
        Ok(url.to_string())
    }

    /// Prompt recovered from a `/prompt/<text>` image URL.
    pub fn prompt_from_url(raw: &str) -> Option<String> {
        let url = Url::parse(raw).ok()?;
        let mut segments = url.path_segments()?;
        segments.find(|s| *s == "prompt")?;
        let encoded = segments.next()?;
        url::form_urlencoded::parse(format!("p={}", encoded.replace('+', "%2B")).as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
            .filter(|p| !p.is_empty())
    }
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[async_trait]
impl ImageApi for PolliClient {
    async fn generate(&self, prompt: &str, options: &ImageOptions) -> Result<GeneratedImage> {
        self.image(prompt, options).await
    }

    fn image_url(&self, prompt: &str, options: &ImageOptions) -> Option<String> {
        self.generate_image_url(prompt, options).ok()
    }

    fn authorize_url(&self, url: &str) -> String {
        PolliClient::authorize_url(self, url)
    }
}
