use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::agent_api::{GeneratedImage, ImageApi, ImageOptions};
use shared::settings::ImageDefaults;
use shared::tool::{Tool, ToolArgs, ToolError, ToolResult};
use tracing::{debug, warn};

use super::{string_arg, to_data_url};
use crate::registry::IMAGE;

/// Generates a square, private, watermark-free, safe-mode image.
pub struct ImageTool {
    api: Arc<dyn ImageApi>,
    defaults: ImageDefaults,
}

impl ImageTool {
    pub fn new(api: Arc<dyn ImageApi>, defaults: ImageDefaults) -> Self {
        Self { api, defaults }
    }

    async fn render(&self, prompt: &str) -> Option<String> {
        let base = ImageOptions::from(&self.defaults);
        let options = ImageOptions {
            json: true,
            ..base.clone()
        };

        let generated = match self.api.generate(prompt, &options).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!("image generation failed: {}", e);
                return None;
            }
        };

        let url = match &generated {
            GeneratedImage::Url(url) if !url.is_empty() => Some(url.clone()),
            _ => None,
        };
        let url = url.or_else(|| {
            debug!("no URL in image response, building direct URL");
            self.api.image_url(prompt, &base)
        });
        let url = url.or_else(|| match &generated {
            GeneratedImage::Binary(data) if !data.bytes.is_empty() => Some(to_data_url(data)),
            _ => None,
        });
        url.map(|u| self.api.authorize_url(&u))
    }
}

#[async_trait]
impl Tool for ImageTool {
    fn name(&self) -> &str {
        IMAGE
    }

    fn description(&self) -> &str {
        "Generate an image"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "Image description"}
            },
            "required": ["prompt"]
        })
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let prompt = string_arg(&args, "prompt").ok_or_else(|| ToolError::InvalidArguments {
            name: IMAGE.into(),
            message: "missing prompt".into(),
        })?;
        Ok(self
            .render(prompt)
            .await
            .map(ToolResult::image)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use parking_lot::Mutex;
    use shared::agent_api::BinaryData;

    enum Reply {
        Url(&'static str),
        Binary,
        Fail,
    }

    struct FakeImages {
        reply: Reply,
        direct: bool,
        seen: Mutex<Vec<(String, ImageOptions)>>,
    }

    impl FakeImages {
        fn new(reply: Reply, direct: bool) -> Arc<Self> {
            Arc::new(Self {
                reply,
                direct,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ImageApi for FakeImages {
        async fn generate(&self, prompt: &str, options: &ImageOptions) -> Result<GeneratedImage> {
            self.seen.lock().push((prompt.to_string(), options.clone()));
            match self.reply {
                Reply::Url(url) => Ok(GeneratedImage::Url(url.into())),
                Reply::Binary => Ok(GeneratedImage::Binary(BinaryData {
                    bytes: vec![1, 2, 3],
                    content_type: "image/png".into(),
                })),
                Reply::Fail => Err(anyhow!("network down")),
            }
        }

        fn image_url(&self, prompt: &str, _options: &ImageOptions) -> Option<String> {
            self.direct
                .then(|| format!("https://img.test/prompt/{}", prompt.replace(' ', "%20")))
        }

        fn authorize_url(&self, url: &str) -> String {
            if url.starts_with("https://img.test") {
                format!("{url}?referrer=test")
            } else {
                url.to_string()
            }
        }
    }

    fn args(prompt: &str) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("prompt".into(), json!(prompt));
        args
    }

    #[tokio::test]
    async fn test_json_url_with_safety_defaults() {
        let api = FakeImages::new(Reply::Url("https://img.test/a.jpg"), true);
        let tool = ImageTool::new(api.clone(), ImageDefaults::default());

        let result = tool.invoke(args(" an apple ")).await.unwrap();
        assert_eq!(result.image_url.as_deref(), Some("https://img.test/a.jpg?referrer=test"));

        let seen = api.seen.lock();
        let (prompt, opts) = &seen[0];
        assert_eq!(prompt, "an apple");
        assert_eq!((opts.width, opts.height), (512, 512));
        assert!(opts.private && opts.nologo && opts.safe && opts.json);
    }

    #[tokio::test]
    async fn test_binary_prefers_direct_url() {
        let tool = ImageTool::new(FakeImages::new(Reply::Binary, true), ImageDefaults::default());
        let result = tool.invoke(args("cat")).await.unwrap();
        assert_eq!(
            result.image_url.as_deref(),
            Some("https://img.test/prompt/cat?referrer=test")
        );
    }

    #[tokio::test]
    async fn test_binary_falls_back_to_data_url() {
        let tool = ImageTool::new(FakeImages::new(Reply::Binary, false), ImageDefaults::default());
        let result = tool.invoke(args("cat")).await.unwrap();
        assert_eq!(result.image_url.as_deref(), Some("data:image/png;base64,AQID"));
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let tool = ImageTool::new(FakeImages::new(Reply::Fail, true), ImageDefaults::default());
        assert_eq!(tool.invoke(args("cat")).await.unwrap(), ToolResult::empty());
    }

    #[tokio::test]
    async fn test_missing_prompt_is_invalid() {
        let tool = ImageTool::new(FakeImages::new(Reply::Fail, true), ImageDefaults::default());
        let err = tool.invoke(args("  ")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
