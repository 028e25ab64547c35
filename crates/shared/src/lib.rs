pub mod agent_api;
pub mod dom;
pub mod events;
pub mod memory;
pub mod tool;
pub mod ui_command;

pub mod settings {
    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    fn default_text_base() -> String {
        "https://text.pollinations.ai".into()
    }

    fn default_image_base() -> String {
        "https://image.pollinations.ai".into()
    }

    fn default_timeout_secs() -> u64 {
        60
    }

    fn default_model() -> String {
        "openai".into()
    }

    fn default_history_len() -> usize {
        10
    }

    fn default_image_size() -> u32 {
        512
    }

    fn default_speech_model() -> String {
        "openai-audio".into()
    }

    fn default_max_depth() -> usize {
        32
    }

    fn default_max_instructions() -> usize {
        256
    }

    /// Size and model for generated images. The safety flags are not
    /// configurable.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ImageDefaults {
        #[serde(default = "default_image_size")]
        pub width: u32,
        #[serde(default = "default_image_size")]
        pub height: u32,
        #[serde(default)]
        pub model: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SpeechDefaults {
        #[serde(default = "default_speech_model")]
        pub model: String,
        #[serde(default)]
        pub voice: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ClientSettings {
        #[serde(default = "default_text_base")]
        pub text_base: String,
        #[serde(default = "default_image_base")]
        pub image_base: String,
        /// Sent as `referrer` on every request to the API origins
        #[serde(default)]
        pub referrer: Option<String>,
        #[serde(default)]
        pub token: Option<String>,
        #[serde(default = "default_timeout_secs")]
        pub timeout_secs: u64,
        /// Text model used when the session has none selected
        #[serde(default = "default_model")]
        pub model: String,
        /// How many transcript messages are replayed to the chat API
        #[serde(default = "default_history_len")]
        pub history_len: usize,
        /// System prompt sent ahead of every conversation
        #[serde(default)]
        pub instructions: Option<String>,
        #[serde(default = "ImageDefaults::default")]
        pub image: ImageDefaults,
        #[serde(default = "SpeechDefaults::default")]
        pub speech: SpeechDefaults,
        /// Nesting limit for one dispatch pass
        #[serde(default = "default_max_depth")]
        pub max_depth: usize,
        /// Instruction limit for one dispatch pass
        #[serde(default = "default_max_instructions")]
        pub max_instructions: usize,
    }

    impl Default for ImageDefaults {
        fn default() -> Self {
            Self {
                width: default_image_size(),
                height: default_image_size(),
                model: None,
            }
        }
    }

    impl Default for SpeechDefaults {
        fn default() -> Self {
            Self {
                model: default_speech_model(),
                voice: None,
            }
        }
    }

    impl Default for ClientSettings {
        fn default() -> Self {
            Self {
                text_base: default_text_base(),
                image_base: default_image_base(),
                referrer: None,
                token: None,
                timeout_secs: default_timeout_secs(),
                model: default_model(),
                history_len: default_history_len(),
                instructions: None,
                image: ImageDefaults::default(),
                speech: SpeechDefaults::default(),
                max_depth: default_max_depth(),
                max_instructions: default_max_instructions(),
            }
        }
    }

    impl ClientSettings {
        /// `<config dir>/settings.json` for this application
        pub fn default_path() -> Option<PathBuf> {
            directories::ProjectDirs::from("ai", "pollinations", "polli-chat")
                .map(|dirs| dirs.config_dir().join("settings.json"))
        }

        /// Read settings from a JSON file. A missing file yields defaults.
        pub fn load(path: &Path) -> Result<Self> {
            if !path.exists() {
                return Ok(Self::default());
            }
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let settings = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(settings)
        }

        pub fn save(&self, path: &Path) -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(self)?)?;
            Ok(())
        }

        /// Apply `POLLINATIONS_TOKEN` / `POLLINATIONS_REFERRER` when set.
        pub fn with_env(mut self) -> Self {
            if let Ok(token) = std::env::var("POLLINATIONS_TOKEN") {
                if !token.trim().is_empty() {
                    self.token = Some(token.trim().to_string());
                }
            }
            if let Ok(referrer) = std::env::var("POLLINATIONS_REFERRER") {
                if !referrer.trim().is_empty() {
                    self.referrer = Some(referrer.trim().to_string());
                }
            }
            self
        }
    }

}
