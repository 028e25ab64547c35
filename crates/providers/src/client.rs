use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use serde_json::Value;
use shared::settings::{ClientSettings, ImageDefaults, SpeechDefaults};
use std::time::Duration;
use url::Url;

use crate::error::ProviderError;

/// HTTP client for the text, image and audio endpoints.
///
/// Every request to the API's own origins carries the configured `referrer`
/// and, when set, the bearer `token`.
#[derive(Clone)]
pub struct PolliClient {
    pub(crate) http: Client,
    pub(crate) text_base: String,
    pub(crate) image_base: String,
    pub(crate) referrer: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) image_defaults: ImageDefaults,
    pub(crate) speech_defaults: SpeechDefaults,
}

impl PolliClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            text_base: settings.text_base.trim_end_matches('/').to_string(),
            image_base: settings.image_base.trim_end_matches('/').to_string(),
            referrer: settings.referrer.clone().filter(|r| !r.trim().is_empty()),
            token: settings.token.clone().filter(|t| !t.trim().is_empty()),
            image_defaults: settings.image.clone(),
            speech_defaults: settings.speech.clone(),
        })
    }

    pub fn text_base(&self) -> &str {
        &self.text_base
    }

    pub fn image_base(&self) -> &str {
        &self.image_base
    }

    pub fn image_defaults(&self) -> &ImageDefaults {
        &self.image_defaults
    }

    pub fn speech_defaults(&self) -> &SpeechDefaults {
        &self.speech_defaults
    }

    fn api_origins(&self) -> Vec<url::Origin> {
        [&self.text_base, &self.image_base]
            .iter()
            .filter_map(|base| Url::parse(base).ok())
            .map(|u| u.origin())
            .collect()
    }

    pub(crate) fn is_api_url(&self, url: &Url) -> bool {
        self.api_origins().contains(&url.origin())
    }

    /// Append `referrer` and `token` query parameters to API URLs that lack
    /// them. Foreign or unparseable URLs come back unchanged.
    pub fn authorize_url(&self, raw: &str) -> String {
        if raw.is_empty() || (self.token.is_none() && self.referrer.is_none()) {
            return raw.to_string();
        }
        let Ok(mut url) = Url::parse(raw) else {
            return raw.to_string();
        };
        if !self.is_api_url(&url) {
            return raw.to_string();
        }
        self.add_auth_params(&mut url);
        url.to_string()
    }

    pub(crate) fn add_auth_params(&self, url: &mut Url) {
        let has = |url: &Url, key: &str| url.query_pairs().any(|(k, _)| k == key);
        if let Some(referrer) = &self.referrer {
            if !has(url, "referrer") {
                url.query_pairs_mut().append_pair("referrer", referrer);
            }
        }
        if let Some(token) = &self.token {
            if !has(url, "token") {
                url.query_pairs_mut().append_pair("token", token);
            }
        }
    }

    pub(crate) async fn get(
        &self,
        url: Url,
        accept: Option<&str>,
    ) -> Result<Response, ProviderError> {
        let mut url = url;
        self.add_auth_params(&mut url);

        let mut req = self.http.get(url.clone());
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(accept) = accept {
            req = req.header("Accept", accept);
        }
        let resp = req.send().await?;
        check_status(url.path(), resp).await
    }

    pub(crate) async fn post_json(
        &self,
        url: &str,
        body: Value,
        accept: Option<&str>,
    ) -> Result<Response, ProviderError> {
        let mut payload = body;
        if let Value::Object(map) = &mut payload {
            if let Some(referrer) = &self.referrer {
                map.entry("referrer")
                    .or_insert_with(|| Value::String(referrer.clone()));
            }
            if let Some(token) = &self.token {
                map.entry("token")
                    .or_insert_with(|| Value::String(token.clone()));
            }
        }

        let mut req = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(accept) = accept {
            req = req.header("Accept", accept);
        }
        let resp = req.send().await?;
        check_status(url, resp).await
    }

    pub(crate) fn endpoint(&self, base: &str, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(base).map_err(|_| ProviderError::InvalidUrl(base.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidUrl(base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check_status(endpoint: &str, resp: Response) -> Result<Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let detail: String = body.chars().take(800).collect();
    Err(ProviderError::Status {
        endpoint: endpoint.to_string(),
        status,
        detail,
    })
}
