use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{endpoint} returned {status}: {detail}")]
    Status {
        endpoint: String,
        status: u16,
        detail: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("image is still pending")]
    ImagePending,

    #[error("not an image URL from this API: {0}")]
    ForeignImage(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}
