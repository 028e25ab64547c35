//! Client for the multimodal generation API: chat, streaming chat, images,
//! speech and model listings.

pub mod audio;
pub mod client;
pub mod error;
pub mod image;
pub mod sse;
pub mod text;

pub use client::PolliClient;
pub use error::ProviderError;
pub use text::ChatStreamEvent;
