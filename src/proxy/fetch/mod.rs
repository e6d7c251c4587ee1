//! Page retrieval
//!
//! Two fetchers share one contract: given a target URL, produce the body, its content
//! type and the URL it finally resolved to.

mod rendered;
mod static_fetch;

pub use rendered::{RenderedFetcher, RenderedFetcherConfig};
pub use static_fetch::StaticFetcher;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use url::Url;

use crate::error::Result;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Outcome of a single fetch
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Declared or guessed content type
    pub content_type: String,
    /// Raw body (markup or binary)
    pub body: Bytes,
    /// URL after redirects
    pub final_url: Url,
    /// Origin status, forwarded to the client as-is
    pub status: StatusCode,
}

impl FetchResult {
    pub fn is_html(&self) -> bool {
        is_html_content_type(&self.content_type)
    }
}

/// Trait for page fetchers
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Retrieve the target
    async fn fetch(&self, target: &Url) -> Result<FetchResult>;

    /// Release any long-lived resources
    async fn shutdown(&self) {}

    /// Get the fetcher name
    fn fetcher_name(&self) -> &'static str;
}

pub fn is_html_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

/// Declared content type, else a guess from the URL path, else a generic binary type
pub fn resolve_content_type(declared: Option<&str>, url: &Url) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|s| !s.is_empty()) {
        return declared.to_string();
    }

    mime_guess::from_path(url.path())
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}
