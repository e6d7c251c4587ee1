//! Rewriting proxy core
//!
//! This module provides:
//! - Link classification and proxied URL construction
//! - Fetch strategy selection (static vs. headless browser)
//! - Static and rendered page fetchers
//! - HTML rewriting so every navigation stays inside the proxy
//! - Request dispatch tying the above together

pub mod classify;
pub mod dispatch;
pub mod fetch;
pub mod rewrite;
pub mod strategy;

pub use classify::{classify, LinkClassification};
pub use dispatch::{Dispatcher, ProxyMode, ProxyRequest, ProxyResponse};
pub use fetch::{FetchResult, PageFetcher, RenderedFetcher, StaticFetcher};
pub use rewrite::{rewrite_document, RewriteContext};
pub use strategy::{FetchStrategy, FixedSelector, HostHintSelector, StrategySelector};
