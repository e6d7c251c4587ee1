//! Portal - Content Rewriting Web Proxy
//!
//! Fetches third-party pages on behalf of a browser client and rewrites them so that
//! every link, asset and form submission is routed back through the proxy.
//!
//! ## Features
//!
//! - Static fetching over HTTP with redirect following
//! - Headless Chromium rendering for script-heavy hosts
//! - Streaming HTML rewriting with a substitution fallback for markup that cannot be parsed
//! - `window.open` interception so popups stay inside the proxy
//! - Passthrough endpoint for subresources

pub mod api;
pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{PortalError, Result};
