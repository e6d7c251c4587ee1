//! Link classification and proxy-relative reference building
//!
//! Every `href`/`src`/`action` value found in a document goes through here to decide
//! whether it is re-routed through `/resource`, `/proxy`, or left alone.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Path extensions that are served raw through `/resource`
pub const ASSET_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "webp", "woff", "woff2", "ttf", "otf", "map",
    "ico", "json", "mp4", "webm",
];

pub const PROXY_PATH: &str = "/proxy";
pub const RESOURCE_PATH: &str = "/resource";

/// Characters `encodeURIComponent` leaves alone
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// How a reference found in markup is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClassification {
    /// Non-navigable content served raw via `/resource`
    Asset,
    /// Another document, routed back through `/proxy`
    Navigable,
    /// Left verbatim (`javascript:`, `mailto:`, fragments, non-http schemes)
    Ignored,
}

impl LinkClassification {
    /// Proxy endpoint for this class, `None` when the reference is not rewritten
    pub fn endpoint(&self) -> Option<&'static str> {
        match self {
            Self::Asset => Some(RESOURCE_PATH),
            Self::Navigable => Some(PROXY_PATH),
            Self::Ignored => None,
        }
    }
}

/// Classify an absolute URL
pub fn classify(url: &Url) -> LinkClassification {
    if !matches!(url.scheme(), "http" | "https") {
        return LinkClassification::Ignored;
    }

    // Url::path() already excludes query and fragment.
    let extension = url
        .path()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension {
        Some(ext) if ASSET_EXTENSIONS.contains(&ext.as_str()) => LinkClassification::Asset,
        _ => LinkClassification::Navigable,
    }
}

/// Whether a raw attribute value is skipped before any resolution
pub fn is_ignored_reference(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }

    starts_with_ignore_case(trimmed, "javascript:") || starts_with_ignore_case(trimmed, "mailto:")
}

/// Whether a raw attribute value already points at one of our endpoints
pub fn is_proxy_reference(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    [PROXY_PATH, RESOURCE_PATH]
        .iter()
        .any(|path| trimmed.strip_prefix(path).is_some_and(|rest| rest.starts_with("?url=")))
}

/// Resolve a raw attribute value against `base` and classify it
///
/// Returns `None` for ignored or unparsable references.
pub fn classify_reference(raw: &str, base: &Url) -> Option<(Url, LinkClassification)> {
    if is_ignored_reference(raw) || is_proxy_reference(raw) {
        return None;
    }

    let absolute = base.join(raw.trim()).ok()?;
    match classify(&absolute) {
        LinkClassification::Ignored => None,
        class => Some((absolute, class)),
    }
}

/// Build the proxy-relative replacement for a raw attribute value
pub fn rewrite_reference(raw: &str, base: &Url) -> Option<String> {
    let (absolute, class) = classify_reference(raw, base)?;
    let endpoint = class.endpoint()?;
    Some(proxied_url(endpoint, absolute.as_str()))
}

/// `{endpoint}?url={encoded target}`
pub fn proxied_url(endpoint: &str, target: &str) -> String {
    format!("{}?url={}", endpoint, encode_component(target))
}

/// Percent-encode with `encodeURIComponent` semantics
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
