//! Fetch strategy selection
//!
//! Decides whether a target is fetched with a plain GET or rendered in the headless browser.

use url::Url;

/// Strategy types for fetching a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    #[default]
    Static,
    Rendered,
}

impl FetchStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "rendered" | "dynamic" | "headless" => Self::Rendered,
            _ => Self::Static,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Rendered => "rendered",
        }
    }
}

/// Trait for fetch strategy selection
///
/// Implementations decide per target URL; the dispatcher never inspects hosts itself.
pub trait StrategySelector: Send + Sync {
    /// Pick the strategy for a target URL
    fn select(&self, target: &str) -> FetchStrategy;

    /// Get the selector name
    fn selector_name(&self) -> &'static str;
}

/// Selects the rendered strategy when the hostname contains one of the configured hints
#[derive(Debug, Clone, Default)]
pub struct HostHintSelector {
    hints: Vec<String>,
}

impl HostHintSelector {
    pub fn new<I, S>(hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hints: hints
                .into_iter()
                .map(|h| h.as_ref().trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn hints(&self) -> &[String] {
        &self.hints
    }
}

impl StrategySelector for HostHintSelector {
    fn select(&self, target: &str) -> FetchStrategy {
        let Ok(url) = Url::parse(target) else {
            return FetchStrategy::Static;
        };
        let Some(host) = url.host_str() else {
            return FetchStrategy::Static;
        };

        let host = host.to_lowercase();
        if self.hints.iter().any(|hint| host.contains(hint.as_str())) {
            FetchStrategy::Rendered
        } else {
            FetchStrategy::Static
        }
    }

    fn selector_name(&self) -> &'static str {
        "host_hint"
    }
}

/// Always returns the same strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSelector(pub FetchStrategy);

impl StrategySelector for FixedSelector {
    fn select(&self, _target: &str) -> FetchStrategy {
        self.0
    }

    fn selector_name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DYNAMIC_HOST_HINTS;

    #[test]
    fn test_fetch_strategy_from_str() {
        assert_eq!(FetchStrategy::from_str("rendered"), FetchStrategy::Rendered);
        assert_eq!(FetchStrategy::from_str("Dynamic"), FetchStrategy::Rendered);
        assert_eq!(FetchStrategy::from_str("static"), FetchStrategy::Static);
        assert_eq!(FetchStrategy::from_str("unknown"), FetchStrategy::Static);
    }

    #[test]
    fn test_fetch_strategy_as_str() {
        assert_eq!(FetchStrategy::Static.as_str(), "static");
        assert_eq!(FetchStrategy::Rendered.as_str(), "rendered");
    }

    #[test]
    fn test_hint_match_selects_rendered() {
        let selector = HostHintSelector::new(DEFAULT_DYNAMIC_HOST_HINTS.iter().copied());

        assert_eq!(
            selector.select("https://www.coolmathgames.com/0-run"),
            FetchStrategy::Rendered
        );
        assert_eq!(
            selector.select("https://someone.ITCH.io/game"),
            FetchStrategy::Rendered
        );
    }

    #[test]
    fn test_unmatched_host_selects_static() {
        let selector = HostHintSelector::new(DEFAULT_DYNAMIC_HOST_HINTS.iter().copied());

        assert_eq!(selector.select("https://example.com/"), FetchStrategy::Static);
        // Only the hostname is inspected, never the path or query.
        assert_eq!(
            selector.select("https://example.com/roblox?from=kongregate"),
            FetchStrategy::Static
        );
    }

    #[test]
    fn test_unparsable_target_selects_static() {
        let selector = HostHintSelector::new(["example"]);
        assert_eq!(selector.select("not a url"), FetchStrategy::Static);
        assert_eq!(selector.select("mailto:user@example.com"), FetchStrategy::Static);
    }

    #[test]
    fn test_hints_are_normalised() {
        let selector = HostHintSelector::new([" Games.Example ", ""]);
        assert_eq!(selector.hints(), &["games.example".to_string()]);
        assert_eq!(selector.selector_name(), "host_hint");
    }

    #[test]
    fn test_fixed_selector() {
        let selector = FixedSelector(FetchStrategy::Rendered);
        assert_eq!(selector.select("https://example.com/"), FetchStrategy::Rendered);
        assert_eq!(selector.selector_name(), "fixed");
    }
}
