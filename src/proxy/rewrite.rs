//! HTML rewriting
//!
//! Documents are streamed through `lol_html`, which addresses attributes on a tolerant
//! tokenizer instead of raw text. Every `href`/`src`/`action` on the rewritten tag set is
//! replaced with its proxy-relative form, a `<base>` element is added when missing, and a
//! small script routes `window.open` back through `/proxy`.
//!
//! If the streaming rewriter fails, the document is rewritten with a regex substitution
//! that applies the same classification rules.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::LazyLock;

use lol_html::errors::RewritingError;
use lol_html::html_content::{ContentType, EndTag};
use lol_html::{element, EndTagHandler, HtmlRewriter, Settings};
use regex::{Captures, Regex};
use tracing::{debug, warn};
use url::Url;

use super::classify::rewrite_reference;

/// Marker attribute on the injected script
const INTERCEPT_MARKER: &str = "data-portal-intercept";

const INTERCEPT_SCRIPT: &str = r#"<script data-portal-intercept>
(function(){
  var origOpen = window.open;
  window.open = function(u, name) {
    try {
      var parsed = new URL(u, location.href);
      location.href = '/proxy?url=' + encodeURIComponent(parsed.href);
      return null;
    } catch (e) {
      return origOpen.apply(this, arguments);
    }
  };
})();
</script>"#;

/// Attribute rewritten on each tag
const REWRITE_TARGETS: &[(&str, &str)] = &[
    ("a", "href"),
    ("link", "href"),
    ("script", "src"),
    ("img", "src"),
    ("iframe", "src"),
    ("form", "action"),
];

/// A whole start tag; quoted values may contain `>`
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<([a-zA-Z][a-zA-Z0-9]*)((?:\s+[^\s"'<>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'<>`]+))?)*)(\s*/?>)"#,
    )
    .unwrap()
});
/// One attribute inside the attribute list captured by `TAG_RE`
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\s+)([^\s"'<>/=]+)(?:(\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'<>`]+)))?"#)
        .unwrap()
});
static BASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base\s[^>]*?\bhref\s*=").unwrap());
static HEAD_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").unwrap());
static HTML_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<html(?:\s[^>]*)?>").unwrap());
static BODY_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</body\s*>").unwrap());

/// Per-document rewrite inputs
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// URL every relative reference is resolved against
    pub base_url: Url,
    /// Scheme, host and port of `base_url`
    pub origin_url: String,
}

impl RewriteContext {
    pub fn new(base_url: Url) -> Self {
        let origin_url = base_url.origin().ascii_serialization();
        Self {
            base_url,
            origin_url,
        }
    }

    fn base_tag(&self) -> String {
        format!(r#"<base href="{}/">"#, self.origin_url.replace('"', "&quot;"))
    }
}

/// What the document already contains
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DocumentShape {
    has_base: bool,
    has_head: bool,
    has_html: bool,
    has_intercept: bool,
}

/// Rewrite a document, falling back to text substitution if the streaming rewriter fails
pub fn rewrite_document(html: &[u8], ctx: &RewriteContext) -> Vec<u8> {
    match rewrite_with_tree(html, ctx) {
        Ok(output) => output,
        Err(e) => {
            warn!(
                "Streaming rewrite of {} failed ({}), using text substitution",
                ctx.base_url, e
            );
            rewrite_with_substitution(&String::from_utf8_lossy(html), ctx).into_bytes()
        }
    }
}

fn scan_shape(html: &[u8]) -> Result<DocumentShape, RewritingError> {
    let has_base = Cell::new(false);
    let has_head = Cell::new(false);
    let has_html = Cell::new(false);
    let has_intercept = Cell::new(false);

    let mut scanner = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("base[href]", |_el| {
                    has_base.set(true);
                    Ok(())
                }),
                element!("head", |_el| {
                    has_head.set(true);
                    Ok(())
                }),
                element!("html", |_el| {
                    has_html.set(true);
                    Ok(())
                }),
                element!("script[data-portal-intercept]", |_el| {
                    has_intercept.set(true);
                    Ok(())
                }),
            ],
            ..Settings::new()
        },
        |_: &[u8]| {},
    );
    scanner.write(html)?;
    scanner.end()?;

    Ok(DocumentShape {
        has_base: has_base.get(),
        has_head: has_head.get(),
        has_html: has_html.get(),
        has_intercept: has_intercept.get(),
    })
}

/// Rewrite with the streaming tokenizer
pub fn rewrite_with_tree(html: &[u8], ctx: &RewriteContext) -> Result<Vec<u8>, RewritingError> {
    let shape = scan_shape(html)?;
    let base_tag = ctx.base_tag();
    let base_inserted = Cell::new(shape.has_base);
    let body_seen = Cell::new(false);
    // Set from the </body> handler, which only runs if the document has one.
    let script_inserted = Rc::new(Cell::new(shape.has_intercept));

    let mut handlers = vec![
        element!("head", |el| {
            if !base_inserted.get() {
                el.prepend(&base_tag, ContentType::Html);
                base_inserted.set(true);
            }
            Ok(())
        }),
        element!("html", |el| {
            if !shape.has_head && !base_inserted.get() {
                el.prepend(&format!("<head>{}</head>", base_tag), ContentType::Html);
                base_inserted.set(true);
            }
            Ok(())
        }),
        element!("body", |el| {
            if body_seen.get() || shape.has_intercept {
                return Ok(());
            }
            body_seen.set(true);
            if let Some(end_handlers) = el.end_tag_handlers() {
                let inserted = Rc::clone(&script_inserted);
                let handler: EndTagHandler<'static> = Box::new(move |end: &mut EndTag<'_>| {
                    end.before(INTERCEPT_SCRIPT, ContentType::Html);
                    inserted.set(true);
                    Ok(())
                });
                end_handlers.push(handler);
            }
            Ok(())
        }),
    ];

    for &(tag, attr) in REWRITE_TARGETS {
        let selector = format!("{}[{}]", tag, attr);
        let base = &ctx.base_url;
        handlers.push(element!(selector, move |el| {
            let Some(raw) = el.get_attribute(attr) else {
                return Ok(());
            };
            if let Some(rewritten) = rewrite_reference(&decode_amp(&raw), base) {
                if let Err(e) = el.set_attribute(attr, &rewritten) {
                    debug!("Keeping original {} on <{}>: {}", attr, tag, e);
                }
            }
            Ok(())
        }));
    }

    let mut output = Vec::with_capacity(html.len() + INTERCEPT_SCRIPT.len() + base_tag.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            ..Settings::new()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );
    rewriter.write(html)?;
    rewriter.end()?;

    // No <html> or <head> to hang it on: the parser opens <head> for a <base> after the prolog.
    if !shape.has_base && !shape.has_head && !shape.has_html {
        let rest = output.split_off(prolog_end(&output));
        output.extend_from_slice(base_tag.as_bytes());
        output.extend_from_slice(&rest);
    }

    if !script_inserted.get() {
        output.extend_from_slice(INTERCEPT_SCRIPT.as_bytes());
    }

    Ok(output)
}

/// Rewrite by matching tag text
///
/// Only used when the streaming rewriter cannot process the document.
pub fn rewrite_with_substitution(html: &str, ctx: &RewriteContext) -> String {
    let mut output = TAG_RE
        .replace_all(html, |tag: &Captures| {
            let name = tag[1].to_ascii_lowercase();
            if !REWRITE_TARGETS.iter().any(|&(t, _)| t == name) {
                return tag[0].to_string();
            }

            let attributes = ATTRIBUTE_RE
                .replace_all(&tag[2], |attr: &Captures| rewrite_attribute(&name, attr, ctx));
            format!("<{}{}{}", &tag[1], attributes, &tag[3])
        })
        .into_owned();

    if !BASE_RE.is_match(&output) {
        let base_tag = ctx.base_tag();
        if let Some(head) = HEAD_OPEN_RE.find(&output) {
            output.insert_str(head.end(), &base_tag);
        } else if let Some(html_open) = HTML_OPEN_RE.find(&output) {
            output.insert_str(html_open.end(), &format!("<head>{}</head>", base_tag));
        } else {
            output.insert_str(prolog_end(output.as_bytes()), &base_tag);
        }
    }

    if !output.contains(INTERCEPT_MARKER) {
        match BODY_CLOSE_RE.find_iter(&output).last() {
            Some(body_close) => output.insert_str(body_close.start(), INTERCEPT_SCRIPT),
            None => output.push_str(INTERCEPT_SCRIPT),
        }
    }

    output
}

fn rewrite_attribute(tag: &str, attr: &Captures, ctx: &RewriteContext) -> String {
    let original = attr[0].to_string();
    let name = &attr[2];
    let targeted = REWRITE_TARGETS
        .iter()
        .any(|&(t, a)| t == tag && a.eq_ignore_ascii_case(name));
    if !targeted {
        return original;
    }

    let (raw, quote) = match (attr.get(4), attr.get(5), attr.get(6)) {
        (Some(value), _, _) => (value.as_str(), '"'),
        (None, Some(value), _) => (value.as_str(), '\''),
        (None, None, Some(value)) => (value.as_str(), '"'),
        _ => return original,
    };

    match rewrite_reference(&decode_amp(raw), &ctx.base_url) {
        Some(rewritten) => format!(
            "{}{}{}{}{}{}",
            &attr[1], name, &attr[3], quote, rewritten, quote
        ),
        None => original,
    }
}

/// Offset just past a leading BOM, comments and doctype
fn prolog_end(html: &[u8]) -> usize {
    let mut pos = if html.starts_with(b"\xEF\xBB\xBF") { 3 } else { 0 };

    loop {
        let rest = &html[pos..];
        let at = pos + (rest.len() - rest.trim_ascii_start().len());
        let rest = &html[at..];

        let len = if rest.starts_with(b"<!--") {
            rest.windows(3).position(|w| w == b"-->").map(|i| i + 3)
        } else if rest.len() >= 9 && rest[..9].eq_ignore_ascii_case(b"<!doctype") {
            rest.iter().position(|&b| b == b'>').map(|i| i + 1)
        } else {
            None
        };

        match len {
            Some(len) => pos = at + len,
            None => return pos,
        }
    }
}

/// Decode `&amp;` so query strings in markup resolve to the URL the browser would request
fn decode_amp(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    value
        .replace("&amp;", "&")
        .replace("&#38;", "&")
        .replace("&#x26;", "&")
        .replace("&#X26;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(base: &str) -> RewriteContext {
        RewriteContext::new(Url::parse(base).unwrap())
    }

    fn tree(html: &str, base: &str) -> String {
        String::from_utf8(rewrite_with_tree(html.as_bytes(), &ctx(base)).unwrap()).unwrap()
    }

    fn text(html: &str, base: &str) -> String {
        rewrite_with_substitution(html, &ctx(base))
    }

    const PAGE: &str = r##"<!DOCTYPE html>
<html>
<head><title>Shop</title><link rel="stylesheet" href="/css/site.css"></head>
<body>
<a href="/about">About</a>
<a href="javascript:void(0)">Noop</a>
<a href="mailto:hi@example.com">Mail</a>
<a href="#top">Top</a>
<img src="logo.png">
<form action="search"><input name="q"></form>
<p>href="/not-an-attribute-but-looks-like-one"</p>
</body>
</html>"##;

    #[test]
    fn test_context_origin() {
        let context = ctx("https://example.com:8443/a/b?c=d");
        assert_eq!(context.origin_url, "https://example.com:8443");
        assert_eq!(context.base_tag(), r#"<base href="https://example.com:8443/">"#);
    }

    #[test]
    fn test_navigation_link_scenario() {
        let out = tree(r#"<html><body><a href="/about">x</a></body></html>"#, "https://example.com/");
        assert!(out.contains(r#"<a href="/proxy?url=https%3A%2F%2Fexample.com%2Fabout">"#));
    }

    #[test]
    fn test_asset_scenario() {
        let out = tree(
            r#"<html><body><img src="logo.png"></body></html>"#,
            "https://example.com/shop/",
        );
        assert!(out.contains(r#"<img src="/resource?url=https%3A%2F%2Fexample.com%2Fshop%2Flogo.png">"#));
    }

    #[test]
    fn test_tree_rewrites_full_page() {
        let out = tree(PAGE, "https://example.com/shop/");

        assert!(out.contains(r#"href="/resource?url=https%3A%2F%2Fexample.com%2Fcss%2Fsite.css""#));
        assert!(out.contains(r#"action="/proxy?url=https%3A%2F%2Fexample.com%2Fshop%2Fsearch""#));
        assert!(out.contains(r#"<a href="javascript:void(0)">"#));
        assert!(out.contains(r#"<a href="mailto:hi@example.com">"#));
        assert!(out.contains(r##"<a href="#top">"##));
        // Text content is never touched.
        assert!(out.contains(r#"<p>href="/not-an-attribute-but-looks-like-one"</p>"#));
    }

    #[test]
    fn test_tree_inserts_base_as_first_head_child() {
        let out = tree(PAGE, "https://example.com/shop/");
        assert!(out.contains(r#"<head><base href="https://example.com/"><title>"#));
        assert_eq!(out.matches("<base").count(), 1);
    }

    #[test]
    fn test_tree_keeps_existing_base() {
        let html = r#"<html><head><base href="https://cdn.example.com/"></head><body></body></html>"#;
        let out = tree(html, "https://example.com/");
        assert_eq!(out.matches("<base").count(), 1);
        assert!(out.contains(r#"<base href="https://cdn.example.com/">"#));
    }

    #[test]
    fn test_tree_creates_head_when_missing() {
        let out = tree("<html><body><p>hi</p></body></html>", "https://example.com/x");
        assert!(out.starts_with(r#"<html><head><base href="https://example.com/"></head><body>"#));
    }

    #[test]
    fn test_tree_handles_bare_fragment() {
        let out = tree(r#"<a href="page2">next</a>"#, "https://example.com/list/");
        assert!(out.starts_with(r#"<base href="https://example.com/">"#));
        assert!(out.contains("/proxy?url=https%3A%2F%2Fexample.com%2Flist%2Fpage2"));
        assert!(out.ends_with("</script>"));
    }

    #[test]
    fn test_tree_injects_script_before_body_close() {
        let out = tree(PAGE, "https://example.com/");
        let script = out.find(INTERCEPT_MARKER).unwrap();
        let body_close = out.find("</body>").unwrap();
        assert!(script < body_close);
        assert_eq!(out.matches(INTERCEPT_MARKER).count(), 1);
    }

    #[test]
    fn test_tree_tolerates_malformed_markup() {
        let html = r#"<html><head><title>x</title><body><a href="/a"><img src="b.gif"<div></a"#;
        let out = tree(html, "https://example.com/");
        assert!(out.contains("/proxy?url=https%3A%2F%2Fexample.com%2Fa"));
        assert!(out.contains(INTERCEPT_MARKER));
    }

    #[test]
    fn test_tree_keeps_unparsable_values() {
        let out = tree(
            r#"<html><body><a href="http://[::1">bad</a><a href="/ok">ok</a></body></html>"#,
            "https://example.com/",
        );
        assert!(out.contains(r#"<a href="http://[::1">"#));
        assert!(out.contains("/proxy?url=https%3A%2F%2Fexample.com%2Fok"));
    }

    #[test]
    fn test_tree_decodes_entities_in_query() {
        let out = tree(
            r#"<html><body><a href="/list?a=1&amp;b=2">x</a></body></html>"#,
            "https://example.com/",
        );
        assert!(out.contains("/proxy?url=https%3A%2F%2Fexample.com%2Flist%3Fa%3D1%26b%3D2"));
    }

    #[test]
    fn test_tree_only_rewrites_listed_attributes() {
        let out = tree(
            r#"<html><body><div src="/x"></div><a src="/y" href="/z">z</a></body></html>"#,
            "https://example.com/",
        );
        assert!(out.contains(r#"<div src="/x">"#));
        assert!(out.contains(r#"src="/y""#));
        assert!(out.contains("/proxy?url=https%3A%2F%2Fexample.com%2Fz"));
    }

    #[test]
    fn test_tree_is_idempotent() {
        let once = tree(PAGE, "https://example.com/shop/");
        let twice = tree(&once, "https://example.com/shop/");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_substitution_rewrites_and_skips_ignored() {
        let out = text(PAGE, "https://example.com/shop/");

        assert!(out.contains(r#"<a href="/proxy?url=https%3A%2F%2Fexample.com%2Fabout">"#));
        assert!(out.contains(r#"<img src="/resource?url=https%3A%2F%2Fexample.com%2Fshop%2Flogo.png">"#));
        assert!(out.contains(r#"<a href="javascript:void(0)">"#));
        assert!(out.contains(r#"<a href="mailto:hi@example.com">"#));
        assert!(out.contains(r##"<a href="#top">"##));
    }

    #[test]
    fn test_substitution_leaves_text_and_other_tags_alone() {
        let out = text(PAGE, "https://example.com/shop/");
        assert!(out.contains(r#"<p>href="/not-an-attribute-but-looks-like-one"</p>"#));

        let out = text(r#"<div src="/x"></div>"#, "https://example.com/");
        assert!(out.contains(r#"<div src="/x">"#));
    }

    #[test]
    fn test_substitution_skips_prefixed_attributes() {
        let out = text(r#"<a data-href="/x" href="/y">t</a>"#, "https://example.com/");
        assert!(out.contains(r#"data-href="/x""#));
        assert!(out.contains(r#" href="/proxy?url=https%3A%2F%2Fexample.com%2Fy""#));
    }

    #[test]
    fn test_substitution_matches_tags_case_insensitively() {
        let out = text(r#"<A class="x" HREF="/a">t</A><p>href="/b"</p>"#, "https://example.com/");
        assert!(out.contains(r#"<A class="x" HREF="/proxy?url=https%3A%2F%2Fexample.com%2Fa">"#));
        assert!(out.contains(r#"<p>href="/b"</p>"#));
    }

    #[test]
    fn test_substitution_handles_gt_in_quoted_values() {
        let out = text(
            r#"<a title="a>b" href="https://other.example/x">x</a>"#,
            "https://example.com/",
        );
        assert!(out.contains(r#"title="a>b""#));
        assert!(out.contains(r#"href="/proxy?url=https%3A%2F%2Fother.example%2Fx""#));
        assert!(!out.contains(r#"href="https://other.example/x""#));

        let out = tree(
            r#"<a title="a>b" href="https://other.example/x">x</a>"#,
            "https://example.com/",
        );
        assert!(out.contains(r#"href="/proxy?url=https%3A%2F%2Fother.example%2Fx""#));
    }

    #[test]
    fn test_substitution_quotes_unquoted_values() {
        let out = text("<img src=logo.png alt=x>", "https://example.com/shop/");
        assert!(out.contains(r#"<img src="/resource?url=https%3A%2F%2Fexample.com%2Fshop%2Flogo.png" alt=x>"#));
    }

    #[test]
    fn test_substitution_ignores_attribute_text_inside_values() {
        let out = text(r#"<a title="see href='/x'" href="/y">t</a>"#, "https://example.com/");
        assert!(out.contains(r#"title="see href='/x'""#));
        assert!(out.contains(r#"href="/proxy?url=https%3A%2F%2Fexample.com%2Fy""#));
    }

    #[test]
    fn test_base_goes_after_doctype() {
        let html = r#"<!DOCTYPE html><title>t</title><a href="/a">a</a>"#;

        let out = tree(html, "https://example.com/");
        assert!(out.starts_with(r#"<!DOCTYPE html><base href="https://example.com/"><title>"#));

        let out = text(html, "https://example.com/");
        assert!(out.starts_with(r#"<!DOCTYPE html><base href="https://example.com/"><title>"#));
    }

    #[test]
    fn test_prolog_end_skips_bom_comments_and_doctype() {
        assert_eq!(prolog_end(b"<p>x</p>"), 0);
        assert_eq!(prolog_end(b"<!doctype html>\n<p>"), 15);
        assert_eq!(prolog_end(b"<!-- a -->\n<!DOCTYPE html><p>"), 26);
        assert_eq!(prolog_end(b"\xEF\xBB\xBF<p>"), 3);
        assert_eq!(prolog_end(b"<!-- unterminated"), 0);
    }

    #[test]
    fn test_base_without_href_does_not_count() {
        let html = r#"<html><head><base target="_blank"></head><body></body></html>"#;

        let out = tree(html, "https://example.com/");
        assert!(out.contains(r#"<head><base href="https://example.com/"><base target="_blank">"#));

        let out = text(html, "https://example.com/");
        assert!(out.contains(r#"<head><base href="https://example.com/"><base target="_blank">"#));
    }

    #[test]
    fn test_substitution_preserves_single_quotes() {
        let out = text("<a href='/about'>x</a>", "https://example.com/");
        assert!(out.contains("<a href='/proxy?url=https%3A%2F%2Fexample.com%2Fabout'>"));
    }

    #[test]
    fn test_substitution_inserts_base_and_script() {
        let out = text(PAGE, "https://example.com/shop/");
        assert!(out.contains(r#"<head><base href="https://example.com/"><title>"#));
        assert!(out.find(INTERCEPT_MARKER).unwrap() < out.rfind("</body>").unwrap());
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let once = text(PAGE, "https://example.com/shop/");
        let twice = text(&once, "https://example.com/shop/");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rewrite_document_uses_tree_path() {
        let out = rewrite_document(PAGE.as_bytes(), &ctx("https://example.com/shop/"));
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"<p>href="/not-an-attribute-but-looks-like-one"</p>"#));
    }
}
