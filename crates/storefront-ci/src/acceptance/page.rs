//! Minimal HTML inspection for storefront pages.
//!
//! The scenarios only need a handful of facts about a rendered page (its
//! title, the first heading, which product and collection links it shows,
//! whether an add-to-cart control exists), so pages are scanned with
//! regular expressions rather than parsed into a DOM.

use std::sync::LazyLock;

use regex::Regex;

static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap());
static HREF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).unwrap());
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static PRODUCT_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/[a-z]{2}-[a-z]{2})?/products/[^/?#]+").unwrap());
static COLLECTION_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/[a-z]{2}-[a-z]{2})?/collections/[^/?#]+").unwrap());
static COLLECTIONS_ROOT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/[a-z]{2}-[a-z]{2})?/collections").unwrap());
static ADD_TO_CART_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(add\s+to\s+cart|<form[^>]*action\s*=\s*["'][^"']*/cart)"#).unwrap()
});

/// Text of the `<title>` element.
pub fn title(html: &str) -> Option<String> {
    TITLE_REGEX
        .captures(html)
        .map(|c| collapse_whitespace(&c[1]))
}

/// Text of the first `<h1>`, with nested markup removed. `None` when absent
/// or empty.
pub fn heading(html: &str) -> Option<String> {
    let raw = HEADING_REGEX.captures(html)?;
    let text = collapse_whitespace(&TAG_REGEX.replace_all(&raw[1], " "));
    (!text.is_empty()).then_some(text)
}

/// Every anchor href, in document order, without duplicates.
pub fn links(html: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in HREF_REGEX.captures_iter(html) {
        let href = cap[1].trim().to_string();
        if !seen.contains(&href) {
            seen.push(href);
        }
    }
    seen
}

/// Links to product detail pages (`/products/<handle>`).
pub fn product_links(html: &str) -> Vec<String> {
    links(html)
        .into_iter()
        .filter(|href| PRODUCT_PATH_REGEX.is_match(href_path(href)))
        .collect()
}

/// Links to collection pages (`/collections/<handle>`).
pub fn collection_links(html: &str) -> Vec<String> {
    links(html)
        .into_iter()
        .filter(|href| COLLECTION_PATH_REGEX.is_match(href_path(href)))
        .collect()
}

/// Whether the page offers an add-to-cart control.
pub fn has_add_to_cart(html: &str) -> bool {
    ADD_TO_CART_REGEX.is_match(html)
}

/// Whether a URL path is the collections index or below it.
pub fn is_collections_path(path: &str) -> bool {
    COLLECTIONS_ROOT_REGEX.is_match(path)
}

/// Path component of an href, which may be absolute or root-relative.
fn href_path(href: &str) -> &str {
    let rest = href
        .strip_prefix("https://")
        .or_else(|| href.strip_prefix("http://"))
        .or_else(|| href.strip_prefix("//"));
    match rest {
        Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => href,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
