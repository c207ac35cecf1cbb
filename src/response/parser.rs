//! HTML parser for extracting links and metadata
//!
//! This module is the parsing collaborator of [`Response`](super::Response).
//! Parsing produces a [`Document`] that owns plain strings only, so it can be
//! cached on a response shared between threads.

use scraper::{Html, Selector};
use url::Url;

/// Structured view of an HTML body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// The page title (from the `<title>` tag)
    pub title: Option<String>,

    /// The `<base href>` value, if the page declares one
    pub base: Option<String>,

    /// Raw `href` values of followable links, in document order
    pub hrefs: Vec<String>,
}

/// Parses HTML content into a [`Document`]
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - stylesheets, scripts and images
///
/// # Example
///
/// ```
/// use swarm_requests::response::parse_document;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let document = parse_document(html);
/// assert_eq!(document.title, Some("Test".to_string()));
/// assert_eq!(document.hrefs, vec!["/page".to_string()]);
/// ```
pub fn parse_document(html: &str) -> Document {
    let document = Html::parse_document(html);

    Document {
        title: extract_title(&document),
        base: extract_base(&document),
        hrefs: extract_hrefs(&document),
    }
}

/// Resolves a document's links against the URL it was fetched from
///
/// A `<base href>` takes precedence over `page_url`. Returns absolute HTTP(S)
/// URLs with fragments stripped; `javascript:`, `mailto:`, `tel:`, data URIs
/// and fragment-only links are dropped.
pub fn extract_links(document: &Document, page_url: Option<&Url>) -> Vec<Url> {
    let base = match (&document.base, page_url) {
        (Some(base), Some(page)) => page.join(base).ok(),
        (Some(base), None) => Url::parse(base).ok(),
        (None, Some(page)) => Some(page.clone()),
        (None, None) => None,
    };

    document
        .hrefs
        .iter()
        .filter_map(|href| resolve_link(href, base.as_ref()))
        .collect()
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_base(document: &Html) -> Option<String> {
    let base_selector = Selector::parse("base[href]").ok()?;

    document
        .select(&base_selector)
        .next()
        .and_then(|element| element.value().attr("href"))
        .map(|href| href.trim().to_string())
}

/// Collects the raw hrefs of all followable links
fn extract_hrefs(document: &Html) -> Vec<String> {
    let mut hrefs = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            // Skip if it has the download attribute
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                hrefs.push(href.trim().to_string());
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                hrefs.push(href.trim().to_string());
            }
        }
    }

    hrefs
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel:, data: schemes
/// - Fragment-only links
/// - Relative links without a base to resolve against
fn resolve_link(href: &str, base: Option<&Url>) -> Option<Url> {
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.set_fragment(None);
    Some(url)
}
