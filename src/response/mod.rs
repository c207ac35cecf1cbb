//! Lazily-derived responses
//!
//! A [`Response`] keeps the raw status, headers and body that the transport
//! produced. Decoded text, the parsed [`Document`] and the extracted links
//! are computed on first access and cached for the response's lifetime.
//! Each cache slot is a [`OnceLock`], so concurrent first accesses through a
//! shared `Arc<Response>` still compute the view exactly once.

mod parser;

pub use parser::{extract_links, parse_document, Document};

use crate::transport::RawResponse;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::OnceLock;
use url::Url;

/// Successful outcome of one request
#[derive(Debug)]
pub struct Response {
    raw: RawResponse,
    attempts: u32,
    text: OnceLock<String>,
    document: OnceLock<Document>,
    links: OnceLock<Vec<Url>>,
}

impl Response {
    /// Wraps a raw transport outcome
    ///
    /// `attempts` counts every attempt including the successful one.
    pub fn new(raw: RawResponse, attempts: u32) -> Self {
        Self {
            raw,
            attempts,
            text: OnceLock::new(),
            document: OnceLock::new(),
            links: OnceLock::new(),
        }
    }

    /// Final URL after redirects
    pub fn url(&self) -> &str {
        &self.raw.url
    }

    pub fn status(&self) -> StatusCode {
        self.raw.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.raw.headers
    }

    /// The undecoded body
    pub fn bytes(&self) -> &[u8] {
        &self.raw.body
    }

    /// How many attempts it took to get this response
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the Content-Type header value, if present and valid UTF-8
    pub fn content_type(&self) -> Option<&str> {
        self.raw
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// Returns true if the Content-Type says HTML (or is missing)
    pub fn is_html(&self) -> bool {
        self.content_type()
            .map_or(true, |ct| ct.to_ascii_lowercase().contains("html"))
    }

    /// Body decoded as UTF-8, with invalid sequences replaced
    pub fn text(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.raw.body).into_owned())
    }

    /// Parsed HTML view of the body
    pub fn document(&self) -> &Document {
        self.document.get_or_init(|| {
            tracing::trace!("Parsing {} ({} bytes)", self.raw.url, self.raw.body.len());
            parse_document(self.text())
        })
    }

    /// The `<title>` of the page, if any
    pub fn title(&self) -> Option<&str> {
        self.document().title.as_deref()
    }

    /// Absolute links found in the body, resolved against the final URL
    pub fn links(&self) -> &[Url] {
        self.links.get_or_init(|| {
            let page_url = Url::parse(&self.raw.url).ok();
            extract_links(self.document(), page_url.as_ref())
        })
    }

    /// Consumes the response, returning the raw outcome
    pub fn into_raw(self) -> RawResponse {
        self.raw
    }
}
