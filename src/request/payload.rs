use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::time::Duration;
use url::Url;

/// Description of one HTTP exchange, meaningful only to the transport
///
/// The URL is kept as written by the caller. A URL that does not parse is
/// rejected by the transport as an invalid request, which surfaces as a
/// permanent failure at that item's position rather than aborting the swarm.
#[derive(Debug, Clone)]
pub struct Payload {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl Payload {
    /// Creates a payload with the given method and target
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Creates a GET payload
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST payload with a body
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// Adds a header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Overrides the transport's default timeout for this payload only
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl From<&str> for Payload {
    fn from(url: &str) -> Self {
        Self::get(url)
    }
}

impl From<String> for Payload {
    fn from(url: String) -> Self {
        Self::get(url)
    }
}

impl From<&String> for Payload {
    fn from(url: &String) -> Self {
        Self::get(url.as_str())
    }
}

impl From<Url> for Payload {
    fn from(url: Url) -> Self {
        Self::get(String::from(url))
    }
}

impl From<&Url> for Payload {
    fn from(url: &Url) -> Self {
        Self::get(url.as_str())
    }
}
