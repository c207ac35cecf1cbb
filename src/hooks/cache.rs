use super::{ResponsePreprocessor, ShortCircuit};
use crate::request::Payload;
use crate::response::Response;
use crate::transport::RawResponse;
use crate::RequestError;
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// On-disk cache of successful GET bodies
///
/// Install it both as the engine's [`ShortCircuit`] (cached URLs are answered
/// without a request) and as its [`ResponsePreprocessor`] (fresh successful
/// responses are written back). Entries are keyed by the SHA-256 of the URL;
/// a redirected response is stored under its final URL.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    /// Opens a cache directory, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an entry for `url` lives in
    pub fn entry_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.dir.join(format!("{}.body", hex::encode(digest)))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entry_path(url).is_file()
    }
}

impl ShortCircuit for ResponseCache {
    fn answer(&self, payload: &Payload) -> Option<RawResponse> {
        if *payload.method() != Method::GET || payload.body().is_some() {
            return None;
        }
        let body = std::fs::read(self.entry_path(payload.url())).ok()?;
        tracing::debug!("Answered {} from cache", payload.url());
        Some(RawResponse::new(payload.url(), StatusCode::OK, body))
    }
}

impl ResponsePreprocessor for ResponseCache {
    fn success(&self, response: Response) -> Result<Response, RequestError> {
        // Zero attempts means the response came from the cache itself
        if response.attempts() > 0 && response.status().is_success() {
            let path = self.entry_path(response.url());
            if let Err(e) = std::fs::write(&path, response.bytes()) {
                tracing::warn!("Failed to cache {}: {}", response.url(), e);
            }
        }
        Ok(response)
    }
}
