//! HTTP client for a self-hosted LANraragi archive server.
//!
//! Covers the endpoints a reader needs: the archive index, thumbnails, page
//! extraction, page images and clearing the "new" flag. Requests carry the
//! API key as a base64 bearer token.

mod types;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use thiserror::Error;

pub use types::{ArchiveEntry, ExtractResponse, parse_archive_index, parse_extract};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum LanraragiError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("server error: {0}")]
    Server(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// A LANraragi API client bound to one server.
#[derive(Clone)]
pub struct LanraragiClient {
    base_url: String,
    auth_header: Option<String>,
    http: reqwest::Client,
    timeout: Duration,
}

impl std::fmt::Debug for LanraragiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanraragiClient")
            .field("base_url", &self.base_url)
            .field("auth_header", &self.auth_header.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LanraragiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: bearer_token(api_key),
            http,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of an archive-scoped endpoint, e.g. `archive_url(id, "/thumbnail")`.
    pub fn archive_url(&self, id: &str, suffix: &str) -> String {
        format!(
            "{}/api/archives/{}{}",
            self.base_url,
            urlencoding::encode(id),
            suffix
        )
    }

    /// Resolve a page identifier returned by extraction against the base URL.
    ///
    /// The server hands out paths like `./api/archives/<id>/page?path=..`;
    /// absolute URLs pass through untouched.
    pub fn page_url(&self, page_id: &str) -> String {
        if page_id.starts_with("http://") || page_id.starts_with("https://") {
            return page_id.to_string();
        }
        let path = page_id.trim_start_matches('.').trim_start_matches('/');
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, url).timeout(self.timeout);
        if let Some(ref auth) = self.auth_header {
            req = req.header(AUTHORIZATION, auth);
        }
        req
    }

    async fn send(&self, method: Method, url: &str) -> Result<Vec<u8>, LanraragiError> {
        tracing::trace!(%method, url, "lanraragi request");
        let resp = self.request(method, url).send().await?;
        check_status(&resp)?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// `GET /api/archives`
    pub async fn list_archives(&self) -> Result<Vec<ArchiveEntry>, LanraragiError> {
        let url = format!("{}/api/archives", self.base_url);
        let body = self.send(Method::GET, &url).await?;
        parse_archive_index(&body)
    }

    /// `GET /api/archives/:id/thumbnail`
    pub async fn fetch_thumbnail(&self, id: &str) -> Result<Vec<u8>, LanraragiError> {
        let url = self.archive_url(id, "/thumbnail");
        self.send(Method::GET, &url).await
    }

    /// `POST /api/archives/:id/extract`, returning page identifiers in reading order.
    pub async fn extract_archive(&self, id: &str) -> Result<Vec<String>, LanraragiError> {
        let url = self.archive_url(id, "/extract");
        let body = self.send(Method::POST, &url).await?;
        parse_extract(&body)
    }

    /// Fetch the image bytes behind a page identifier.
    pub async fn fetch_page(&self, page_id: &str) -> Result<Vec<u8>, LanraragiError> {
        let url = self.page_url(page_id);
        self.send(Method::GET, &url).await
    }

    /// `DELETE /api/archives/:id/isnew`
    pub async fn clear_new_flag(&self, id: &str) -> Result<(), LanraragiError> {
        let url = self.archive_url(id, "/isnew");
        let body = self.send(Method::DELETE, &url).await?;
        types::check_operation(&body)
    }
}

/// Build the `Authorization` header value. An empty key means the server
/// runs without authentication.
pub fn bearer_token(api_key: &str) -> Option<String> {
    if api_key.is_empty() {
        None
    } else {
        Some(format!("Bearer {}", STANDARD.encode(api_key)))
    }
}

/// Map a non-success HTTP status to [`LanraragiError::Status`].
pub fn check_status(resp: &reqwest::Response) -> Result<(), LanraragiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(LanraragiError::Status(status.as_u16()))
    }
}
