//! HTTP fetching
//!
//! The crawl core only sees the `Fetcher` trait; `HttpFetcher` is the
//! reqwest-backed implementation used by the CLI. Redirects are followed
//! below this boundary, so any final status of 300 or above is an error.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during fetching
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Unexpected status {0}")]
    Status(u16),
    #[error("Content too large: {0} bytes")]
    ContentTooLarge(usize),
}

/// A completed response with a success status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The fetched URL (may differ from the request due to redirects)
    pub final_url: Url,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Raw response body
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(final_url: Url, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            final_url,
            status,
            headers,
            body,
        }
    }

    /// Get a header value (case-insensitive name)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    /// Check if this is hypertext content
    pub fn is_html(&self) -> bool {
        let content_type = self.content_type().to_ascii_lowercase();
        content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP collaborator used by workers and the politeness cache
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    http_client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, max_body_bytes: usize) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            http_client,
            max_body_bytes,
        })
    }

    fn classify(error: reqwest::Error, timeout: Duration) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(timeout)
        } else if error.is_connect() {
            FetchError::Connection(error.to_string())
        } else {
            FetchError::Http(error)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError> {
        let response = self
            .http_client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(FetchError::Status(status));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_body_bytes {
                return Err(FetchError::ContentTooLarge(length as usize));
            }
        }

        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(e, timeout))?;
        if body.len() > self.max_body_bytes {
            return Err(FetchError::ContentTooLarge(body.len()));
        }

        Ok(FetchResponse {
            final_url,
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content_type: &str) -> FetchResponse {
        FetchResponse::new(
            Url::parse("https://example.com/").unwrap(),
            200,
            vec![("Content-Type".to_string(), content_type.to_string())],
            b"<html></html>".to_vec(),
        )
    }

    #[test]
    fn test_is_html() {
        assert!(response("text/html; charset=utf-8").is_html());
        assert!(response("application/xhtml+xml").is_html());
        assert!(response("TEXT/HTML").is_html());
        assert!(!response("application/pdf").is_html());
        assert!(!response("").is_html());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = response("text/html");
        assert_eq!(resp.header("content-type"), Some("text/html"));
        assert_eq!(resp.header("x-missing"), None);
    }

    #[test]
    fn test_body_text_lossy() {
        let mut resp = response("text/html");
        resp.body = vec![b'o', b'k', 0xff];
        assert!(resp.body_text().starts_with("ok"));
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new("simcrawl-test/0.1", 1024).is_ok());
    }
}
