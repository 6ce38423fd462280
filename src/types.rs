//! Core types shared across the crawler

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Stable identifier of an accepted page, derived from its URL.
///
/// The first 128 bits of SHA-256 over the normalized URL, hex encoded. The
/// same URL always yields the same id across runs, so page files and the
/// reverse map line up after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Derive the id for a (normalized) URL string
    pub fn from_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        DocumentId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the stored page body
    pub fn page_file_name(&self) -> String {
        format!("{}.html", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An accepted page on its way to the document writer
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub url: String,
    pub body: Vec<u8>,
}

impl DocumentRecord {
    pub fn new(url: impl Into<String>, body: Vec<u8>) -> Self {
        let url = url.into();
        Self {
            id: DocumentId::from_url(&url),
            url,
            body,
        }
    }
}

/// One line of the reverse id → URL map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMapEntry {
    pub id: DocumentId,
    pub url: String,
}

/// Owning domain of a URL: host plus an explicit non-default port.
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
