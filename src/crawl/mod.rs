//! Crawl engine: frontier, near-duplicate detection, and worker orchestration
//!
//! Key components:
//! - `Frontier`: URL lifecycle state, dedup, per-domain caps, and the shared work queue
//! - `FingerprintIndex`: SimHash fingerprints with bounded-Hamming-distance lookup
//! - `PolitenessCache`: per-domain robots.txt rules, fetched once per run
//! - `Fetcher` / `HttpFetcher`: HTTP collaborator
//! - `HtmlExtractor`: canonical link, language hint, visible text, outbound links
//! - `DocumentWriter`: serialized sink for accepted pages and the id → URL map
//! - `CheckpointStore` / `Checkpointer`: durable frontier and fingerprint state
//! - `Crawler`: wires everything together and drives the worker pool

pub mod checkpoint;
pub mod coordinator;
pub mod extractor;
pub mod fetcher;
pub mod fingerprint;
pub mod frontier;
pub mod limiter;
pub mod politeness;
pub mod stats;
pub mod worker;
pub mod writer;

pub use checkpoint::{CheckpointStore, Checkpointer, FrontierSnapshot};
pub use coordinator::{CrawlReport, Crawler};
pub use extractor::{ExtractedPage, HtmlExtractor, LanguageHint};
pub use fetcher::{FetchError, FetchResponse, Fetcher, HttpFetcher};
pub use fingerprint::{FingerprintIndex, SharedFingerprintIndex, SimHash};
pub use frontier::{Frontier, FrontierCounts, FrontierSettings, SubmitOutcome, UrlState};
pub use limiter::DomainLimiter;
pub use politeness::{PolitenessCache, RobotsRules};
pub use stats::{CrawlStats, StatsSnapshot};
pub use worker::{PageBudget, UrlOutcome, WorkerContext};
pub use writer::{DocumentWriter, WriterTask};

use url::Url;

/// Tracking/session query parameters stripped during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "sessionid",
];

/// Normalize a URL so that aliases of the same resource share one identity.
///
/// - Strips fragments
/// - Removes trailing slashes from non-root paths
/// - Strips tracking/session query parameters
/// - Sorts remaining query parameters
///
/// Scheme and host are already lowercased by the `url` crate. The path is
/// left untouched because servers treat it case-sensitively.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();

    normalized.set_fragment(None);

    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
        if normalized.path().is_empty() {
            normalized.set_path("/");
        }
    }

    if let Some(query) = normalized.query().map(|q| q.to_string()) {
        let mut params: Vec<&str> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .filter(|p| {
                let key = p.split('=').next().unwrap_or("").to_lowercase();
                !TRACKING_PARAMS.contains(&key.as_str())
            })
            .collect();

        if params.is_empty() {
            normalized.set_query(None);
        } else {
            params.sort_unstable();
            normalized.set_query(Some(&params.join("&")));
        }
    }

    normalized
}

/// Parse a raw link, keep only http(s), and normalize it.
pub fn parse_crawlable(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(normalize_url(&url)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        normalize_url(&Url::parse(s).unwrap()).to_string()
    }

    #[test]
    fn test_strips_fragment() {
        assert_eq!(norm("https://example.com/page#section"), "https://example.com/page");
    }

    #[test]
    fn test_strips_trailing_slash_except_root() {
        assert_eq!(norm("https://example.com/docs/"), "https://example.com/docs");
        assert_eq!(norm("https://example.com/"), "https://example.com/");
        assert_eq!(norm("https://example.com"), "https://example.com/");
    }

    #[test]
    fn test_query_cleanup() {
        assert_eq!(
            norm("https://example.com/p?b=2&utm_source=x&a=1"),
            "https://example.com/p?a=1&b=2"
        );
        assert_eq!(norm("https://example.com/p?utm_medium=y"), "https://example.com/p");
    }

    #[test]
    fn test_keeps_path_case() {
        assert_eq!(norm("HTTPS://EXAMPLE.com/Wiki/Page"), "https://example.com/Wiki/Page");
    }

    #[test]
    fn test_parse_crawlable() {
        assert!(parse_crawlable("https://example.com/a").is_some());
        assert!(parse_crawlable("mailto:someone@example.com").is_none());
        assert!(parse_crawlable("ftp://example.com/file").is_none());
        assert!(parse_crawlable("not a url").is_none());
    }
}
