//! Integration tests for simcrawl
//!
//! End-to-end crawls against an in-memory site, checking what lands on disk
//! and in the checkpoint.

use async_trait::async_trait;
use parking_lot::Mutex;
use simcrawl::{
    config::Config,
    crawl::{
        writer::read_url_map, CheckpointStore, Crawler, FetchError, FetchResponse, Fetcher,
        FrontierSnapshot, UrlState,
    },
    types::DocumentId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

/// Serves a fixed set of pages; anything else is a 404
#[derive(Default)]
struct MemorySite {
    pages: HashMap<String, (String, String)>,
    /// URLs that time out while `flaky` is set
    flaky_urls: Vec<String>,
    flaky: AtomicBool,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<String>>,
}

impl MemorySite {
    fn page(mut self, url: &str, html: String) -> Self {
        self.pages
            .insert(url.to_string(), ("text/html; charset=utf-8".to_string(), html));
        self
    }

    fn file(mut self, url: &str, content_type: &str, body: &str) -> Self {
        self.pages
            .insert(url.to_string(), (content_type.to_string(), body.to_string()));
        self
    }

    fn flaky(mut self, url: &str) -> Self {
        self.flaky_urls.push(url.to_string());
        self.flaky.store(true, Ordering::SeqCst);
        self
    }

    fn slow(mut self, url: &str, delay_ms: u64) -> Self {
        self.delays
            .insert(url.to_string(), Duration::from_millis(delay_ms));
        self
    }

    fn requested(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl Fetcher for MemorySite {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError> {
        self.requests.lock().push(url.to_string());
        if let Some(delay) = self.delays.get(url.as_str()) {
            tokio::time::sleep(*delay).await;
        }

        if self.flaky.load(Ordering::SeqCst) && self.flaky_urls.iter().any(|u| u == url.as_str()) {
            return Err(FetchError::Timeout(timeout));
        }

        match self.pages.get(url.as_str()) {
            Some((content_type, body)) => Ok(FetchResponse::new(
                url.clone(),
                200,
                vec![("Content-Type".to_string(), content_type.clone())],
                body.clone().into_bytes(),
            )),
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Distinct page text: every token is unique to `topic`
fn html(topic: &str, canonical: Option<&str>, links: &[&str]) -> String {
    let words: Vec<String> = (0..80).map(|i| format!("{}word{}", topic, i)).collect();
    let canonical = canonical
        .map(|c| format!("<link rel=\"canonical\" href=\"{}\">", c))
        .unwrap_or_default();
    let anchors: String = links
        .iter()
        .map(|l| format!("<a href=\"{}\">link</a>", l))
        .collect();
    format!(
        "<html lang=\"en\"><head>{}</head><body><p>{}</p>{}</body></html>",
        canonical,
        words.join(" "),
        anchors
    )
}

fn config(dir: &TempDir, target_pages: usize) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.crawl.target_pages = target_pages;
    config.crawl.workers = 3;
    config.crawl.idle_probe_ms = 20;
    config.crawl.rng_seed = Some(7);
    config.politeness.enabled = false;
    config
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn written_urls(config: &Config) -> Vec<String> {
    let mut urls: Vec<String> = read_url_map(&config.storage.url_map_path())
        .unwrap()
        .into_iter()
        .map(|e| e.url)
        .collect();
    urls.sort();
    urls
}

#[tokio::test]
async fn test_canonical_alias_is_visited_without_a_document() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 100);
    let site = Arc::new(
        MemorySite::default()
            .page("https://site.test/", html("seed", Some("/b"), &["/c", "/d"]))
            .page("https://site.test/b", html("bee", None, &[]))
            .page("https://site.test/c", html("sea", None, &[]))
            .page("https://site.test/d", html("dee", None, &[])),
    );

    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    crawler.add_seeds(&[url("https://site.test/")]).await;
    let report = crawler.run().await.unwrap();

    assert_eq!(
        written_urls(&cfg),
        vec![
            "https://site.test/b".to_string(),
            "https://site.test/c".to_string(),
            "https://site.test/d".to_string(),
        ]
    );
    assert_eq!(report.stats.canonical_aliases, 1);
    assert!(!report.limit_reached);

    let frontier = crawler.frontier();
    assert_eq!(frontier.state_of(&url("https://site.test/")), Some(UrlState::Visited));
    assert_eq!(frontier.state_of(&url("https://site.test/c")), Some(UrlState::Visited));
    assert_eq!(frontier.state_of(&url("https://site.test/d")), Some(UrlState::Visited));
    // Each URL is fetched once
    assert_eq!(site.requested("https://site.test/b"), 1);
}

#[tokio::test]
async fn test_near_duplicates_and_non_html_are_dropped() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 100);
    let site = Arc::new(
        MemorySite::default()
            .page(
                "https://site.test/",
                html("seed", None, &["/copy", "/feed.xml", "/fr"]),
            )
            .page("https://site.test/copy", html("seed", None, &[]))
            .file("https://site.test/feed.xml", "application/rss+xml", "<rss/>")
            .page(
                "https://site.test/fr",
                html("frpage", None, &[]).replace("lang=\"en\"", "lang=\"fr\""),
            ),
    );

    let crawler = Crawler::new(cfg.clone(), site).unwrap();
    crawler.add_seeds(&[url("https://site.test/")]).await;
    let report = crawler.run().await.unwrap();

    assert_eq!(written_urls(&cfg), vec!["https://site.test/".to_string()]);
    assert_eq!(report.stats.duplicates, 1);
    assert_eq!(report.stats.not_html, 1);
    assert_eq!(report.stats.non_english, 1);
    assert_eq!(report.fingerprints, 1);
}

#[tokio::test]
async fn test_soft_limit_writes_exactly_target_pages() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 5);

    let children: Vec<String> = (1..10).map(|i| format!("/p{}", i)).collect();
    let child_refs: Vec<&str> = children.iter().map(|s| s.as_str()).collect();
    let mut site = MemorySite::default().page("https://site.test/", html("seed", None, &child_refs));
    for i in 1..10 {
        site = site.page(
            &format!("https://site.test/p{}", i),
            html(&format!("topic{}", i), None, &[]),
        );
    }

    let crawler = Crawler::new(cfg.clone(), Arc::new(site)).unwrap();
    crawler.add_seeds(&[url("https://site.test/")]).await;
    let report = crawler.run().await.unwrap();

    assert!(report.limit_reached);
    assert_eq!(report.pages_written, 5);
    assert_eq!(written_urls(&cfg).len(), 5);
    assert_eq!(
        std::fs::read_dir(cfg.storage.pages_dir()).unwrap().count(),
        5
    );
    assert!(report.to_string().contains("target reached"));

    // Unprocessed URLs survive in the checkpoint for the next run
    let snapshot = CheckpointStore::new(cfg.storage.data_dir()).load_frontier().unwrap();
    assert!(snapshot.in_flight.is_empty());
    assert!(!snapshot.queued.is_empty());
    assert_eq!(snapshot.queued.len() + snapshot.visited.len(), 10);
}

#[tokio::test]
async fn test_restart_retries_failed_urls_once() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 100);
    let site = Arc::new(
        MemorySite::default()
            .page("https://site.test/", html("seed", None, &["/slow"]))
            .page("https://site.test/slow", html("slow", None, &[]))
            .flaky("https://site.test/slow"),
    );

    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    crawler.add_seeds(&[url("https://site.test/")]).await;
    let first = crawler.run().await.unwrap();
    assert_eq!(first.pages_written, 1);
    assert_eq!(first.frontier.failed, 1);
    drop(crawler);

    site.flaky.store(false, Ordering::SeqCst);

    // Seeds are no-ops once known
    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    assert_eq!(crawler.add_seeds(&[url("https://site.test/")]).await, 0);
    assert_eq!(
        crawler.frontier().state_of(&url("https://site.test/slow")),
        Some(UrlState::Queued)
    );
    let second = crawler.run().await.unwrap();

    assert_eq!(second.pages_written, 1);
    assert_eq!(second.frontier.failed, 0);
    assert_eq!(site.requested("https://site.test/slow"), 2);
    assert_eq!(site.requested("https://site.test/"), 1);
    assert_eq!(
        written_urls(&cfg),
        vec![
            "https://site.test/".to_string(),
            "https://site.test/slow".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_restart_without_retry_settles_failed_urls() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, 100);
    let site = Arc::new(
        MemorySite::default()
            .page("https://site.test/", html("seed", None, &["/slow"]))
            .flaky("https://site.test/slow"),
    );

    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    crawler.add_seeds(&[url("https://site.test/")]).await;
    crawler.run().await.unwrap();
    drop(crawler);

    cfg.crawl.retry_failed_on_restore = false;
    let crawler = Crawler::new(cfg, site.clone()).unwrap();
    assert_eq!(
        crawler.frontier().state_of(&url("https://site.test/slow")),
        Some(UrlState::Visited)
    );
    assert!(!crawler.frontier().has_pending());
}

#[tokio::test]
async fn test_robots_disallowed_links_are_never_fetched() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, 100);
    cfg.politeness.enabled = true;
    let site = Arc::new(
        MemorySite::default()
            .file(
                "https://site.test/robots.txt",
                "text/plain",
                "User-agent: *\nDisallow: /private\n",
            )
            .page(
                "https://site.test/",
                html("seed", None, &["/private/secret", "/public"]),
            )
            .page("https://site.test/private/secret", html("secret", None, &[]))
            .page("https://site.test/public", html("public", None, &[])),
    );

    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    crawler.add_seeds(&[url("https://site.test/")]).await;
    let report = crawler.run().await.unwrap();

    assert_eq!(
        written_urls(&cfg),
        vec![
            "https://site.test/".to_string(),
            "https://site.test/public".to_string(),
        ]
    );
    assert_eq!(report.stats.politeness_denials, 1);
    assert_eq!(report.robots_fetches, 1);
    assert_eq!(site.requested("https://site.test/private/secret"), 0);
    assert_eq!(
        crawler.frontier().state_of(&url("https://site.test/private/secret")),
        None
    );
    assert!(cfg.storage.robots_dir().join("site.test.txt").exists());
}

#[tokio::test]
async fn test_workers_wait_instead_of_refetching_at_limit() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, 1);
    cfg.crawl.workers = 2;
    cfg.politeness.enabled = true;
    cfg.politeness.cache_rules_on_disk = false;
    // b holds the only slot while its link waits on a slow robots.txt
    let site = Arc::new(
        MemorySite::default()
            .page("https://site.test/a", html("apple", None, &[]))
            .page("https://site.test/b", html("banana", None, &["https://other.test/x"]))
            .file("https://other.test/robots.txt", "text/plain", "User-agent: *\nDisallow:\n")
            .slow("https://site.test/a", 50)
            .slow("https://site.test/b", 10)
            .slow("https://other.test/robots.txt", 500),
    );

    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    crawler
        .add_seeds(&[url("https://site.test/a"), url("https://site.test/b")])
        .await;
    let report = crawler.run().await.unwrap();

    assert_eq!(report.pages_written, 1);
    assert!(report.limit_reached);
    assert!(site.requested("https://site.test/a") <= 1);
    assert!(site.requested("https://site.test/b") <= 1);
    assert!(report.stats.released_at_limit <= 2);

    // Whichever page lost the race is kept for the next run
    let snapshot = CheckpointStore::new(cfg.storage.data_dir()).load_frontier().unwrap();
    assert!(!snapshot.queued.is_empty());
    assert!(snapshot.in_flight.is_empty());
}

#[tokio::test]
async fn test_page_lost_in_crash_is_written_on_resume() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 100);
    let site = Arc::new(MemorySite::default().page("https://site.test/", html("seed", None, &[])));

    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    crawler.add_seeds(&[url("https://site.test/")]).await;
    crawler.run().await.unwrap();
    drop(crawler);

    // Crash after the fingerprint was checkpointed but before the body hit disk
    let id = DocumentId::from_url("https://site.test/");
    let store = CheckpointStore::new(cfg.storage.data_dir());
    assert!(store.load_fingerprints().unwrap().contains_key(&id));
    std::fs::remove_file(cfg.storage.pages_dir().join(id.page_file_name())).unwrap();
    std::fs::remove_file(cfg.storage.url_map_path()).unwrap();
    store
        .save_frontier(&FrontierSnapshot {
            in_flight: vec!["https://site.test/".to_string()],
            ..FrontierSnapshot::default()
        })
        .unwrap();

    let crawler = Crawler::new(cfg.clone(), site.clone()).unwrap();
    let report = crawler.run().await.unwrap();

    assert_eq!(report.pages_written, 1);
    assert_eq!(report.stats.duplicates, 0);
    assert_eq!(report.fingerprints, 1);
    assert!(cfg.storage.pages_dir().join(id.page_file_name()).exists());
    assert_eq!(written_urls(&cfg), vec!["https://site.test/".to_string()]);
    assert_eq!(site.requested("https://site.test/"), 2);
}
