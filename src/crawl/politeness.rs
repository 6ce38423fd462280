//! robots.txt handling
//!
//! Rules are fetched at most once per domain per run. Concurrent requesters
//! for the same domain wait on the one in-flight fetch. A missing, failed,
//! or empty robots.txt means the domain is allow-all.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use super::fetcher::Fetcher;
use crate::types::domain_of;

/// Allow/disallow patterns that apply to our user agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    allow: Vec<String>,
    disallow: Vec<String>,
}

/// One `User-agent` group while parsing
#[derive(Default)]
struct Group {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl RobotsRules {
    /// Parse robots.txt text. A group naming our agent replaces the `*`
    /// group entirely; otherwise the `*` group applies.
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        let mut groups: Vec<Group> = Vec::new();
        let mut in_agent_lines = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if !in_agent_lines {
                        groups.push(Group::default());
                    }
                    in_agent_lines = true;
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    in_agent_lines = false;
                    let Some(group) = groups.last_mut() else {
                        continue;
                    };
                    if value.is_empty() {
                        continue;
                    }
                    if directive == "allow" {
                        group.allow.push(value.to_string());
                    } else {
                        group.disallow.push(value.to_string());
                    }
                }
                _ => in_agent_lines = false,
            }
        }

        let specific = groups.iter().filter(|g| {
            g.agents
                .iter()
                .any(|a| a != "*" && !a.is_empty() && ua.contains(a.as_str()))
        });
        let wildcard = groups.iter().filter(|g| g.agents.iter().any(|a| a == "*"));

        let mut rules = RobotsRules::default();
        let mut matched = false;
        for group in specific {
            matched = true;
            rules.allow.extend(group.allow.iter().cloned());
            rules.disallow.extend(group.disallow.iter().cloned());
        }
        if !matched {
            for group in wildcard {
                rules.allow.extend(group.allow.iter().cloned());
                rules.disallow.extend(group.disallow.iter().cloned());
            }
        }
        rules
    }

    /// True when no pattern restricts anything
    pub fn is_empty(&self) -> bool {
        self.disallow.is_empty()
    }

    /// Check a path (with query). Longest match wins; ties go to allow.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| Self::path_matches(path, p))
                .map(|p| p.len())
                .max()
                .unwrap_or(0)
        };
        longest(&self.allow) >= longest(&self.disallow)
    }

    pub fn allows_url(&self, url: &Url) -> bool {
        match url.query() {
            Some(query) => self.is_allowed(&format!("{}?{}", url.path(), query)),
            None => self.is_allowed(url.path()),
        }
    }

    /// Prefix match with `*` wildcards and a `$` end anchor
    fn path_matches(path: &str, pattern: &str) -> bool {
        let (pattern, anchored) = match pattern.strip_suffix('$') {
            Some(p) => (p, true),
            None => (pattern, false),
        };

        if !pattern.contains('*') {
            return if anchored {
                path == pattern
            } else {
                path.starts_with(pattern)
            };
        }

        let mut pos = 0;
        for (i, part) in pattern.split('*').enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 {
                if !path.starts_with(part) {
                    return false;
                }
                pos = part.len();
                continue;
            }
            match path[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }

        !anchored || pattern.ends_with('*') || pos == path.len()
    }
}

type RulesCell = Arc<OnceCell<Option<Arc<RobotsRules>>>>;

/// Per-domain robots.txt cache shared by all submitters
pub struct PolitenessCache {
    fetcher: Arc<dyn Fetcher>,
    user_agent: String,
    timeout: Duration,
    /// Where raw robots.txt bodies are kept between runs
    cache_dir: Option<PathBuf>,
    entries: DashMap<String, RulesCell>,
    fetches: AtomicU64,
}

impl PolitenessCache {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        user_agent: impl Into<String>,
        timeout: Duration,
        cache_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            user_agent: user_agent.into(),
            timeout,
            cache_dir,
            entries: DashMap::new(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Whether `url` may be fetched. Resolves the domain's rules first if
    /// this is the first request for it.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let Some(domain) = domain_of(url) else {
            return false;
        };

        let cell: RulesCell = self.entries.entry(domain.clone()).or_default().clone();
        let rules = cell.get_or_init(|| self.load_rules(&domain, url)).await;

        match rules {
            Some(rules) => rules.allows_url(url),
            None => true,
        }
    }

    /// Number of robots.txt network fetches issued this run
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of domains whose rules have been requested
    pub fn domains_seen(&self) -> usize {
        self.entries.len()
    }

    async fn load_rules(&self, domain: &str, url: &Url) -> Option<Arc<RobotsRules>> {
        let text = match self.read_cached(domain).await {
            Some(text) => text,
            None => {
                let text = self.fetch_robots(url).await?;
                self.write_cached(domain, &text).await;
                text
            }
        };

        let rules = RobotsRules::parse(&text, &self.user_agent);
        if rules.is_empty() {
            None
        } else {
            debug!("Loaded robots.txt for {}", domain);
            Some(Arc::new(rules))
        }
    }

    async fn fetch_robots(&self, url: &Url) -> Option<String> {
        let robots_url = url.join("/robots.txt").ok()?;
        self.fetches.fetch_add(1, Ordering::Relaxed);

        match self.fetcher.fetch(&robots_url, self.timeout).await {
            Ok(response) => Some(response.body_text()),
            Err(e) => {
                debug!("No robots.txt at {} ({}), allowing all", robots_url, e);
                None
            }
        }
    }

    fn cache_path(&self, domain: &str) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        Some(dir.join(format!("{}.txt", domain.replace(':', "_"))))
    }

    async fn read_cached(&self, domain: &str) -> Option<String> {
        let path = self.cache_path(domain)?;
        tokio::fs::read_to_string(&path).await.ok()
    }

    async fn write_cached(&self, domain: &str, text: &str) {
        let Some(path) = self.cache_path(domain) else {
            return;
        };
        if let Err(e) = tokio::fs::write(&path, text).await {
            warn!("Failed to cache robots.txt at {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::fetcher::{FetchError, FetchResponse};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    const UA: &str = "simcrawl/0.1";

    struct RobotsFetcher {
        bodies: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl RobotsFetcher {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(u, b)| (u.to_string(), b.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for RobotsFetcher {
        async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            match self.bodies.get(url.as_str()) {
                Some(body) => Ok(FetchResponse::new(
                    url.clone(),
                    200,
                    vec![("content-type".to_string(), "text/plain".to_string())],
                    body.clone().into_bytes(),
                )),
                None => Err(FetchError::Status(404)),
            }
        }
    }

    #[test]
    fn test_specific_group_replaces_wildcard() {
        let content = r#"
User-agent: *
Disallow: /private/

User-agent: simcrawl
Disallow: /admin/
"#;
        let rules = RobotsRules::parse(content, UA);

        assert!(!rules.is_allowed("/admin/settings"));
        assert!(rules.is_allowed("/private/notes"));
        assert!(rules.is_allowed("/"));
    }

    #[test]
    fn test_wildcard_group_and_precedence() {
        let content = r#"
# comment
User-agent: otherbot
User-agent: *
Disallow: /private/
Disallow: /*.pdf$
Allow: /private/readme.txt
"#;
        let rules = RobotsRules::parse(content, UA);

        assert!(rules.is_allowed("/public/page.html"));
        assert!(!rules.is_allowed("/private/secret"));
        assert!(rules.is_allowed("/private/readme.txt"));
        assert!(!rules.is_allowed("/docs/manual.pdf"));
        assert!(rules.is_allowed("/docs/manual.pdf.html"));
    }

    #[test]
    fn test_empty_disallow_is_allow_all() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n", UA);
        assert!(rules.is_empty());
        assert!(rules.is_allowed("/anything"));
    }

    #[test]
    fn test_path_matching() {
        assert!(RobotsRules::path_matches("/admin/test", "/admin/"));
        assert!(!RobotsRules::path_matches("/public/test", "/admin/"));
        assert!(RobotsRules::path_matches("/images/cat.jpg", "/images/*.jpg"));
        assert!(!RobotsRules::path_matches("/static/images/cat.jpg", "/images/*.jpg"));
        assert!(RobotsRules::path_matches("/page.html", "/page.html$"));
        assert!(!RobotsRules::path_matches("/page.html?query", "/page.html$"));
    }

    #[test]
    fn test_query_is_matched() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /search?q=\n", UA);
        let url = Url::parse("https://example.com/search?q=rust").unwrap();
        assert!(!rules.allows_url(&url));
        let url = Url::parse("https://example.com/search").unwrap();
        assert!(rules.allows_url(&url));
    }

    #[tokio::test]
    async fn test_single_fetch_per_domain() {
        let fetcher = Arc::new(RobotsFetcher::new(&[(
            "https://example.com/robots.txt",
            "User-agent: *\nDisallow: /blocked\n",
        )]));
        let cache = Arc::new(PolitenessCache::new(
            fetcher.clone(),
            UA,
            Duration::from_secs(1),
            None,
        ));

        let mut handles = Vec::new();
        for i in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let url = Url::parse(&format!("https://example.com/page{}", i)).unwrap();
                cache.is_allowed(&url).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let blocked = Url::parse("https://example.com/blocked/x").unwrap();
        assert!(!cache.is_allowed(&blocked).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetch_count(), 1);
        assert_eq!(cache.domains_seen(), 1);
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let fetcher = Arc::new(RobotsFetcher::new(&[]));
        let cache = PolitenessCache::new(fetcher.clone(), UA, Duration::from_secs(1), None);

        let url = Url::parse("https://nowhere.test/anything").unwrap();
        assert!(cache.is_allowed(&url).await);
        assert!(cache.is_allowed(&url).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rules_cached_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = Arc::new(RobotsFetcher::new(&[(
            "http://localhost:8080/robots.txt",
            "User-agent: *\nDisallow: /nope\n",
        )]));
        let url = Url::parse("http://localhost:8080/nope/1").unwrap();

        let cache = PolitenessCache::new(
            fetcher.clone(),
            UA,
            Duration::from_secs(1),
            Some(dir.path().to_path_buf()),
        );
        assert!(!cache.is_allowed(&url).await);
        assert!(dir.path().join("localhost_8080.txt").exists());

        // A fresh cache reads the stored text instead of fetching
        let offline = Arc::new(RobotsFetcher::new(&[]));
        let cache = PolitenessCache::new(
            offline.clone(),
            UA,
            Duration::from_secs(1),
            Some(dir.path().to_path_buf()),
        );
        assert!(!cache.is_allowed(&url).await);
        assert_eq!(offline.calls.load(Ordering::SeqCst), 0);
    }
}
