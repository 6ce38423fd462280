//! Crawl, politeness, and deduplication configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::DEFAULT_USER_AGENT;

/// Worker pool and frontier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Soft limit on accepted pages for a run
    pub target_pages: usize,
    /// Number of concurrent crawl workers
    pub workers: usize,
    /// Timeout for a single page fetch (seconds)
    pub fetch_timeout_secs: u64,
    /// Bodies larger than this are treated as fetch failures
    pub max_body_bytes: usize,
    /// User agent for page and robots.txt requests
    pub user_agent: String,
    /// Soft cap on outstanding (queued + in-flight) URLs per domain
    pub per_domain_cap: usize,
    /// Probability that a submission past the domain cap is admitted anyway
    pub cap_overflow_admit_probability: f64,
    /// Probability that `take()` reshuffles the whole queue first
    pub reshuffle_probability: f64,
    /// Concurrent fetches allowed against one domain
    pub per_domain_connections: usize,
    /// How long an idle worker waits before probing the frontier again (ms)
    pub idle_probe_ms: u64,
    /// Re-queue URLs that failed in the previous run (once); otherwise they
    /// are folded into the visited set on restore
    pub retry_failed_on_restore: bool,
    /// Fixed RNG seed for the fairness heuristics (random if unset)
    pub rng_seed: Option<u64>,
}

impl CrawlConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn idle_probe(&self) -> Duration {
        Duration::from_millis(self.idle_probe_ms)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            target_pages: 100,
            workers: 5,
            fetch_timeout_secs: 10,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            per_domain_cap: 1000,
            cap_overflow_admit_probability: 0.01,
            reshuffle_probability: 0.001,
            per_domain_connections: 4,
            idle_probe_ms: 1000,
            retry_failed_on_restore: true,
            rng_seed: None,
        }
    }
}

/// robots.txt handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    /// Consult robots.txt before queueing URLs
    pub enabled: bool,
    /// Keep fetched robots.txt bodies under `<data_dir>/robots`
    pub cache_rules_on_disk: bool,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_rules_on_disk: true,
        }
    }
}

/// Near-duplicate detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum SimHash Hamming distance treated as a near-duplicate
    pub max_hamming_distance: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_hamming_distance: 3,
        }
    }
}
