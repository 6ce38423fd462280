//! Crawl counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by workers and the document writer
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub pages_written: AtomicU64,
    pub write_errors: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub not_html: AtomicU64,
    pub non_english: AtomicU64,
    pub duplicates: AtomicU64,
    pub canonical_aliases: AtomicU64,
    pub politeness_denials: AtomicU64,
    pub domain_capped: AtomicU64,
    /// Accepted pages handed back to the queue because the target was hit
    pub released_at_limit: AtomicU64,
    pub links_queued: AtomicU64,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            pages_written: get(&self.pages_written),
            write_errors: get(&self.write_errors),
            fetch_failures: get(&self.fetch_failures),
            not_html: get(&self.not_html),
            non_english: get(&self.non_english),
            duplicates: get(&self.duplicates),
            canonical_aliases: get(&self.canonical_aliases),
            politeness_denials: get(&self.politeness_denials),
            domain_capped: get(&self.domain_capped),
            released_at_limit: get(&self.released_at_limit),
            links_queued: get(&self.links_queued),
        }
    }
}

/// Point-in-time copy of `CrawlStats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub pages_written: u64,
    pub write_errors: u64,
    pub fetch_failures: u64,
    pub not_html: u64,
    pub non_english: u64,
    pub duplicates: u64,
    pub canonical_aliases: u64,
    pub politeness_denials: u64,
    pub domain_capped: u64,
    pub released_at_limit: u64,
    pub links_queued: u64,
}
