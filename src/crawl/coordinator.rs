//! Crawl coordinator
//!
//! Restores state, runs the worker pool until the page target is met or the
//! frontier drains, then shuts down in a fixed order: join workers, drain
//! the document writer, stop periodic checkpoints, write the final
//! checkpoint.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};
use url::Url;

use super::checkpoint::{CheckpointStore, Checkpointer};
use super::extractor::HtmlExtractor;
use super::fetcher::Fetcher;
use super::fingerprint::{FingerprintIndex, SharedFingerprintIndex};
use super::frontier::{Frontier, FrontierCounts, FrontierSettings, SubmitOutcome};
use super::limiter::DomainLimiter;
use super::politeness::PolitenessCache;
use super::stats::{CrawlStats, StatsSnapshot};
use super::worker::{run_worker, PageBudget, WorkerContext};
use super::writer::DocumentWriter;
use crate::config::Config;

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub target_pages: usize,
    pub pages_written: u64,
    pub limit_reached: bool,
    pub urls_processed: usize,
    pub frontier: FrontierCounts,
    pub fingerprints: usize,
    pub robots_fetches: u64,
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.limit_reached {
            "target reached"
        } else {
            "frontier exhausted"
        };
        writeln!(
            f,
            "Crawl finished ({}) in {:.1}s",
            status,
            self.elapsed.as_secs_f64()
        )?;
        writeln!(f, "  Pages written:      {} / {}", self.pages_written, self.target_pages)?;
        writeln!(f, "  URLs processed:     {}", self.urls_processed)?;
        writeln!(f, "  Fetch failures:     {}", self.stats.fetch_failures)?;
        writeln!(f, "  Not HTML:           {}", self.stats.not_html)?;
        writeln!(f, "  Non-English:        {}", self.stats.non_english)?;
        writeln!(f, "  Near-duplicates:    {}", self.stats.duplicates)?;
        writeln!(f, "  Canonical aliases:  {}", self.stats.canonical_aliases)?;
        writeln!(f, "  robots.txt denials: {}", self.stats.politeness_denials)?;
        writeln!(f, "  Domain cap drops:   {}", self.stats.domain_capped)?;
        writeln!(f, "  Released at limit:  {}", self.stats.released_at_limit)?;
        writeln!(f, "  robots.txt fetches: {}", self.robots_fetches)?;
        write!(
            f,
            "  Frontier:           {} queued, {} visited, {} failed, {} fingerprints",
            self.frontier.queued + self.frontier.in_flight,
            self.frontier.visited,
            self.frontier.failed,
            self.fingerprints
        )
    }
}

/// Owns every crawl component for the lifetime of one run
pub struct Crawler {
    config: Config,
    store: Arc<CheckpointStore>,
    fetcher: Arc<dyn Fetcher>,
    politeness: Option<Arc<PolitenessCache>>,
    frontier: Arc<Frontier>,
    index: Arc<SharedFingerprintIndex>,
    stats: Arc<CrawlStats>,
}

impl Crawler {
    /// Create data directories and restore any previous checkpoint.
    /// Unreadable checkpoints are fatal.
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let storage = &config.storage;
        std::fs::create_dir_all(storage.pages_dir()).with_context(|| {
            format!("Failed to create pages directory {}", storage.pages_dir().display())
        })?;

        let politeness = if config.politeness.enabled {
            let cache_dir = if config.politeness.cache_rules_on_disk {
                let dir = storage.robots_dir();
                std::fs::create_dir_all(&dir).with_context(|| {
                    format!("Failed to create robots directory {}", dir.display())
                })?;
                Some(dir)
            } else {
                None
            };
            Some(Arc::new(PolitenessCache::new(
                Arc::clone(&fetcher),
                config.crawl.user_agent.clone(),
                config.crawl.fetch_timeout(),
                cache_dir,
            )))
        } else {
            None
        };

        let store = Arc::new(CheckpointStore::new(storage.data_dir()));
        let snapshot = store.load_frontier()?;
        let fingerprints = store.load_fingerprints()?;

        let index = FingerprintIndex::from_entries(config.dedup.max_hamming_distance, fingerprints);
        let frontier = Frontier::new(
            FrontierSettings::from_config(&config.crawl),
            politeness.clone(),
        );

        if !snapshot.is_empty() {
            let counts = frontier.restore(snapshot, config.crawl.retry_failed_on_restore);
            info!(
                "Restored checkpoint: {} queued, {} visited, {} fingerprints",
                counts.queued,
                counts.visited,
                index.len()
            );
        }

        Ok(Self {
            config,
            store,
            fetcher,
            politeness,
            frontier: Arc::new(frontier),
            index: Arc::new(SharedFingerprintIndex::new(index)),
            stats: Arc::new(CrawlStats::new()),
        })
    }

    /// Submit seed URLs. Already-known seeds are no-ops.
    pub async fn add_seeds(&self, seeds: &[Url]) -> usize {
        let mut queued = 0;
        for seed in seeds {
            match self.frontier.submit(seed).await {
                SubmitOutcome::Queued => queued += 1,
                SubmitOutcome::Disallowed => {
                    CrawlStats::incr(&self.stats.politeness_denials);
                    warn!("Seed {} is disallowed by robots.txt", seed);
                }
                SubmitOutcome::Invalid => warn!("Ignoring seed {}: not an http(s) URL", seed),
                SubmitOutcome::AlreadyKnown | SubmitOutcome::DomainCapped => {}
            }
        }
        queued
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn index(&self) -> &Arc<SharedFingerprintIndex> {
        &self.index
    }

    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.stats
    }

    /// Ask workers to stop after their current URL
    pub fn stop(&self) {
        info!("Stop requested, finishing in-flight pages");
        self.frontier.close();
    }

    /// Run until the page target is reached or no work remains
    pub async fn run(&self) -> Result<CrawlReport> {
        let start = Instant::now();
        let crawl = &self.config.crawl;
        let storage = &self.config.storage;

        info!(
            "Starting crawl (target={}, workers={}, politeness={})",
            crawl.target_pages,
            crawl.workers,
            self.politeness.is_some()
        );

        let (writer, writer_task) = DocumentWriter::start(
            storage.pages_dir(),
            storage.url_map_path(),
            storage.writer_queue_capacity,
            Arc::clone(&self.stats),
        );
        let checkpointer = Checkpointer::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.frontier),
            Arc::clone(&self.index),
            Arc::clone(&self.stats),
            storage.checkpoint_interval(),
        );

        let budget = Arc::new(PageBudget::new(crawl.target_pages));
        let ctx = Arc::new(WorkerContext {
            frontier: Arc::clone(&self.frontier),
            fetcher: Arc::clone(&self.fetcher),
            extractor: Arc::new(HtmlExtractor::new()),
            index: Arc::clone(&self.index),
            limiter: Arc::new(DomainLimiter::new(crawl.per_domain_connections)),
            writer,
            stats: Arc::clone(&self.stats),
            budget: Arc::clone(&budget),
            fetch_timeout: crawl.fetch_timeout(),
        });

        let handles: Vec<_> = (0..crawl.workers)
            .map(|worker_id| tokio::spawn(run_worker(worker_id, Arc::clone(&ctx))))
            .collect();

        let mut urls_processed = 0;
        for handle in handles {
            match handle.await {
                Ok(processed) => urls_processed += processed,
                Err(e) => warn!("Worker task failed: {}", e),
            }
        }
        drop(ctx);

        if let Err(e) = writer_task.shutdown().await {
            warn!("Document writer did not shut down cleanly: {:#}", e);
        }
        checkpointer.stop().await;

        let (store, frontier, index) = (
            Arc::clone(&self.store),
            Arc::clone(&self.frontier),
            Arc::clone(&self.index),
        );
        tokio::task::spawn_blocking(move || store.save(&frontier, &index))
            .await
            .context("Final checkpoint task panicked")?
            .context("Final checkpoint failed")?;

        let stats = self.stats.snapshot();
        let report = CrawlReport {
            target_pages: crawl.target_pages,
            pages_written: stats.pages_written,
            limit_reached: budget.is_reached(),
            urls_processed,
            frontier: self.frontier.counts(),
            fingerprints: self.index.len(),
            robots_fetches: self
                .politeness
                .as_ref()
                .map(|p| p.fetch_count())
                .unwrap_or(0),
            stats,
            elapsed: start.elapsed(),
        };

        info!(
            "Crawl complete: {} pages written, {} URLs processed",
            report.pages_written, report.urls_processed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FRONTIER_FILE, FINGERPRINT_FILE};
    use crate::crawl::fetcher::{FetchError, FetchResponse};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Unreachable;

    #[async_trait]
    impl Fetcher for Unreachable {
        async fn fetch(&self, _url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError> {
            Err(FetchError::Timeout(timeout))
        }
    }

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.crawl.idle_probe_ms = 20;
        config.crawl.workers = 2;
        config.politeness.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_new_creates_layout() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.politeness.enabled = true;

        Crawler::new(cfg, Arc::new(Unreachable)).unwrap();
        assert!(dir.path().join("pages").is_dir());
        assert!(dir.path().join("robots").is_dir());
    }

    #[tokio::test]
    async fn test_malformed_checkpoint_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(FINGERPRINT_FILE), b"[oops").unwrap();

        assert!(Crawler::new(config(&dir), Arc::new(Unreachable)).is_err());
    }

    #[tokio::test]
    async fn test_all_failures_end_cleanly_with_checkpoint() {
        let dir = TempDir::new().unwrap();
        let crawler = Crawler::new(config(&dir), Arc::new(Unreachable)).unwrap();
        let seeds = vec![
            Url::parse("https://a.com/").unwrap(),
            Url::parse("https://b.com/").unwrap(),
            Url::parse("mailto:x@y.z").unwrap(),
        ];
        assert_eq!(crawler.add_seeds(&seeds).await, 2);

        let report = crawler.run().await.unwrap();
        assert_eq!(report.pages_written, 0);
        assert!(!report.limit_reached);
        assert_eq!(report.frontier.failed, 2);
        assert_eq!(report.stats.fetch_failures, 2);
        assert!(dir.path().join(FRONTIER_FILE).exists());
        assert!(report.to_string().contains("frontier exhausted"));
    }

    #[tokio::test]
    async fn test_stop_before_run_leaves_queue_intact() {
        let dir = TempDir::new().unwrap();
        let crawler = Crawler::new(config(&dir), Arc::new(Unreachable)).unwrap();
        crawler.add_seeds(&[Url::parse("https://a.com/").unwrap()]).await;
        crawler.stop();

        let report = crawler.run().await.unwrap();
        assert_eq!(report.urls_processed, 0);
        assert_eq!(report.frontier.queued, 1);
    }
}
