//! Crawl workers
//!
//! Each worker loops: take a URL, run it through the pipeline, record the
//! outcome in the frontier. Nothing that goes wrong for a single URL leaves
//! this module; it becomes `UrlOutcome::Failed` and the URL is marked failed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};
use url::Url;

use super::extractor::{HtmlExtractor, LanguageHint};
use super::fetcher::Fetcher;
use super::fingerprint::{SharedFingerprintIndex, SimHash};
use super::frontier::{Frontier, SubmitOutcome};
use super::limiter::DomainLimiter;
use super::stats::CrawlStats;
use super::writer::DocumentWriter;
use super::normalize_url;
use crate::types::{domain_of, DocumentId, DocumentRecord};

/// What happened to one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    /// Written as a new document
    Accepted { id: DocumentId },
    /// Fetch or extraction error; retried after a restart
    Failed { reason: String },
    NotHtml,
    NonEnglish,
    NearDuplicate,
    /// Page declares a different canonical URL, which was submitted instead
    CanonicalAlias { canonical: Url },
    /// Page target already met; URL goes back to the queue
    LimitReached,
}

/// Soft page limit shared by all workers.
///
/// A worker reserves a slot before admitting a page and commits it once the
/// page is queued for writing, so no more than `target` documents are ever
/// accepted. While every slot is reserved but not yet committed, workers
/// park on `wait_for_slot` instead of fetching pages they could not keep.
#[derive(Debug)]
pub struct PageBudget {
    target: usize,
    reserved: AtomicUsize,
    committed: AtomicUsize,
    reached: AtomicBool,
    changed: Notify,
}

impl PageBudget {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            reserved: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            reached: AtomicBool::new(target == 0),
            changed: Notify::new(),
        }
    }

    pub fn try_reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.target).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn release(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }

    /// Commit a reserved slot. Returns true for the commit that hits the target.
    pub fn commit(&self) -> bool {
        let committed = self.committed.fetch_add(1, Ordering::AcqRel) + 1;
        let hit = committed >= self.target && !self.reached.swap(true, Ordering::AcqRel);
        self.changed.notify_waiters();
        hit
    }

    /// No slot is free right now, though some may still be released
    pub fn is_exhausted(&self) -> bool {
        self.reserved.load(Ordering::Acquire) >= self.target
    }

    /// Wait until a slot frees up or the target is reached
    pub async fn wait_for_slot(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_exhausted() || self.is_reached() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_reached(&self) -> bool {
        self.reached.load(Ordering::Acquire)
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    pub fn target(&self) -> usize {
        self.target
    }
}

/// Everything a worker needs, shared across the pool
pub struct WorkerContext {
    pub frontier: Arc<Frontier>,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<HtmlExtractor>,
    pub index: Arc<SharedFingerprintIndex>,
    pub limiter: Arc<DomainLimiter>,
    pub writer: DocumentWriter,
    pub stats: Arc<CrawlStats>,
    pub budget: Arc<PageBudget>,
    pub fetch_timeout: Duration,
}

impl WorkerContext {
    /// Fetch, classify, and (maybe) accept one in-flight URL
    pub async fn process(&self, url: &Url) -> UrlOutcome {
        let Some(domain) = domain_of(url) else {
            return UrlOutcome::Failed {
                reason: "URL has no host".to_string(),
            };
        };

        let response = {
            let _permit = self.limiter.acquire(&domain).await;
            match self.fetcher.fetch(url, self.fetch_timeout).await {
                Ok(response) => response,
                Err(e) => {
                    return UrlOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        if !response.is_html() {
            return UrlOutcome::NotHtml;
        }

        // Parsing and fingerprinting are CPU-bound; keep them off the runtime
        let extractor = Arc::clone(&self.extractor);
        let html = response.body_text();
        let base = response.final_url.clone();
        let extraction = tokio::task::spawn_blocking(move || {
            let page = extractor.extract(&html, &base);
            let fingerprint = SimHash::compute(&page.text);
            (page, fingerprint)
        })
        .await;

        let (page, fingerprint) = match extraction {
            Ok(result) => result,
            Err(e) => {
                return UrlOutcome::Failed {
                    reason: format!("Extraction task failed: {}", e),
                }
            }
        };

        if let Some(canonical) = page.canonical {
            if canonical != normalize_url(url) {
                self.submit(&canonical).await;
                // The alias gets no document, but its links are still followed
                for link in &page.links {
                    self.submit(link).await;
                }
                return UrlOutcome::CanonicalAlias { canonical };
            }
        }

        if page.language == LanguageHint::NonEnglish {
            return UrlOutcome::NonEnglish;
        }

        if !self.budget.try_reserve() {
            return UrlOutcome::LimitReached;
        }

        let id = DocumentId::from_url(url.as_str());
        if !self.index.try_admit(id.clone(), fingerprint) {
            self.budget.release();
            return UrlOutcome::NearDuplicate;
        }

        let record = DocumentRecord {
            id: id.clone(),
            url: url.to_string(),
            body: response.body,
        };
        if let Err(e) = self.writer.enqueue(record).await {
            self.budget.release();
            return UrlOutcome::Failed {
                reason: e.to_string(),
            };
        }

        // Submit while this URL is still in flight: an empty queue with
        // nothing in flight ends every worker's `take()`
        for link in &page.links {
            self.submit(link).await;
        }

        if self.budget.commit() {
            info!(
                "Reached target of {} pages, stopping new work",
                self.budget.target()
            );
            self.frontier.close();
        }

        UrlOutcome::Accepted { id }
    }

    async fn submit(&self, url: &Url) {
        match self.frontier.submit(url).await {
            SubmitOutcome::Queued => CrawlStats::incr(&self.stats.links_queued),
            SubmitOutcome::Disallowed => CrawlStats::incr(&self.stats.politeness_denials),
            SubmitOutcome::DomainCapped => CrawlStats::incr(&self.stats.domain_capped),
            SubmitOutcome::AlreadyKnown | SubmitOutcome::Invalid => {}
        }
    }

    /// Move the URL to its final state and bump the matching counter
    pub fn settle(&self, url: &Url, outcome: &UrlOutcome) {
        match outcome {
            UrlOutcome::Accepted { id } => {
                debug!("Accepted {} as {}", url, id);
                self.frontier.mark_visited(url);
            }
            UrlOutcome::Failed { reason } => {
                debug!("Failed {}: {}", url, reason);
                CrawlStats::incr(&self.stats.fetch_failures);
                self.frontier.mark_failed(url);
            }
            UrlOutcome::NotHtml => {
                CrawlStats::incr(&self.stats.not_html);
                self.frontier.mark_visited(url);
            }
            UrlOutcome::NonEnglish => {
                CrawlStats::incr(&self.stats.non_english);
                self.frontier.mark_visited(url);
            }
            UrlOutcome::NearDuplicate => {
                debug!("Near-duplicate content at {}", url);
                CrawlStats::incr(&self.stats.duplicates);
                self.frontier.mark_visited(url);
            }
            UrlOutcome::CanonicalAlias { canonical } => {
                debug!("{} is an alias of {}", url, canonical);
                CrawlStats::incr(&self.stats.canonical_aliases);
                self.frontier.mark_visited(url);
            }
            UrlOutcome::LimitReached => {
                CrawlStats::incr(&self.stats.released_at_limit);
                self.frontier.requeue(url);
            }
        }
    }
}

/// Worker loop. Returns how many URLs this worker processed.
pub async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) -> usize {
    let mut processed = 0usize;

    loop {
        if ctx.budget.is_reached() {
            break;
        }
        let Some(url) = ctx.frontier.take().await else {
            break;
        };
        if ctx.budget.is_reached() {
            ctx.frontier.requeue(&url);
            break;
        }
        if ctx.budget.is_exhausted() {
            // Every slot is held by a page still in progress
            ctx.frontier.requeue(&url);
            CrawlStats::incr(&ctx.stats.released_at_limit);
            ctx.budget.wait_for_slot().await;
            continue;
        }

        let outcome = ctx.process(&url).await;
        ctx.settle(&url, &outcome);
        processed += 1;
    }

    debug!("Worker {} exiting after {} URLs", worker_id, processed);
    processed
}
