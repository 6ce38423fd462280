//! URL frontier
//!
//! Owns the lifecycle of every URL seen during a run:
//! `queued → in-flight → {visited | failed}`. A URL is in at most one of
//! those sets at any time. All transitions happen under one lock that is
//! never held across an `.await`; the only suspension inside `submit` is
//! the robots.txt lookup, after which the URL is re-checked.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};
use url::Url;

use super::checkpoint::FrontierSnapshot;
use super::politeness::PolitenessCache;
use super::{normalize_url, parse_crawlable};
use crate::config::CrawlConfig;
use crate::types::domain_of;

/// Tuning for the frontier's fairness heuristics
#[derive(Debug, Clone)]
pub struct FrontierSettings {
    /// Soft cap on outstanding (queued + in-flight) URLs per domain
    pub per_domain_cap: usize,
    /// Chance that a submission past the cap is admitted anyway
    pub cap_overflow_admit_probability: f64,
    /// Chance that `take()` reshuffles the whole queue first
    pub reshuffle_probability: f64,
    /// How long an idle `take()` waits before probing again
    pub idle_probe: Duration,
    pub rng_seed: Option<u64>,
}

impl FrontierSettings {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            per_domain_cap: config.per_domain_cap,
            cap_overflow_admit_probability: config.cap_overflow_admit_probability,
            reshuffle_probability: config.reshuffle_probability,
            idle_probe: config.idle_probe(),
            rng_seed: config.rng_seed,
        }
    }
}

impl Default for FrontierSettings {
    fn default() -> Self {
        Self::from_config(&CrawlConfig::default())
    }
}

/// Result of `Frontier::submit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Already queued, in flight, visited, or failed
    AlreadyKnown,
    /// Domain is at its cap and the overflow roll failed
    DomainCapped,
    /// robots.txt forbids it; the URL is forgotten
    Disallowed,
    /// Not an http(s) URL with a host
    Invalid,
}

/// Lifecycle state of a known URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlState {
    Queued,
    InFlight,
    Visited,
    Failed,
}

/// Sizes of the four state sets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub queued: usize,
    pub in_flight: usize,
    pub visited: usize,
    pub failed: usize,
}

struct FrontierState {
    queue: VecDeque<Url>,
    queued: HashSet<Url>,
    in_flight: HashSet<Url>,
    visited: HashSet<Url>,
    failed: HashSet<Url>,
    /// Queued + in-flight URLs per domain
    outstanding: HashMap<String, usize>,
    /// Submissions suspended on a robots.txt lookup
    pending_submits: usize,
    closed: bool,
    rng: StdRng,
}

impl FrontierState {
    fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            visited: HashSet::new(),
            failed: HashSet::new(),
            outstanding: HashMap::new(),
            pending_submits: 0,
            closed: false,
            rng,
        }
    }

    fn state_of(&self, url: &Url) -> Option<UrlState> {
        if self.queued.contains(url) {
            Some(UrlState::Queued)
        } else if self.in_flight.contains(url) {
            Some(UrlState::InFlight)
        } else if self.visited.contains(url) {
            Some(UrlState::Visited)
        } else if self.failed.contains(url) {
            Some(UrlState::Failed)
        } else {
            None
        }
    }

    fn is_known(&self, url: &Url) -> bool {
        self.state_of(url).is_some()
    }

    fn has_pending(&self) -> bool {
        !self.queue.is_empty() || !self.in_flight.is_empty() || self.pending_submits > 0
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen::<f64>() < probability
    }

    /// Whether one more URL may be admitted for `domain`
    fn admit_domain(&mut self, domain: &str, settings: &FrontierSettings) -> bool {
        let outstanding = self.outstanding.get(domain).copied().unwrap_or(0);
        outstanding < settings.per_domain_cap || self.roll(settings.cap_overflow_admit_probability)
    }

    fn enqueue(&mut self, url: Url, domain: String) {
        *self.outstanding.entry(domain).or_insert(0) += 1;
        self.queued.insert(url.clone());
        self.queue.push_back(url);
    }

    fn release_domain(&mut self, url: &Url) {
        let Some(domain) = domain_of(url) else {
            return;
        };
        if let Some(count) = self.outstanding.get_mut(&domain) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.outstanding.remove(&domain);
            }
        }
    }

    fn pop(&mut self, reshuffle_probability: f64) -> Option<Url> {
        if self.queue.is_empty() {
            return None;
        }
        if self.queue.len() > 1 && self.roll(reshuffle_probability) {
            let mut drained: Vec<Url> = self.queue.drain(..).collect();
            drained.shuffle(&mut self.rng);
            self.queue = drained.into();
            trace!("Reshuffled frontier queue");
        }

        let url = self.queue.pop_front()?;
        self.queued.remove(&url);
        self.in_flight.insert(url.clone());
        Some(url)
    }

    fn counts(&self) -> FrontierCounts {
        FrontierCounts {
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            visited: self.visited.len(),
            failed: self.failed.len(),
        }
    }
}

/// Decrements `pending_submits` even if the submitting future is dropped
/// while waiting on robots.txt.
struct PendingSubmit<'a> {
    frontier: &'a Frontier,
}

impl Drop for PendingSubmit<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.frontier.state.lock();
            state.pending_submits = state.pending_submits.saturating_sub(1);
        }
        self.frontier.notify.notify_waiters();
    }
}

/// Shared, concurrency-safe URL frontier
pub struct Frontier {
    settings: FrontierSettings,
    politeness: Option<Arc<PolitenessCache>>,
    state: Mutex<FrontierState>,
    notify: Notify,
}

impl Frontier {
    pub fn new(settings: FrontierSettings, politeness: Option<Arc<PolitenessCache>>) -> Self {
        let state = FrontierState::new(settings.rng_seed);
        Self {
            settings,
            politeness,
            state: Mutex::new(state),
            notify: Notify::new(),
        }
    }

    /// Normalize and queue a URL. Known URLs are a no-op; URLs denied by
    /// robots.txt are dropped without being recorded.
    pub async fn submit(&self, url: &Url) -> SubmitOutcome {
        let url = normalize_url(url);
        let domain = match (url.scheme(), domain_of(&url)) {
            ("http" | "https", Some(domain)) => domain,
            _ => return SubmitOutcome::Invalid,
        };

        let pending = {
            let mut state = self.state.lock();
            if state.is_known(&url) {
                return SubmitOutcome::AlreadyKnown;
            }
            if !state.admit_domain(&domain, &self.settings) {
                return SubmitOutcome::DomainCapped;
            }
            if self.politeness.is_none() {
                state.enqueue(url, domain);
                drop(state);
                self.notify.notify_waiters();
                return SubmitOutcome::Queued;
            }
            state.pending_submits += 1;
            PendingSubmit { frontier: self }
        };

        let allowed = match &self.politeness {
            Some(politeness) => politeness.is_allowed(&url).await,
            None => true,
        };

        let outcome = {
            let mut state = self.state.lock();
            if !allowed {
                SubmitOutcome::Disallowed
            } else if state.is_known(&url) {
                SubmitOutcome::AlreadyKnown
            } else if !state.admit_domain(&domain, &self.settings) {
                // Other submits for this domain may have landed during the robots.txt wait
                SubmitOutcome::DomainCapped
            } else {
                state.enqueue(url, domain);
                SubmitOutcome::Queued
            }
        };
        drop(pending);
        outcome
    }

    /// Wait for the next URL and move it to in-flight.
    ///
    /// Returns `None` once the frontier is closed, or when nothing is
    /// queued, in flight, or being submitted.
    pub async fn take(&self) -> Option<Url> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(url) = state.pop(self.settings.reshuffle_probability) {
                    return Some(url);
                }
                if !state.has_pending() {
                    return None;
                }
            }

            // Re-probe periodically even without a wakeup
            let _ = tokio::time::timeout(self.settings.idle_probe, notified).await;
        }
    }

    /// In-flight → visited. Returns false if the URL was not in flight.
    pub fn mark_visited(&self, url: &Url) -> bool {
        self.finish(url, UrlState::Visited)
    }

    /// In-flight → failed. Failed URLs are only retried after a restart.
    pub fn mark_failed(&self, url: &Url) -> bool {
        self.finish(url, UrlState::Failed)
    }

    fn finish(&self, url: &Url, target: UrlState) -> bool {
        let moved = {
            let mut state = self.state.lock();
            if state.in_flight.remove(url) {
                state.release_domain(url);
                match target {
                    UrlState::Failed => state.failed.insert(url.clone()),
                    _ => state.visited.insert(url.clone()),
                };
                true
            } else {
                false
            }
        };

        if moved {
            self.notify.notify_waiters();
        } else {
            trace!("{} not in flight, ignoring {:?}", url, target);
        }
        moved
    }

    /// In-flight → queued, for work taken but not performed.
    pub fn requeue(&self, url: &Url) -> bool {
        let moved = {
            let mut state = self.state.lock();
            if state.in_flight.remove(url) {
                state.queued.insert(url.clone());
                state.queue.push_back(url.clone());
                true
            } else {
                false
            }
        };
        if moved {
            self.notify.notify_waiters();
        }
        moved
    }

    /// Stop handing out work. Queued URLs stay queued for the checkpoint.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// True while anything is queued, in flight, or mid-submit
    pub fn has_pending(&self) -> bool {
        self.state.lock().has_pending()
    }

    pub fn counts(&self) -> FrontierCounts {
        self.state.lock().counts()
    }

    /// State of a URL (normalized first)
    pub fn state_of(&self, url: &Url) -> Option<UrlState> {
        self.state.lock().state_of(&normalize_url(url))
    }

    /// Copy out the four state sets
    pub fn snapshot(&self) -> FrontierSnapshot {
        let state = self.state.lock();
        let sorted = |set: &HashSet<Url>| {
            let mut urls: Vec<String> = set.iter().map(|u| u.to_string()).collect();
            urls.sort_unstable();
            urls
        };

        FrontierSnapshot {
            queued: state.queue.iter().map(|u| u.to_string()).collect(),
            in_flight: sorted(&state.in_flight),
            visited: sorted(&state.visited),
            failed: sorted(&state.failed),
        }
    }

    /// Replace all state with a snapshot from a previous run.
    ///
    /// URLs that were queued or in flight are queued again. Failed URLs are
    /// queued once when `retry_failed` is set and folded into visited
    /// otherwise. Each URL ends up in exactly one set.
    pub fn restore(&self, snapshot: FrontierSnapshot, retry_failed: bool) -> FrontierCounts {
        let mut fresh = FrontierState::new(self.settings.rng_seed);
        let mut skipped = 0usize;

        for raw in &snapshot.visited {
            match parse_crawlable(raw) {
                Some(url) => {
                    fresh.visited.insert(url);
                }
                None => skipped += 1,
            }
        }

        let (retry, settle): (Vec<&String>, Vec<&String>) = if retry_failed {
            (snapshot.failed.iter().collect(), Vec::new())
        } else {
            (Vec::new(), snapshot.failed.iter().collect())
        };

        for raw in settle {
            match parse_crawlable(raw) {
                Some(url) => {
                    fresh.visited.insert(url);
                }
                None => skipped += 1,
            }
        }

        let requeue = snapshot
            .queued
            .iter()
            .chain(snapshot.in_flight.iter())
            .chain(retry);
        for raw in requeue {
            let Some(url) = parse_crawlable(raw) else {
                skipped += 1;
                continue;
            };
            if fresh.is_known(&url) {
                continue;
            }
            if let Some(domain) = domain_of(&url) {
                fresh.enqueue(url, domain);
            }
        }

        if skipped > 0 {
            warn!("Skipped {} unparseable URLs in checkpoint", skipped);
        }

        let counts = fresh.counts();
        *self.state.lock() = fresh;
        self.notify.notify_waiters();
        debug!(
            "Frontier restored: {} queued, {} visited",
            counts.queued, counts.visited
        );
        counts
    }
}
