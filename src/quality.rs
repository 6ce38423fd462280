//! Post-crawl quality filter
//!
//! Re-reads every written page and flags the ones that either declare no
//! English language metadata or carry too little visible text. Flagged pages
//! are listed for review, or removed along with their url map entries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::crawl::extractor::{HtmlExtractor, LanguageHint};
use crate::crawl::writer::{read_url_map, rewrite_url_map};
use crate::types::UrlMapEntry;
use crate::util::{truncate_for_display, write_atomic};

/// Candidate list written when pages are not deleted
pub const CANDIDATES_FILE: &str = "to_delete.txt";

/// Default minimum number of visible words
pub const DEFAULT_MIN_WORDS: usize = 200;

/// Why a page was flagged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Language metadata is absent or not English
    NotEnglish(LanguageHint),
    TooShort { words: usize },
    /// Listed in the url map but the page file is gone
    Missing,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotEnglish(LanguageHint::Unknown) => write!(f, "no language metadata"),
            RejectReason::NotEnglish(_) => write!(f, "not english"),
            RejectReason::TooShort { words } => write!(f, "too short ({} words)", words),
            RejectReason::Missing => write!(f, "page file missing"),
        }
    }
}

/// A flagged page
#[derive(Debug, Clone)]
pub struct Rejection {
    pub entry: UrlMapEntry,
    pub reason: RejectReason,
}

/// Outcome of a scan
#[derive(Debug, Default)]
pub struct FilterReport {
    pub examined: usize,
    pub kept: Vec<UrlMapEntry>,
    pub rejected: Vec<Rejection>,
}

/// Scans a crawl's pages directory
pub struct QualityFilter {
    pages_dir: PathBuf,
    url_map_path: PathBuf,
    min_words: usize,
    parallelism: usize,
    show_progress: bool,
}

impl QualityFilter {
    pub fn new(pages_dir: PathBuf, url_map_path: PathBuf, min_words: usize) -> Self {
        Self {
            pages_dir,
            url_map_path,
            min_words,
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            show_progress: true,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Classify one page body
    pub fn check(extractor: &HtmlExtractor, html: &str, min_words: usize) -> Option<RejectReason> {
        let (language, text) = extractor.language_and_text(html);
        if !language.is_english() {
            return Some(RejectReason::NotEnglish(language));
        }
        let words = text.split_whitespace().count();
        if words < min_words {
            return Some(RejectReason::TooShort { words });
        }
        None
    }

    /// Examine every page in the url map. Nothing is modified.
    pub async fn scan(&self) -> Result<FilterReport> {
        let entries = read_url_map(&self.url_map_path)?;
        info!(
            "Checking {} pages (min_words={}, parallelism={})",
            entries.len(),
            self.min_words,
            self.parallelism
        );

        let progress = if self.show_progress {
            let pb = ProgressBar::new(entries.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let extractor = Arc::new(HtmlExtractor::new());
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(entries.len());

        for entry in entries {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Quality filter semaphore closed")?;
            let extractor = Arc::clone(&extractor);
            let path = self.pages_dir.join(entry.id.page_file_name());
            let min_words = self.min_words;

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let verdict = match std::fs::read(&path) {
                    Ok(bytes) => {
                        let html = String::from_utf8_lossy(&bytes);
                        Self::check(&extractor, &html, min_words)
                    }
                    Err(e) => {
                        debug!("Cannot read {}: {}", path.display(), e);
                        Some(RejectReason::Missing)
                    }
                };
                (entry, verdict)
            }));
        }

        let mut report = FilterReport::default();
        for handle in handles {
            let (entry, verdict) = handle.await.context("Quality check task panicked")?;
            report.examined += 1;
            if let Some(pb) = &progress {
                pb.inc(1);
                pb.set_message(truncate_for_display(&entry.url, 40));
            }
            match verdict {
                Some(reason) => report.rejected.push(Rejection { entry, reason }),
                None => report.kept.push(entry),
            }
        }

        if let Some(pb) = progress {
            pb.finish_with_message("done");
        }
        info!(
            "Quality scan: {} examined, {} kept, {} flagged",
            report.examined,
            report.kept.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Write the flagged pages as `<id>\t<reason>\t<url>` lines
    pub fn write_candidates(&self, report: &FilterReport, path: &Path) -> Result<()> {
        let mut out = String::new();
        for rejection in &report.rejected {
            out.push_str(&format!(
                "{}\t{}\t{}\n",
                rejection.entry.id, rejection.reason, rejection.entry.url
            ));
        }
        write_atomic(path, out.as_bytes())
    }

    /// Remove flagged page files and rewrite the url map with the kept
    /// entries. Returns how many page files were deleted.
    pub fn apply(&self, report: &FilterReport) -> Result<usize> {
        let mut deleted = 0;
        for rejection in &report.rejected {
            let path = self.pages_dir.join(rejection.entry.id.page_file_name());
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
            }
        }
        rewrite_url_map(&self.url_map_path, &report.kept)
            .with_context(|| format!("Failed to rewrite {}", self.url_map_path.display()))?;
        info!("Deleted {} pages", deleted);
        Ok(deleted)
    }
}
