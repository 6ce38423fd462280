//! Document writer
//!
//! A single task owns the pages directory and the id → URL map. Workers hand
//! it accepted pages through a bounded channel; a `Shutdown` message queued
//! behind them lets the task drain everything and exit.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::stats::CrawlStats;
use crate::types::{DocumentRecord, UrlMapEntry};
use crate::util::write_atomic;

/// Items consumed by the writer task
#[derive(Debug)]
pub enum WriterMessage {
    Page(DocumentRecord),
    Shutdown,
}

/// Cloneable sending side, shared by workers
#[derive(Clone)]
pub struct DocumentWriter {
    tx: mpsc::Sender<WriterMessage>,
}

/// Owning handle used once at shutdown
pub struct WriterTask {
    tx: mpsc::Sender<WriterMessage>,
    handle: JoinHandle<u64>,
}

impl DocumentWriter {
    /// Spawn the writer task
    pub fn start(
        pages_dir: PathBuf,
        url_map_path: PathBuf,
        capacity: usize,
        stats: Arc<CrawlStats>,
    ) -> (DocumentWriter, WriterTask) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = WriterWorker {
            pages_dir,
            url_map_path,
            rx,
            stats,
        };
        let handle = tokio::spawn(worker.run());

        (DocumentWriter { tx: tx.clone() }, WriterTask { tx, handle })
    }

    /// Queue a page. Waits only when the queue is full.
    pub async fn enqueue(&self, record: DocumentRecord) -> Result<()> {
        self.tx
            .send(WriterMessage::Page(record))
            .await
            .map_err(|_| anyhow::anyhow!("Document writer closed"))
    }
}

impl WriterTask {
    /// Send the sentinel, wait for every queued page to be written, and
    /// return how many pages this task wrote.
    pub async fn shutdown(self) -> Result<u64> {
        // The task may already be gone if it failed to open the url map
        let _ = self.tx.send(WriterMessage::Shutdown).await;
        drop(self.tx);
        self.handle.await.context("Document writer task panicked")
    }
}

struct WriterWorker {
    pages_dir: PathBuf,
    url_map_path: PathBuf,
    rx: mpsc::Receiver<WriterMessage>,
    stats: Arc<CrawlStats>,
}

impl WriterWorker {
    async fn run(mut self) -> u64 {
        let mut url_map = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.url_map_path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                error!(
                    "Cannot open url map {}: {}",
                    self.url_map_path.display(),
                    e
                );
                return 0;
            }
        };

        info!("Document writer started ({})", self.pages_dir.display());
        let mut written = 0u64;

        while let Some(message) = self.rx.recv().await {
            match message {
                WriterMessage::Page(record) => {
                    match self.write_page(&mut url_map, &record).await {
                        Ok(()) => {
                            written += 1;
                            CrawlStats::incr(&self.stats.pages_written);
                            debug!("Wrote {} -> {}", record.url, record.id);
                        }
                        Err(e) => {
                            CrawlStats::incr(&self.stats.write_errors);
                            error!("Failed to write {}: {:#}", record.url, e);
                        }
                    }
                }
                WriterMessage::Shutdown => break,
            }
        }

        info!("Document writer stopped after {} pages", written);
        written
    }

    async fn write_page(&self, url_map: &mut tokio::fs::File, record: &DocumentRecord) -> Result<()> {
        let path = self.pages_dir.join(record.id.page_file_name());
        tokio::fs::write(&path, &record.body)
            .await
            .with_context(|| format!("Failed to write page {}", path.display()))?;

        let entry = UrlMapEntry {
            id: record.id.clone(),
            url: record.url.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        url_map
            .write_all(&line)
            .await
            .context("Failed to append to url map")?;
        url_map.flush().await.context("Failed to flush url map")?;
        Ok(())
    }
}

/// Read the id → URL map. Later lines win when an id repeats; malformed
/// lines are skipped.
pub fn read_url_map(path: &Path) -> Result<Vec<UrlMapEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read url map {}", path.display()))?;

    let mut entries: Vec<UrlMapEntry> = Vec::new();
    let mut skipped = 0usize;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<UrlMapEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!("Skipped {} malformed lines in {}", skipped, path.display());
    }

    let mut seen = HashSet::new();
    let mut unique: Vec<UrlMapEntry> = entries
        .into_iter()
        .rev()
        .filter(|e| seen.insert(e.id.clone()))
        .collect();
    unique.reverse();
    Ok(unique)
}

/// Replace the url map with `entries`
pub fn rewrite_url_map(path: &Path, entries: &[UrlMapEntry]) -> Result<()> {
    let mut buf = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut buf, entry)?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf)
}
