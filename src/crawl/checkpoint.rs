//! Checkpointing
//!
//! Frontier sets and fingerprints are written periodically and once more at
//! shutdown. Every file is replaced atomically, so a crash mid-write leaves
//! the previous checkpoint intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::fingerprint::SharedFingerprintIndex;
use super::frontier::Frontier;
use super::stats::CrawlStats;
use crate::config::{FAILED_FILE, FINGERPRINT_FILE, FRONTIER_FILE};
use crate::types::DocumentId;
use crate::util::write_atomic;

/// The four frontier sets, as plain URL strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierSnapshot {
    pub queued: Vec<String>,
    pub in_flight: Vec<String>,
    pub visited: Vec<String>,
    pub failed: Vec<String>,
}

impl FrontierSnapshot {
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
            && self.in_flight.is_empty()
            && self.visited.is_empty()
            && self.failed.is_empty()
    }
}

/// On-disk shape of `frontier.json`
#[derive(Debug, Serialize, Deserialize)]
struct FrontierFile {
    version: u32,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    queued: Vec<String>,
    #[serde(default)]
    in_flight: Vec<String>,
    #[serde(default)]
    visited: Vec<String>,
}

/// Reads and writes checkpoint files under the data directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    data_dir: PathBuf,
}

impl CheckpointStore {
    const CURRENT_VERSION: u32 = 1;

    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn frontier_path(&self) -> PathBuf {
        self.data_dir.join(FRONTIER_FILE)
    }

    fn failed_path(&self) -> PathBuf {
        self.data_dir.join(FAILED_FILE)
    }

    fn fingerprint_path(&self) -> PathBuf {
        self.data_dir.join(FINGERPRINT_FILE)
    }

    /// Load the frontier sets. Missing files are empty sets; unreadable or
    /// malformed files are errors.
    pub fn load_frontier(&self) -> Result<FrontierSnapshot> {
        let mut snapshot = FrontierSnapshot::default();

        if let Some(file) = read_json::<FrontierFile>(&self.frontier_path())? {
            if file.version > Self::CURRENT_VERSION {
                warn!(
                    "Checkpoint version {} is newer than supported {}",
                    file.version,
                    Self::CURRENT_VERSION
                );
            }
            snapshot.queued = file.queued;
            snapshot.in_flight = file.in_flight;
            snapshot.visited = file.visited;
        }

        if let Some(failed) = read_json::<Vec<String>>(&self.failed_path())? {
            snapshot.failed = failed;
        }

        Ok(snapshot)
    }

    pub fn save_frontier(&self, snapshot: &FrontierSnapshot) -> Result<()> {
        let file = FrontierFile {
            version: Self::CURRENT_VERSION,
            saved_at: Utc::now(),
            queued: snapshot.queued.clone(),
            in_flight: snapshot.in_flight.clone(),
            visited: snapshot.visited.clone(),
        };
        write_json(&self.frontier_path(), &file)?;
        write_json(&self.failed_path(), &snapshot.failed)?;
        Ok(())
    }

    pub fn load_fingerprints(&self) -> Result<BTreeMap<DocumentId, u64>> {
        Ok(read_json(&self.fingerprint_path())?.unwrap_or_default())
    }

    pub fn save_fingerprints(&self, entries: &BTreeMap<DocumentId, u64>) -> Result<()> {
        write_json(&self.fingerprint_path(), entries)
    }

    /// When `frontier.json` was last written
    pub fn saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(read_json::<FrontierFile>(&self.frontier_path())?.map(|f| f.saved_at))
    }

    /// Snapshot live state and write every checkpoint file
    pub fn save(&self, frontier: &Frontier, index: &SharedFingerprintIndex) -> Result<()> {
        let snapshot = frontier.snapshot();
        let fingerprints = index.entries();
        self.save_frontier(&snapshot)?;
        self.save_fingerprints(&fingerprints)?;
        debug!(
            "Checkpoint saved: {} queued, {} visited, {} fingerprints",
            snapshot.queued.len() + snapshot.in_flight.len(),
            snapshot.visited.len(),
            fingerprints.len()
        );
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let value = serde_json::from_slice(&content)
        .with_context(|| format!("Malformed checkpoint {}", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    write_atomic(path, &bytes)
}

/// Background task writing a checkpoint every interval
pub struct Checkpointer {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl Checkpointer {
    pub fn spawn(
        store: Arc<CheckpointStore>,
        frontier: Arc<Frontier>,
        index: Arc<SharedFingerprintIndex>,
        stats: Arc<CrawlStats>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let counts = frontier.counts();
                        info!(
                            "Progress: {} pages written, {} queued, {} in flight, {} visited, {} failed",
                            stats.snapshot().pages_written,
                            counts.queued,
                            counts.in_flight,
                            counts.visited,
                            counts.failed
                        );

                        let (store, frontier, index) = (store.clone(), frontier.clone(), index.clone());
                        let result = tokio::task::spawn_blocking(move || store.save(&frontier, &index)).await;
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!("Periodic checkpoint failed: {:#}", e),
                            Err(e) => warn!("Checkpoint task panicked: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Checkpointer stopping");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Cancel the periodic task and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!("Checkpointer task failed: {}", e);
        }
    }
}
