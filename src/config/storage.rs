//! On-disk layout configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const FRONTIER_FILE: &str = "frontier.json";
pub const FAILED_FILE: &str = "failed_urls.json";
pub const FINGERPRINT_FILE: &str = "fingerprints.json";
pub const URL_MAP_FILE: &str = "url_map.jsonl";
pub const PAGES_DIR: &str = "pages";
pub const ROBOTS_DIR: &str = "robots";

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for checkpoints and crawl output
    pub data_dir: PathBuf,
    /// Interval between periodic checkpoints (seconds)
    pub checkpoint_interval_secs: u64,
    /// Capacity of the queue between workers and the document writer
    pub writer_queue_capacity: usize,
}

impl StorageConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.data_dir.join(PAGES_DIR)
    }

    pub fn robots_dir(&self) -> PathBuf {
        self.data_dir.join(ROBOTS_DIR)
    }

    pub fn url_map_path(&self) -> PathBuf {
        self.data_dir.join(URL_MAP_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("crawl_data"),
            checkpoint_interval_secs: 60,
            writer_queue_capacity: 256,
        }
    }
}
