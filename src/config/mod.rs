//! Configuration for simcrawl

mod crawl;
mod logging;
mod storage;

pub use crawl::{CrawlConfig, DedupConfig, PolitenessConfig};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use storage::{
    StorageConfig, FAILED_FILE, FINGERPRINT_FILE, FRONTIER_FILE, PAGES_DIR, ROBOTS_DIR,
    URL_MAP_FILE,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default user agent for page and robots.txt requests
pub const DEFAULT_USER_AGENT: &str = "simcrawl/0.1 (+https://github.com/simcrawl/simcrawl)";

/// Largest Hamming distance the fingerprint index accepts. The index splits
/// 64-bit fingerprints into `distance + 1` blocks, so each block must keep
/// a useful number of bits.
pub const MAX_HAMMING_DISTANCE: u32 = 15;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate all configuration fields, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.crawl.target_pages == 0 {
            errors.push("target_pages must be positive".to_string());
        }
        if self.crawl.workers == 0 {
            errors.push("workers must be positive".to_string());
        }
        if self.crawl.fetch_timeout_secs == 0 {
            errors.push("fetch_timeout_secs must be positive".to_string());
        }
        if self.crawl.per_domain_cap == 0 {
            errors.push("per_domain_cap must be positive".to_string());
        }
        if self.crawl.per_domain_connections == 0 {
            errors.push("per_domain_connections must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.crawl.cap_overflow_admit_probability) {
            errors.push("cap_overflow_admit_probability must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.crawl.reshuffle_probability) {
            errors.push("reshuffle_probability must be between 0.0 and 1.0".to_string());
        }
        if self.crawl.user_agent.trim().is_empty() {
            errors.push("user_agent must not be empty".to_string());
        }

        if self.dedup.max_hamming_distance > MAX_HAMMING_DISTANCE {
            errors.push(format!(
                "max_hamming_distance must be <= {}",
                MAX_HAMMING_DISTANCE
            ));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }
        if self.storage.checkpoint_interval_secs == 0 {
            errors.push("checkpoint_interval_secs must be positive".to_string());
        }
        if self.storage.writer_queue_capacity == 0 {
            errors.push("writer_queue_capacity must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
