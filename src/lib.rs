//! simcrawl: a polite, deduplicating web crawler
//!
//! Crawls outward from seed URLs until a target number of distinct English
//! pages has been stored, featuring:
//! - A shared frontier with per-domain caps and robots.txt filtering
//! - SimHash near-duplicate detection with a block-permutation index
//! - Canonical URL resolution
//! - Periodic crash-safe checkpoints so a run resumes where it stopped
//! - A post-crawl quality filter over the stored pages

pub mod config;
pub mod crawl;
pub mod quality;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
