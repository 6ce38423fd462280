use anyhow::Result;
use simcrawl::config::Config;
use std::path::PathBuf;

pub async fn init_config(path: PathBuf) -> Result<()> {
    let config = Config::default();
    std::fs::create_dir_all(&path)?;
    let config_path = path.join("simcrawl.toml");

    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    let crawl = &config.crawl;
    let toml_content = format!(
        r#"# simcrawl configuration

[crawl]
# Stop once this many distinct pages are written
target_pages = {}
workers = {}
fetch_timeout_secs = {}
max_body_bytes = {}
user_agent = "{}"
# Soft cap on outstanding URLs per domain
per_domain_cap = {}
cap_overflow_admit_probability = {:?}
reshuffle_probability = {:?}
# Concurrent fetches per domain
per_domain_connections = {}
idle_probe_ms = {}
# Re-queue URLs that failed in the previous run (false: treat them as visited)
retry_failed_on_restore = {}
# rng_seed = 42

[politeness]
enabled = {}
cache_rules_on_disk = {}

[dedup]
# Pages within this Hamming distance of a stored page are duplicates
max_hamming_distance = {}

[storage]
data_dir = "{}"
checkpoint_interval_secs = {}
writer_queue_capacity = {}

[logging]
# "text" or "json"
format = "text"
level = "{}"
"#,
        crawl.target_pages,
        crawl.workers,
        crawl.fetch_timeout_secs,
        crawl.max_body_bytes,
        crawl.user_agent,
        crawl.per_domain_cap,
        crawl.cap_overflow_admit_probability,
        crawl.reshuffle_probability,
        crawl.per_domain_connections,
        crawl.idle_probe_ms,
        crawl.retry_failed_on_restore,
        config.politeness.enabled,
        config.politeness.cache_rules_on_disk,
        config.dedup.max_hamming_distance,
        config.storage.data_dir.display(),
        config.storage.checkpoint_interval_secs,
        config.storage.writer_queue_capacity,
        config.logging.level,
    );

    std::fs::write(&config_path, toml_content)?;
    println!("Created configuration file: {}", config_path.display());

    Ok(())
}
