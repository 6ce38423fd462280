use anyhow::Result;
use simcrawl::{
    config::Config,
    crawl::{writer::read_url_map, CheckpointStore},
};
use tracing::info;

pub async fn show_stats(config: Config) -> Result<()> {
    info!("Loading crawl checkpoint...");

    let storage = &config.storage;
    let store = CheckpointStore::new(storage.data_dir());
    let frontier = store.load_frontier()?;
    let fingerprints = store.load_fingerprints()?;
    let url_map = read_url_map(&storage.url_map_path())?;

    println!("\nsimcrawl Statistics:");
    println!("====================");
    println!("Data directory: {}", storage.data_dir().display());
    match store.saved_at()? {
        Some(saved_at) => println!("Last checkpoint: {}", saved_at.to_rfc3339()),
        None => println!("Last checkpoint: none"),
    }
    println!("Queued URLs: {}", frontier.queued.len());
    println!("In-flight URLs (retried on resume): {}", frontier.in_flight.len());
    println!("Visited URLs: {}", frontier.visited.len());
    println!("Failed URLs: {}", frontier.failed.len());
    println!("Fingerprints: {}", fingerprints.len());
    println!("Pages written: {}", url_map.len());

    let pages_dir = storage.pages_dir();
    if pages_dir.is_dir() {
        let mut files = 0u64;
        let mut bytes = 0u64;
        for entry in std::fs::read_dir(&pages_dir)? {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                files += 1;
                bytes += metadata.len();
            }
        }
        println!("Page files: {} ({} bytes)", files, bytes);
    }

    Ok(())
}
