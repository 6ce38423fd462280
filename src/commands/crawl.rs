use anyhow::Result;
use simcrawl::{
    config::Config,
    crawl::{Crawler, HttpFetcher},
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

pub async fn run_crawl(config: Config, seed_strings: Vec<String>) -> Result<()> {
    info!("Starting crawler...");

    let seeds: Vec<Url> = seed_strings
        .iter()
        .filter_map(|s| {
            let parsed = Url::parse(s)
                .or_else(|_| Url::parse(&format!("https://{}", s)))
                .ok();
            if parsed.is_none() {
                warn!("Ignoring invalid seed: {}", s);
            }
            parsed
        })
        .collect();

    let fetcher = Arc::new(HttpFetcher::new(
        &config.crawl.user_agent,
        config.crawl.max_body_bytes,
    )?);
    let crawler = Arc::new(Crawler::new(config, fetcher)?);

    let queued = crawler.add_seeds(&seeds).await;
    if queued > 0 {
        info!("Queued {} new seed URLs", queued);
    }
    if !crawler.frontier().has_pending() {
        anyhow::bail!("Nothing to crawl: no queued URLs in the checkpoint and no new seeds");
    }

    let stopper = Arc::clone(&crawler);
    let signal_task = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let result = crawler.run().await;
    signal_task.abort();

    let report = result?;
    println!("\n{}", report);
    Ok(())
}
