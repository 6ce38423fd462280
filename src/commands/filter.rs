use anyhow::Result;
use simcrawl::{
    config::Config,
    quality::{QualityFilter, CANDIDATES_FILE},
};
use tracing::info;

pub async fn filter_pages(config: Config, min_words: usize, delete: bool) -> Result<()> {
    info!("Filtering stored pages...");

    let storage = &config.storage;
    let filter = QualityFilter::new(storage.pages_dir(), storage.url_map_path(), min_words);
    let report = filter.scan().await?;

    println!("\nQuality filter:");
    println!("  Examined: {}", report.examined);
    println!("  Kept:     {}", report.kept.len());
    println!("  Flagged:  {}", report.rejected.len());

    if report.rejected.is_empty() {
        return Ok(());
    }

    if delete {
        let deleted = filter.apply(&report)?;
        println!("Deleted {} page files and rewrote the url map", deleted);
    } else {
        let path = storage.data_dir().join(CANDIDATES_FILE);
        filter.write_candidates(&report, &path)?;
        println!("Candidates listed in {}", path.display());
        println!("Re-run with --delete to remove them");
    }

    Ok(())
}
