//! simcrawl: polite, deduplicating web crawler

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use simcrawl::config::{Config, LogFormat, LoggingConfig};
use simcrawl::quality::DEFAULT_MIN_WORDS;
use std::path::PathBuf;
use tracing_subscriber::FmtSubscriber;

use commands::{crawl::run_crawl, filter::filter_pages, init::init_config, stats::show_stats};

#[derive(Parser)]
#[command(name = "simcrawl")]
#[command(about = "Polite, deduplicating web crawler")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "simcrawl.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl from seed URLs, resuming any previous checkpoint
    Crawl {
        /// Seed URLs (optional when resuming)
        seeds: Vec<String>,

        /// Number of distinct pages to store
        #[arg(short, long)]
        pages: Option<usize>,

        /// Concurrent crawl workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Ignore robots.txt
        #[arg(long)]
        no_politeness: bool,
    },

    /// Show checkpoint statistics without crawling
    Stats,

    /// Write a default configuration file
    Init {
        /// Directory to create the configuration in
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Flag or delete stored pages that are not English or too short
    Filter {
        /// Minimum visible words a page must have
        #[arg(long, default_value_t = DEFAULT_MIN_WORDS)]
        min_words: usize,

        /// Delete flagged pages instead of listing them
        #[arg(long)]
        delete: bool,
    },
}

fn init_logging(logging: &LoggingConfig, verbose: u8) -> Result<()> {
    let builder = FmtSubscriber::builder()
        .with_env_filter(logging.env_filter(verbose))
        .with_target(false);

    match logging.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path } = &cli.command {
        init_logging(&LoggingConfig::default(), cli.verbose)?;
        return init_config(path.clone()).await;
    }

    let mut config = Config::load_or_default(&cli.config)?;

    // Override data dir if specified
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Crawl {
            seeds,
            pages,
            workers,
            no_politeness,
        } => {
            if let Some(pages) = pages {
                config.crawl.target_pages = pages;
            }
            if let Some(workers) = workers {
                config.crawl.workers = workers;
            }
            if no_politeness {
                config.politeness.enabled = false;
            }
            config.validate()?;
            run_crawl(config, seeds).await
        }
        Commands::Stats => show_stats(config).await,
        Commands::Filter { min_words, delete } => filter_pages(config, min_words, delete).await,
        Commands::Init { .. } => Ok(()),
    }
}
