pub mod crawl;
pub mod filter;
pub mod init;
pub mod stats;
