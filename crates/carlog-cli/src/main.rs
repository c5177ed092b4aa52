use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use carlog_car::{CarReader, FileSource};
use carlog_store::{SegmentedStore, StoreConfig};
use clap::Parser;
use colored::Colorize;
use tracing::Level;

mod cli;
mod ingest;

use cli::Cli;
use ingest::IngestOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
    run(cli).await
}

/// Merge the config file (if any) with command-line overrides.
fn store_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(root) = &cli.store {
        config.root = root.clone();
    }
    if let Some(buckets) = cli.buckets {
        config.bucket_count = buckets;
    }
    if let Some(max) = cli.max_in_flight {
        config.max_in_flight = max;
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let started = Instant::now();
    let config = store_config(&cli)?;

    let source = FileSource::open(&cli.archive)
        .await
        .with_context(|| format!("failed to open {}", cli.archive.display()))?;
    let mut reader = CarReader::new(source)
        .await
        .with_context(|| format!("failed to read header of {}", cli.archive.display()))?;

    let store = Arc::new(
        SegmentedStore::open(config.clone())
            .await
            .with_context(|| format!("failed to open store at {}", config.root.display()))?,
    );

    let options = IngestOptions {
        max_in_flight: config.max_in_flight,
        report_interval: Duration::from_secs(cli.report_interval),
        verify: cli.verify,
    };
    let result = ingest::ingest(&mut reader, Arc::clone(&store), &options).await;
    let released = reader.close().await.context("failed to close archive");
    let closed = store.close().await.context("failed to close store");
    let report = result?;
    released?;
    closed?;

    println!(
        "{} Ingested {} into {}",
        "✓".green().bold(),
        cli.archive.display().to_string().bold(),
        config.root.display().to_string().cyan()
    );
    println!("  Entries:    {}", report.entries.to_string().bold());
    println!("  Stored:     {}", report.stored.to_string().green());
    println!("  Duplicates: {}", report.duplicates.to_string().yellow());
    println!("  Bytes:      {}", report.bytes);
    println!("  Re-reads:   {}", report.rereads);
    if cli.verify {
        println!("  Verified:   {}", "all blocks".green());
    }
    println!("  Elapsed:    {:.2?}", started.elapsed());
    Ok(())
}
