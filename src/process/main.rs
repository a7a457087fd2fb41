//! Batch processing of configured layer items.
//!
//! Each named item is tagged, buffered, clipped against its mask and
//! written to the sink. A failing item does not stop the others.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use tormays::config::Config;
use tormays::pipeline::ItemPipeline;
use tormays::sink::DirectorySink;

#[derive(Parser, Debug)]
#[command(name = "process")]
#[command(about = "Clip and merge buffered layers against their masks")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Items to process, in order
    #[arg(required = true)]
    items: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    // Unknown item names are a configuration error, caught before any work
    for name in &args.items {
        config.item(name)?;
    }

    let mut sink = DirectorySink::new(&config.global.sink_dir);

    let pb = ProgressBar::new(args.items.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut failed = Vec::new();
    for name in &args.items {
        pb.set_message(name.clone());
        let item = config.item(name)?;
        match ItemPipeline::new(name, item).run(&mut sink, &config.global.output_dir) {
            Ok(report) => {
                info!(
                    "{}: {} rows written to '{}'",
                    report.item, report.output, item.table
                );
                debug!("Report: {}", serde_json::to_string(&report)?);
            }
            Err(e) => {
                error!("Item '{}' failed: {:#}", name, e);
                failed.push(name.clone());
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    if !failed.is_empty() {
        anyhow::bail!(
            "{} of {} items failed: {}",
            failed.len(),
            args.items.len(),
            failed.join(", ")
        );
    }

    info!("All {} items processed", args.items.len());
    Ok(())
}
