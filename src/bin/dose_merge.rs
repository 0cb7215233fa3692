//! # Checkpoint Merge CLI
//!
//! Combines the per-thread checkpoints of a finished run into one file.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin dose_merge -- results/
//! cargo run --release --bin dose_merge -- results/ --output phantom_merged.csv
//! ```

use clap::Parser;
use std::path::PathBuf;

use dose_tally::{EventNormalization, ResultMerger};

/// Offline checkpoint merger
#[derive(Parser, Debug)]
#[command(name = "dose_merge")]
#[command(about = "Merge per-thread dose checkpoints into one result file")]
struct Args {
    /// Directory holding the checkpoint files
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Merged file name, written into the same directory
    #[arg(long, short = 'o', default_value = "dose_merged.csv")]
    output: String,

    /// Normalize every detector by the events of all threads
    #[arg(long)]
    pooled_events: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let normalization = if args.pooled_events {
        EventNormalization::AllThreads
    } else {
        EventNormalization::ContributingThreads
    };
    let merger = ResultMerger::new()
        .with_output_name(args.output.clone())
        .with_normalization(normalization);

    match merger.merge_directory(&args.dir)? {
        Some(summary) => {
            println!("[MERGE] Files read: {}", summary.files_read);
            if summary.files_skipped > 0 {
                println!("[MERGE] Files skipped: {}", summary.files_skipped);
            }
            println!(
                "[MERGE] Rows merged: {} ({} malformed skipped)",
                summary.rows_merged, summary.rows_skipped
            );
            println!("[MERGE] Detectors: {}", summary.detectors);
            println!("[MERGE] Events: {}", summary.total_events);
            if let Some(rel) = summary.max_relative_uncertainty {
                println!("[MERGE] Worst relative 3-sigma uncertainty: {:.2}%", rel * 100.0);
            }
            println!("[MERGE] Output: {:?}", summary.output_path);
        }
        None => {
            println!("[MERGE] No checkpoint files found in {:?}", args.dir);
        }
    }

    Ok(())
}
