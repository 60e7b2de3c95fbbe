//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use imagefetch::DEFAULT_CONCURRENCY;

/// Fetch a batch of image URLs concurrently.
///
/// Imagefetch downloads every URL in the batch, saves each as
/// `image_<index>.<ext>` in the output directory, and reports progress and
/// per-item failures as it goes.
#[derive(Parser, Debug)]
#[command(name = "imagefetch")]
#[command(author, version, about)]
pub struct Args {
    /// Image URLs to fetch (or pipe one per line via stdin)
    pub urls: Vec<String>,

    /// Directory to save images to (defaults to the system temp directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent fetches (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Print a machine-readable JSON summary when the run ends
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
