//! CLI entry point for the imagefetch tool.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use imagefetch::{ArtifactStore, HttpFetcher, RunController, RunObserver, RunPhase};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Progress bar resolution; the run's [0, 1] fraction maps onto this scale.
const BAR_SCALE: u64 = 1000;

/// Observer that renders an indicatif progress bar and prints errors
/// above it.
struct ConsoleObserver {
    bar: ProgressBar,
}

impl ConsoleObserver {
    fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(BAR_SCALE)
        };
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {percent:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl RunObserver for ConsoleObserver {
    fn on_progress(&self, progress: f32) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let position = (progress * BAR_SCALE as f32) as u64;
        self.bar.set_position(position.min(BAR_SCALE));
    }

    fn on_paths_changed(&self, paths: &[PathBuf]) {
        self.bar.set_message(format!("{} saved", paths.len()));
    }

    fn on_error(&self, message: &str) {
        self.bar.println(format!("error: {message}"));
    }

    fn on_finished(&self) {
        self.bar.finish_with_message("done");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Read input: from positional args or stdin
    let urls: Vec<String> = if args.urls.is_empty() {
        if io::stdin().is_terminal() {
            eprintln!("No input provided. Pipe URLs via stdin or pass as arguments.");
            eprintln!("Example: imagefetch https://example.com/photo.jpg");
            return Ok(());
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect()
    } else {
        args.urls.clone()
    };

    if urls.is_empty() {
        eprintln!("No URLs found in input.");
        return Ok(());
    }

    let output_dir = args.output_dir.clone().unwrap_or_else(std::env::temp_dir);
    info!(dir = %output_dir.display(), urls = urls.len(), "starting batch");

    let observer = Arc::new(ConsoleObserver::new(args.quiet));
    let controller = Arc::new(RunController::new(
        Arc::new(HttpFetcher::new()),
        ArtifactStore::new(&output_dir),
        Arc::clone(&observer) as Arc<dyn RunObserver>,
        usize::from(args.concurrency),
    )?);

    controller.start(&urls).await?;

    // Ctrl-C cancels cooperatively; in-flight fetches drain in the background.
    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                controller.cancel();
            }
        })
    };

    controller.wait().await;
    interrupt.abort();

    let summary = controller.summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if controller.phase() == RunPhase::Cancelled {
        info!("run cancelled");
        std::process::exit(130);
    }
    if summary.failed > 0 {
        warn!(
            failed = summary.failed,
            completed = summary.completed,
            "run finished with failures"
        );
        std::process::exit(1);
    }

    info!(
        completed = summary.completed,
        dir = %output_dir.display(),
        "all items fetched"
    );
    Ok(())
}
