use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod config;
mod error;
mod fits;
mod state;

use app::commands::App;
use app::prompt::TerminalChooser;
use config::Config;
use fits::scan::{self, ScanOptions};
use state::index::Index;
use state::library::HeaderCache;

/// Interactive catalog for FITS image headers
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory to scan recursively for FITS files
    target_dir: PathBuf,

    /// Only include files modified within this many days
    #[arg(long)]
    days_old: Option<u64>,

    /// Drop the header cache and re-read every file
    #[arg(long)]
    reset: bool,

    /// Include Siril preprocessing outputs (r_*, pp_*)
    #[arg(long)]
    allow_siril: bool,

    /// Configuration file overriding the platform default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let target_dir = std::fs::canonicalize(&args.target_dir)
        .with_context(|| format!("Cannot open {}", args.target_dir.display()))?;
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    let options = ScanOptions {
        days_old: args.days_old,
        allow_siril: args.allow_siril,
    };
    let files = scan::find_fits(&target_dir, &options)?;
    tracing::info!("Found {} FITS files under {}", files.len(), target_dir.display());

    let mut cache = HeaderCache::open(&target_dir, &config.cache_name, args.reset)
        .context("Failed to open header cache")?;
    let parsed = match cache.lookup(&files)? {
        Some(parsed) => {
            tracing::info!("Using cached headers from {}", cache.path().display());
            parsed
        }
        None => {
            println!("Reading headers of {} files...", files.len());
            let parsed = scan::parse_files(&files);
            cache.set(&parsed)?;
            parsed
        }
    };

    if parsed.entries.is_empty() {
        bail!("No valid FITS files found in {}", target_dir.display());
    }
    if !parsed.skipped.is_empty() {
        tracing::warn!("Skipped {} unreadable files", parsed.skipped.len());
    }

    let (index, failures) = Index::build(&parsed.entries, &target_dir, &config);
    for failure in &failures {
        tracing::warn!("{}", failure);
    }
    if index.is_empty() {
        bail!("No valid FITS files found in {}", target_dir.display());
    }
    println!("{} files loaded.", index.len());

    let mut chooser = TerminalChooser::stdio();
    let mut app = App::new(index, &config, &mut cache, &mut chooser);
    app.run()?;
    Ok(())
}
