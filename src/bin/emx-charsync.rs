//! emx-charsync CLI
//!
//! Convert a directory tree into another encoding, or keep a source tree and
//! its converted mirror in sync.

use anyhow::{bail, Context, Result};
use clap::Parser;
use emx_charsync::{
    catalog, parse_size, ConvertConfig, Converter, ExcludeSet, SyncEngine, WatchConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, Dispatch};
use tracing_subscriber::EnvFilter;

const SIGNAL_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "emx-charsync")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Mirror a source tree into another text encoding")]
struct Cli {
    /// Source directory
    input_dir: Option<PathBuf>,

    /// Mirror directory (created if missing)
    output_dir: Option<PathBuf>,

    /// Source encoding (detected per file when omitted)
    #[arg(short = 'f', long = "from")]
    from_encoding: Option<String>,

    /// Mirror encoding
    #[arg(short = 't', long = "to", default_value = "utf-8")]
    to_encoding: String,

    /// List supported encodings and exit
    #[arg(short, long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Largest file to convert, e.g. 1M or 500K; larger files are copied
    #[arg(long)]
    max_size: Option<String>,

    /// Comma-separated patterns to exclude, e.g. ".git,*.bak"
    #[arg(long)]
    exclude: Option<String>,

    /// Keep watching and sync edits in both directions
    #[arg(long)]
    watch: bool,

    /// Source encoding for new files and content without an encoding signal
    #[arg(long)]
    fallback_charset: Option<String>,

    /// Poll interval in seconds
    #[arg(long, default_value_t = 1.0)]
    watch_interval: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list {
        println!("Supported encodings:");
        for name in catalog::list() {
            println!("  {}", name);
        }
        return Ok(());
    }

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let dispatch = Dispatch::new(
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .finish(),
    );

    tracing::dispatcher::with_default(&dispatch, || run(cli, &dispatch))
}

fn run(cli: Cli, dispatch: &Dispatch) -> Result<()> {
    let (Some(input_dir), Some(output_dir)) = (cli.input_dir.clone(), cli.output_dir.clone()) else {
        bail!("both an input directory and an output directory are required");
    };
    if !input_dir.is_dir() {
        bail!("input directory does not exist: {}", input_dir.display());
    }

    let converter = Converter::new(build_config(&cli)?)
        .context("Invalid conversion settings")?
        .with_dispatch(dispatch.clone());

    if !cli.watch {
        converter
            .convert_directory(&input_dir, &output_dir)
            .with_context(|| format!("Failed to convert {}", input_dir.display()))?;
        return Ok(());
    }

    let watch = WatchConfig::from_secs_f64(cli.watch_interval)?;
    let engine = SyncEngine::new(&input_dir, &output_dir, converter, watch)?
        .with_dispatch(dispatch.clone());
    watch_until_signalled(&engine)
}

fn build_config(cli: &Cli) -> Result<ConvertConfig> {
    let mut config = ConvertConfig::new().with_to_encoding(cli.to_encoding.as_str());

    if let Some(from) = &cli.from_encoding {
        config = config.with_from_encoding(from.as_str());
    }
    if let Some(size) = &cli.max_size {
        config = config.with_max_size(parse_size(size)?);
    }
    if let Some(list) = &cli.exclude {
        config = config.with_exclude(ExcludeSet::from_comma_list(list)?);
    }
    if let Some(fallback) = &cli.fallback_charset {
        config = config.with_fallback_charset(fallback.as_str());
    }
    Ok(config)
}

fn watch_until_signalled(engine: &SyncEngine) -> Result<()> {
    let terminate = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&terminate))
            .context("Failed to register signal handler")?;
    }

    engine.start().context("Failed to start watching")?;

    while engine.is_running() && !terminate.load(Ordering::Acquire) {
        thread::sleep(SIGNAL_POLL);
    }

    info!("shutting down");
    engine.stop();
    Ok(())
}
