//! Race ranker training CLI
//!
//! Takes one JSON configuration argument, trains the ranker and prints the
//! result summary as a single JSON line on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use race_rank_trainer::{train_ranker, TrainingConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "train-ranker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train a gradient-boosted race outcome ranker", long_about = None)]
#[command(after_help = "The model is written to <outputPath>/ranker_model.json, a canonical JSON \
file holding the feature encoder and tree ensemble, next to its blake3 digest in \
<outputPath>/ranker_model.hash. It replaces the pickled catboost_model.pkl of earlier trainers.")]
struct Args {
    /// JSON configuration, or @path to a JSON file
    config: String,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => err.exit(),
        Err(err) => {
            eprintln!("{err}");
            eprintln!("Usage: train-ranker <config_json>");
            std::process::exit(1);
        }
    };

    init_logging(args.verbose);
    info!("Race ranker trainer v{}", env!("CARGO_PKG_VERSION"));

    let config = TrainingConfig::from_arg(&args.config)?;
    let result = train_ranker(&config)?;

    println!("{}", result.to_json_line().context("Failed to encode result")?);
    Ok(())
}
