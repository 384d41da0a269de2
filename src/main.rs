//! `geoflow` command line tool.
//!
//! Runs the detect-and-reduce pipeline over a mesh dataset and writes one
//! row per timestep in which the detector fired:
//!
//! ```text
//! geoflow 'data/era5_.*\.jsonl' events.csv --variable ivt --low-threshold 250 --threads -1
//! ```
//!
//! Flags override the matching fields of `--config`.

use anyhow::{Context, Result};
use clap::Parser;
use geoflow::config::RunConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "geoflow", version, about = "Detect threshold events in gridded time series")]
struct Args {
    /// Regex over the dataset's file names, optionally prefixed by a directory.
    files_regex: Option<String>,

    /// Output table (.csv or .jsonl, optionally .gz).
    out_file: Option<PathBuf>,

    /// JSON run configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep only rows matching this expression, e.g. `cells >= 10`.
    #[arg(long)]
    select: Option<String>,

    /// Reducer threads; -1 uses every core.
    #[arg(long, allow_negative_numbers = true)]
    threads: Option<i64>,

    /// Variable the detector thresholds.
    #[arg(long)]
    variable: Option<String>,

    #[arg(long)]
    low_threshold: Option<f64>,

    #[arg(long)]
    high_threshold: Option<f64>,

    #[arg(long)]
    first_step: Option<u64>,

    #[arg(long)]
    last_step: Option<u64>,

    /// Skip timesteps that fail instead of aborting.
    #[arg(long)]
    skip_failed: bool,

    /// Read files one at a time.
    #[arg(long)]
    serialize_io: bool,

    /// Save run metrics as JSON.
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        if self.files_regex.is_some() {
            config.input.files_regex = self.files_regex;
        }
        if self.out_file.is_some() {
            config.output = self.out_file;
        }
        if self.select.is_some() {
            config.select = self.select;
        }
        if let Some(threads) = self.threads {
            config.reduce.worker_count = threads;
        }
        if let Some(variable) = self.variable {
            config.detector.variable = variable;
        }
        if let Some(low) = self.low_threshold {
            config.detector.low_threshold = low;
        }
        if self.high_threshold.is_some() {
            config.detector.high_threshold = self.high_threshold;
        }
        if self.first_step.is_some() {
            config.reduce.first_step = self.first_step;
        }
        if self.last_step.is_some() {
            config.reduce.last_step = self.last_step;
        }
        config.reduce.skip_failed |= self.skip_failed;
        config.input.serialize_io |= self.serialize_io;
        if self.metrics.is_some() {
            config.metrics = self.metrics;
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "geoflow=debug" } else { "geoflow=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(config: &RunConfig) -> Result<()> {
    let (pipeline, writer) = config.build_pipeline().context("building pipeline")?;
    let metrics = pipeline.metrics();

    metrics.record_start();
    let output = pipeline.update(writer);
    metrics.record_end();

    if let Some(path) = &config.metrics {
        metrics
            .save_to_file(path)
            .with_context(|| format!("saving metrics to {}", path.display()))?;
    }
    let output = output.context("running pipeline")?;
    if let Some(artifact) = output.as_artifact() {
        info!(path = %artifact.path.display(), rows = artifact.rows, "wrote output");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.into_config().and_then(|config| run(&config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("geoflow: {err:#}");
            ExitCode::FAILURE
        }
    }
}
