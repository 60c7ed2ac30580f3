//! mtop CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mt_analysis::{
    Accumulator, AnalysisProcessor, CalibrationBundle, EventBatch, XsecTable, Year,
};
use rayon::prelude::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mtop")]
#[command(about = "CMS leptonic event-processing pipeline")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process event batches into merged histograms
    Run {
        /// Event batch files (columnar JSON), one dataset chunk each
        #[arg(required = true)]
        batches: Vec<PathBuf>,

        /// Data-taking year (2016, 2017, 2018)
        #[arg(long)]
        year: Year,

        /// Calibration bundle (JSON)
        #[arg(long)]
        calib: PathBuf,

        /// Cross-section table (JSON, dataset -> pb)
        #[arg(long)]
        xsec: PathBuf,

        /// Output file for the merged accumulator (pretty JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Skip the luminosity x cross-section rescaling
        #[arg(long)]
        no_rescale: bool,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Rescale an already-merged accumulator
    Rescale {
        /// Merged accumulator (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Data-taking year (2016, 2017, 2018)
        #[arg(long)]
        year: Year,

        /// Cross-section table (JSON, dataset -> pb)
        #[arg(long)]
        xsec: PathBuf,

        /// Output file (pretty JSON)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run { batches, year, calib, xsec, output, no_rescale, threads } => {
            cmd_run(&batches, year, &calib, &xsec, &output, no_rescale, threads)
        }
        Commands::Rescale { input, year, xsec, output } => {
            cmd_rescale(&input, year, &xsec, &output)
        }
    }
}

fn build_processor(year: Year, calib: &PathBuf, xsec: &PathBuf) -> Result<AnalysisProcessor> {
    let calib = CalibrationBundle::from_json_file(calib, year)
        .with_context(|| format!("loading calibration bundle {}", calib.display()))?;
    let xsec = XsecTable::from_json_file(xsec)
        .with_context(|| format!("loading cross-section table {}", xsec.display()))?;
    Ok(AnalysisProcessor::new(year, calib, xsec)?)
}

fn cmd_run(
    batches: &[PathBuf],
    year: Year,
    calib: &PathBuf,
    xsec: &PathBuf,
    output: &PathBuf,
    no_rescale: bool,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    let processor = build_processor(year, calib, xsec)?;
    tracing::info!(n_batches = batches.len(), "starting run");

    // Batches are independent; process in parallel and fold the partial
    // accumulators (merge is associative and commutative).
    let partials: Vec<Accumulator> = batches
        .par_iter()
        .map(|path| -> Result<Accumulator> {
            let batch = EventBatch::from_json_file(path)
                .with_context(|| format!("loading batch {}", path.display()))?;
            let acc = processor
                .process(&batch)
                .with_context(|| format!("processing batch {}", path.display()))?;
            Ok(acc)
        })
        .collect::<Result<_>>()?;

    let mut merged = Accumulator::standard()?;
    for partial in &partials {
        merged.merge(partial)?;
    }

    if !no_rescale {
        processor.postprocess(&mut merged)?;
    }

    merged.to_json_file(output).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(output = %output.display(), "run finished");
    Ok(())
}

fn cmd_rescale(input: &PathBuf, year: Year, xsec: &PathBuf, output: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let mut acc: Accumulator = serde_json::from_slice(&bytes)?;

    let xsec = XsecTable::from_json_file(xsec)
        .with_context(|| format!("loading cross-section table {}", xsec.display()))?;
    let processor = AnalysisProcessor::new(year, CalibrationBundle::identity(), xsec)?;
    processor.postprocess(&mut acc)?;

    acc.to_json_file(output).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
