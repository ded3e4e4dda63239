//! Command-line front end.
//!
//! - `run`: detect and crop every stack below an input directory
//! - `replay`: re-crop from a coordinate ledger without detection
//! - `verify`: compare two output trees by checksum

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use autocrop::{
    BatchOptions, BatchProgress, Config, Stage, TiffVolumeIo, replay_ledger, run_batch,
    verify_outputs,
};
use clap::{Parser, Subcommand};
use common::SharedFn;
use common::log_setup::setup_logging;

#[derive(Parser, Debug)]
#[command(name = "autocrop")]
#[command(about = "Detect nuclei in 3D stacks and crop each one into its own stack")]
#[command(version)]
struct Args {
    /// Base log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crop every stack below an input directory
    Run {
        /// Input directory, or a single stack
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Property (.properties) or YAML (.yaml/.yml) parameter file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads (defaults to one per core)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Re-crop from a coordinate ledger
    Replay {
        #[arg(short, long)]
        ledger: PathBuf,

        /// Directory relative ledger paths resolve against
        #[arg(short, long)]
        base_dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Parameter file; only its calibration is used
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Compare a produced output tree against an expected one
    Verify {
        #[arg(short, long)]
        expected: PathBuf,

        #[arg(short, long)]
        produced: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Option<Config> {
    let Some(path) = path else {
        return Some(Config::default());
    };
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Invalid configuration");
            eprintln!("autocrop: {e}");
            None
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    setup_logging(&args.log_level, Path::new("logs"), "autocrop");

    match args.command {
        Command::Run {
            input,
            output,
            config,
            threads,
        } => {
            let Some(config) = load_config(config.as_deref()) else {
                return Ok(ExitCode::FAILURE);
            };
            if let Some(threads) = threads {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .context("Failed to configure worker threads")?;
            }

            let options = BatchOptions {
                progress: SharedFn::new(Arc::new(|p: BatchProgress| {
                    if p.stage == Stage::Done {
                        tracing::info!(
                            "[{}/{}] {} done",
                            p.current,
                            p.total,
                            p.path.display()
                        );
                    }
                })),
                ..BatchOptions::default()
            };
            let report = run_batch(&input, &output, &config, &TiffVolumeIo, &options)
                .context("Batch failed")?;
            println!(
                "{} volume(s), {} crop(s), {} failed. Ledger: {}",
                report.outcomes.len(),
                report.crops_written(),
                report.failed(),
                report.ledger_path.display()
            );
        }

        Command::Replay {
            ledger,
            base_dir,
            output,
            config,
        } => {
            let Some(config) = load_config(config.as_deref()) else {
                return Ok(ExitCode::FAILURE);
            };
            let calibration = config.calibration_override();
            let report = replay_ledger(
                &ledger,
                &base_dir,
                &output,
                &TiffVolumeIo,
                calibration.as_ref(),
            )
            .with_context(|| format!("Failed to replay '{}'", ledger.display()))?;
            for failure in &report.failures {
                println!(
                    "{}\t{}\t{}",
                    failure.row.source.display(),
                    failure.row.index,
                    failure.error
                );
            }
            println!(
                "{} crop(s) written, {} row(s) skipped",
                report.written.len(),
                report.failures.len()
            );
        }

        Command::Verify { expected, produced } => {
            let report = verify_outputs(&expected, &produced).context("Verification failed")?;
            println!("{report}");
        }
    }

    Ok(ExitCode::SUCCESS)
}
