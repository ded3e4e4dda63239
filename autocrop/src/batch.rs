//! Batch orchestration over an input directory.
//!
//! Every source stack below the input root is processed independently, at
//! most `max_concurrent_volumes` at a time. Crops land under the output root
//! mirroring the input layout; their bounds go to the shared ledger; a
//! per-volume summary goes to the batch report. A failing volume is recorded
//! and the batch moves on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use common::SharedFn;
use common::file_utils::{DirectoryError, ensure_directory, source_files};
use common::parallel::par_map_limited_until;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::crop::{crop_name_clashes, crop_output_path};
use crate::ledger::{LEDGER_FILE_NAME, LedgerError, LedgerRow, LedgerWriter};
use crate::pipeline::{Autocrop, Stage};
use crate::volume::{Calibration, VolumeIo};

/// File name of the per-volume summary inside the output directory.
pub const REPORT_FILE_NAME: &str = "autocrop_report.tsv";

const REPORT_COLUMNS: &str = "file\tstatus\tthreshold\tcomponents\tkept\tcrops";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Failed to write report '{path}': {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shared cancellation flag. Checked before each volume starts; volumes
/// already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress of one volume within the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based position of the volume in start order.
    pub current: usize,
    pub total: usize,
    pub stage: Stage,
    /// Source path relative to the input root.
    pub path: PathBuf,
}

pub type ProgressCallback = SharedFn<dyn Fn(BatchProgress) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub progress: ProgressCallback,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeStatus {
    Cropped {
        threshold: u16,
        components: usize,
        kept: usize,
        crops: usize,
    },
    Failed {
        reason: String,
    },
    /// Never started because the batch was cancelled.
    Cancelled,
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeStatus::Cropped { .. } => write!(f, "cropped"),
            VolumeStatus::Failed { .. } => write!(f, "failed"),
            VolumeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOutcome {
    /// Relative to the input root.
    pub source: PathBuf,
    pub status: VolumeStatus,
}

impl VolumeOutcome {
    fn report_line(&self) -> String {
        let source = self.source.display();
        match &self.status {
            VolumeStatus::Cropped {
                threshold,
                components,
                kept,
                crops,
            } => format!("{source}\t{}\t{threshold}\t{components}\t{kept}\t{crops}", self.status),
            _ => format!("{source}\t{}\t-\t-\t-\t0", self.status),
        }
    }
}

/// Summary of a finished (or cancelled) batch, in source order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<VolumeOutcome>,
    pub ledger_path: PathBuf,
    pub report_path: PathBuf,
}

impl BatchReport {
    pub fn crops_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                VolumeStatus::Cropped { crops, .. } => crops,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, VolumeStatus::Failed { .. }))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == VolumeStatus::Cancelled)
            .count()
    }
}

/// Crop every source stack below `input_root` into `output_root`.
///
/// `input_root` may also be a single stack; its parent then serves as the
/// root that ledger paths are relative to. Only configuration, directory,
/// ledger creation and report errors fail the batch; anything that goes wrong
/// with a single volume is recorded in its [`VolumeOutcome`].
pub fn run_batch(
    input_root: &Path,
    output_root: &Path,
    config: &Config,
    io: &dyn VolumeIo,
    options: &BatchOptions,
) -> Result<BatchReport, BatchError> {
    let autocrop = Autocrop::new(config)?;
    ensure_directory(output_root)?;
    let sources = enumerate_sources(input_root, output_root)?;
    let ledger = LedgerWriter::create(&output_root.join(LEDGER_FILE_NAME))?;
    let calibration = config.calibration_override();

    tracing::info!(
        input = %input_root.display(),
        output = %output_root.display(),
        volumes = sources.len(),
        max_concurrent = config.max_concurrent_volumes,
        "Starting batch"
    );

    let job = VolumeJob {
        autocrop: &autocrop,
        io,
        ledger: &ledger,
        output_root,
        calibration: calibration.as_ref(),
        progress: &options.progress,
        total: sources.len(),
    };
    let started = AtomicUsize::new(0);

    let results = par_map_limited_until(
        &sources,
        config.max_concurrent_volumes,
        || options.cancel.is_cancelled(),
        |source| {
            let current = started.fetch_add(1, Ordering::Relaxed) + 1;
            job.run(source, current)
        },
    );

    let outcomes: Vec<VolumeOutcome> = sources
        .into_iter()
        .zip(results)
        .map(|(source, status)| VolumeOutcome {
            source: source.relative,
            status: status.unwrap_or(VolumeStatus::Cancelled),
        })
        .collect();

    let report_path = output_root.join(REPORT_FILE_NAME);
    write_report(&report_path, config, input_root, output_root, &outcomes)?;

    let report = BatchReport {
        outcomes,
        ledger_path: ledger.path().to_path_buf(),
        report_path,
    };
    tracing::info!(
        volumes = report.outcomes.len(),
        crops = report.crops_written(),
        failed = report.failed(),
        cancelled = report.cancelled(),
        "Batch finished"
    );
    Ok(report)
}

/// One stack to process.
#[derive(Debug)]
struct SourceEntry {
    path: PathBuf,
    /// Relative to the input root; the identity written to the ledger.
    relative: PathBuf,
    /// Earlier source whose crops would get the same file names.
    clashes_with: Option<PathBuf>,
}

fn enumerate_sources(input_root: &Path, output_root: &Path) -> Result<Vec<SourceEntry>, BatchError> {
    let (root, mut paths) = if input_root.is_file() {
        let root = input_root.parent().unwrap_or(input_root);
        (root, vec![input_root.to_path_buf()])
    } else {
        let listing = source_files(input_root)?;
        if listing.displaced_images > 0 {
            tracing::warn!(
                indices = listing.sources.len(),
                images = listing.displaced_images,
                "Only .nd indices are processed; plain images in the input are skipped"
            );
        }
        (input_root, listing.sources)
    };

    // Crops of an earlier run written inside the input tree are not sources
    if output_root != root && output_root.starts_with(root) {
        let before = paths.len();
        paths.retain(|path| !path.starts_with(output_root));
        if paths.len() < before {
            tracing::info!(
                skipped = before - paths.len(),
                output = %output_root.display(),
                "Skipping files inside the output directory"
            );
        }
    }

    let relatives: Vec<PathBuf> = paths
        .iter()
        .map(|path| path.strip_prefix(root).unwrap_or(path.as_path()).to_path_buf())
        .collect();
    let clashes = crop_name_clashes(relatives.iter().map(PathBuf::as_path));

    Ok(paths
        .into_iter()
        .zip(relatives)
        .zip(clashes)
        .map(|((path, relative), clashes_with)| SourceEntry {
            path,
            relative,
            clashes_with,
        })
        .collect())
}

/// Everything a worker needs to process one volume.
struct VolumeJob<'a> {
    autocrop: &'a Autocrop,
    io: &'a dyn VolumeIo,
    ledger: &'a LedgerWriter,
    output_root: &'a Path,
    calibration: Option<&'a Calibration>,
    progress: &'a ProgressCallback,
    total: usize,
}

impl VolumeJob<'_> {
    fn run(&self, source: &SourceEntry, current: usize) -> VolumeStatus {
        match self.process(source, current) {
            Ok(status) => status,
            Err(reason) => {
                tracing::error!(path = %source.path.display(), %reason, "Volume failed");
                VolumeStatus::Failed { reason }
            }
        }
    }

    fn process(&self, source: &SourceEntry, current: usize) -> Result<VolumeStatus, String> {
        if let Some(owner) = &source.clashes_with {
            return Err(format!(
                "crop file names collide with those of '{}'",
                owner.display()
            ));
        }
        let (path, relative) = (source.path.as_path(), source.relative.as_path());

        let volume = self.io.read(path).map_err(|e| e.to_string())?;
        let volume = match self.calibration {
            Some(c) => volume.with_calibration(c.clone()),
            None => volume,
        };

        let mut on_stage = |stage: Stage| {
            if let Some(callback) = self.progress.as_ref() {
                callback(BatchProgress {
                    current,
                    total: self.total,
                    stage,
                    path: relative.to_path_buf(),
                });
            }
        };
        let (detection, crops) = self
            .autocrop
            .process(&volume, relative, &mut on_stage)
            .map_err(|e| e.to_string())?;

        for crop in &crops {
            let out = crop_output_path(self.output_root, relative, crop.index);
            self.io
                .write(&crop.volume, &out)
                .map_err(|e| e.to_string())?;
        }

        // Rows only after every crop is on disk
        let rows: Vec<LedgerRow> = crops.iter().map(|c| c.ledger_row()).collect();
        self.ledger.append(&rows).map_err(|e| e.to_string())?;

        tracing::info!(
            path = %relative.display(),
            threshold = detection.threshold,
            components = detection.components_found,
            kept = detection.kept,
            crops = crops.len(),
            "Volume cropped"
        );
        Ok(VolumeStatus::Cropped {
            threshold: detection.threshold,
            components: detection.components_found,
            kept: detection.kept,
            crops: crops.len(),
        })
    }
}

fn write_report(
    path: &Path,
    config: &Config,
    input_root: &Path,
    output_root: &Path,
    outcomes: &[VolumeOutcome],
) -> Result<(), BatchError> {
    let mut text = config.analysis_header(input_root, output_root);
    text.push_str(REPORT_COLUMNS);
    text.push('\n');
    for outcome in outcomes {
        text.push_str(&outcome.report_line());
        text.push('\n');
    }
    std::fs::write(path, text).map_err(|source| BatchError::Report {
        path: path.to_path_buf(),
        source,
    })
}
