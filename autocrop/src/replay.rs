//! Re-cropping from a ledger without running detection.
//!
//! Stored bounds are already padded and clamped, so they are cropped as-is.
//! Each distinct source is read once; rows that cannot be replayed are
//! reported and skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;

use crate::crop::{crop_name_clashes, crop_output_path, escapes_output_root};
use crate::ledger::{Ledger, LedgerError, LedgerRow};
use crate::math::Box3;
use crate::volume::{Calibration, Volume, VolumeDimensions, VolumeIo, VolumeIoError};

/// Why a single ledger row was skipped.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Source '{path}' does not exist")]
    MissingSource { path: PathBuf },

    #[error("Failed to read source '{path}': {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Stored bounds {bounds:?} are outside the source extents {dimensions}")]
    OutOfBounds {
        bounds: Box3,
        dimensions: VolumeDimensions,
    },

    #[error("Source '{path}' would place crops outside the output directory")]
    EscapesOutput { path: PathBuf },

    #[error("Crop file names of '{path}' collide with those of '{other}'")]
    NameClash { path: PathBuf, other: PathBuf },

    #[error("Failed to write crop: {0}")]
    Write(#[source] VolumeIoError),
}

#[derive(Debug)]
pub struct RowFailure {
    pub row: LedgerRow,
    pub error: ReplayError,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Written crops, in ledger order.
    pub written: Vec<PathBuf>,
    pub failures: Vec<RowFailure>,
}

/// Replay every row of the ledger at `ledger_path`.
///
/// Relative sources resolve against `base_dir`. A malformed ledger fails as a
/// whole before any crop is written.
pub fn replay_ledger(
    ledger_path: &Path,
    base_dir: &Path,
    output_root: &Path,
    io: &dyn VolumeIo,
    calibration_override: Option<&Calibration>,
) -> Result<ReplayReport, LedgerError> {
    let ledger = Ledger::read(ledger_path)?;
    tracing::info!(
        ledger = %ledger_path.display(),
        rows = ledger.len(),
        "Replaying ledger"
    );
    Ok(replay_rows(
        ledger.rows(),
        base_dir,
        output_root,
        io,
        calibration_override,
    ))
}

/// Replay already-loaded rows.
pub fn replay_rows(
    rows: &[LedgerRow],
    base_dir: &Path,
    output_root: &Path,
    io: &dyn VolumeIo,
    calibration_override: Option<&Calibration>,
) -> ReplayReport {
    // Group by source, in order of first appearance
    let mut group_of: HashMap<&Path, usize> = HashMap::new();
    let mut groups: Vec<Vec<(usize, &LedgerRow)>> = Vec::new();
    for (position, row) in rows.iter().enumerate() {
        let idx = *group_of.entry(row.source.as_path()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[idx].push((position, row));
    }

    let clashes = crop_name_clashes(groups.iter().map(|g| g[0].1.source.as_path()));
    let target = ReplayTarget {
        base_dir,
        output_root,
        io,
        calibration_override,
    };

    let mut outcomes: Vec<(usize, &LedgerRow, Result<PathBuf, ReplayError>)> = groups
        .par_iter()
        .zip(&clashes)
        .map(|(group, clash)| target.replay_source(group, clash.as_deref()))
        .flatten()
        .collect();
    outcomes.sort_unstable_by_key(|(position, _, _)| *position);

    let mut report = ReplayReport::default();
    for (_, row, outcome) in outcomes {
        match outcome {
            Ok(path) => report.written.push(path),
            Err(error) => {
                tracing::warn!(
                    source = %row.source.display(),
                    index = row.index,
                    %error,
                    "Skipping ledger row"
                );
                report.failures.push(RowFailure {
                    row: row.clone(),
                    error,
                });
            }
        }
    }

    tracing::info!(
        written = report.written.len(),
        failed = report.failures.len(),
        "Replay finished"
    );
    report
}

fn resolve_source(base_dir: &Path, source: &Path) -> PathBuf {
    if source.is_absolute() {
        source.to_path_buf()
    } else {
        base_dir.join(source)
    }
}

struct ReplayTarget<'a> {
    base_dir: &'a Path,
    output_root: &'a Path,
    io: &'a dyn VolumeIo,
    calibration_override: Option<&'a Calibration>,
}

impl ReplayTarget<'_> {
    /// Rows of one source; the source is read once for all of them.
    fn replay_source<'r>(
        &self,
        rows: &[(usize, &'r LedgerRow)],
        clash: Option<&Path>,
    ) -> Vec<(usize, &'r LedgerRow, Result<PathBuf, ReplayError>)> {
        let stored = rows[0].1.source.as_path();
        let path = resolve_source(self.base_dir, stored);
        let source = if escapes_output_root(stored) {
            Source::Escapes
        } else if let Some(other) = clash {
            Source::Clash(other.to_path_buf())
        } else {
            self.load(&path)
        };

        rows.iter()
            .map(|&(position, row)| {
                let outcome = match &source {
                    Source::Escapes => Err(ReplayError::EscapesOutput {
                        path: row.source.clone(),
                    }),
                    Source::Clash(other) => Err(ReplayError::NameClash {
                        path: row.source.clone(),
                        other: other.clone(),
                    }),
                    Source::Missing => Err(ReplayError::MissingSource { path: path.clone() }),
                    Source::Unreadable(reason) => Err(ReplayError::Read {
                        path: path.clone(),
                        reason: reason.clone(),
                    }),
                    Source::Loaded(volume) => crop_row(volume, row, self.output_root, self.io),
                };
                (position, row, outcome)
            })
            .collect()
    }

    fn load(&self, path: &Path) -> Source {
        match self.io.read(path) {
            Ok(volume) => Source::Loaded(match self.calibration_override {
                Some(c) => volume.with_calibration(c.clone()),
                None => volume,
            }),
            Err(VolumeIoError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Source::Missing
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read source");
                Source::Unreadable(e.to_string())
            }
        }
    }
}

enum Source {
    Escapes,
    Clash(PathBuf),
    Missing,
    Unreadable(String),
    Loaded(Volume),
}

fn crop_row(
    volume: &Volume,
    row: &LedgerRow,
    output_root: &Path,
    io: &dyn VolumeIo,
) -> Result<PathBuf, ReplayError> {
    let dims = volume.dimensions();
    if dims.is_empty() || !dims.bounds().contains_box(&row.bounds) {
        return Err(ReplayError::OutOfBounds {
            bounds: row.bounds,
            dimensions: dims,
        });
    }
    let out = crop_output_path(output_root, &row.source, row.index);
    io.write(&volume.crop(&row.bounds), &out)
        .map_err(ReplayError::Write)?;
    tracing::debug!(path = %out.display(), bounds = ?row.bounds, "Replayed crop");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryVolumeIo, init_tracing, two_cube_volume};
    use crate::volume::TiffVolumeIo;

    fn row(source: &str, index: usize, bounds: Box3) -> LedgerRow {
        LedgerRow {
            source: PathBuf::from(source),
            index,
            bounds,
        }
    }

    #[test]
    fn test_rows_are_cropped_without_margin() {
        init_tracing();
        let io = MemoryVolumeIo::new();
        io.insert("in/exp/cubes.tif", two_cube_volume());

        let rows = vec![
            row("exp/cubes.tif", 0, Box3::new(15, 34, 15, 34, 18, 31)),
            row("exp/cubes.tif", 1, Box3::new(65, 84, 65, 84, 18, 31)),
        ];
        let report = replay_rows(&rows, Path::new("in"), Path::new("out"), &io, None);

        assert!(report.failures.is_empty());
        assert_eq!(
            report.written,
            vec![
                PathBuf::from("out/exp/cubes_0.tif"),
                PathBuf::from("out/exp/cubes_1.tif"),
            ]
        );
        let crop = io.get(Path::new("out/exp/cubes_1.tif")).unwrap();
        assert_eq!(crop.dimensions().xyz(), (20, 20, 14));
        assert_eq!(crop.get(5, 5, 2, 0), Some(200));
        assert_eq!(crop.get(0, 0, 0, 0), Some(5));
    }

    #[test]
    fn test_failures_do_not_stop_replay() {
        let io = MemoryVolumeIo::new();
        io.insert("in/a.tif", two_cube_volume());

        let rows = vec![
            row("gone.tif", 0, Box3::new(0, 1, 0, 1, 0, 1)),
            row("a.tif", 0, Box3::new(90, 100, 0, 9, 0, 9)),
            row("a.tif", 1, Box3::new(0, 9, 0, 9, 0, 9)),
            row("gone.tif", 1, Box3::new(0, 1, 0, 1, 0, 1)),
        ];
        let report = replay_rows(&rows, Path::new("in"), Path::new("out"), &io, None);

        assert_eq!(report.written, vec![PathBuf::from("out/a_1.tif")]);
        assert_eq!(report.failures.len(), 3);
        // Failures keep ledger order
        assert!(matches!(
            report.failures[0].error,
            ReplayError::MissingSource { .. }
        ));
        assert!(matches!(
            report.failures[1].error,
            ReplayError::OutOfBounds { .. }
        ));
        assert_eq!(report.failures[2].row.source, PathBuf::from("gone.tif"));
        assert_eq!(report.failures[2].row.index, 1);
    }

    #[test]
    fn test_calibration_override_is_applied() {
        let io = MemoryVolumeIo::new();
        io.insert("in/a.tif", two_cube_volume());
        let calibration = Calibration::new(0.1, 0.1, 0.3, "µm");

        let rows = vec![row("a.tif", 0, Box3::new(0, 9, 0, 9, 0, 9))];
        let report = replay_rows(
            &rows,
            Path::new("in"),
            Path::new("out"),
            &io,
            Some(&calibration),
        );

        assert_eq!(report.written.len(), 1);
        let crop = io.get(Path::new("out/a_0.tif")).unwrap();
        assert_eq!(crop.calibration(), &calibration);
    }

    #[test]
    fn test_replay_ledger_is_byte_identical_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        let io = TiffVolumeIo;
        io.write(&two_cube_volume(), &input.join("cubes.tif")).unwrap();

        let ledger_path = dir.path().join("coordinates.tsv");
        Ledger::new(vec![
            row("cubes.tif", 0, Box3::new(15, 34, 15, 34, 18, 31)),
            row("cubes.tif", 1, Box3::new(65, 84, 65, 84, 18, 31)),
        ])
        .write(&ledger_path)
        .unwrap();

        let first = dir.path().join("first");
        let second = dir.path().join("second");
        for out in [&first, &second] {
            let report = replay_ledger(&ledger_path, &input, out, &io, None).unwrap();
            assert_eq!(report.written.len(), 2);
            assert!(report.failures.is_empty());
        }

        for name in ["cubes_0.tif", "cubes_1.tif"] {
            let a = std::fs::read(first.join(name)).unwrap();
            let b = std::fs::read(second.join(name)).unwrap();
            assert_eq!(a, b, "{name} differs between replays");
        }
        let crop = io.read(&first.join("cubes_0.tif")).unwrap();
        assert_eq!(crop.dimensions().xyz(), (20, 20, 14));
    }

    #[test]
    fn test_malformed_ledger_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("coordinates.tsv");
        std::fs::write(&ledger_path, "a.tif\t0\t1\t2\n").unwrap();

        let io = MemoryVolumeIo::new();
        let err = replay_ledger(&ledger_path, dir.path(), dir.path(), &io, None).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { line: 1, .. }));
        assert_eq!(io.len(), 0);
    }

    #[test]
    fn test_sources_outside_output_root_are_rejected() {
        let io = MemoryVolumeIo::new();
        io.insert("in/../secret/a.tif", two_cube_volume());
        io.insert("in/a.tif", two_cube_volume());

        let rows = vec![
            row("../secret/a.tif", 0, Box3::new(0, 9, 0, 9, 0, 9)),
            row("a.tif", 0, Box3::new(0, 9, 0, 9, 0, 9)),
        ];
        let report = replay_rows(&rows, Path::new("in"), Path::new("out"), &io, None);

        assert_eq!(report.written, vec![PathBuf::from("out/a_0.tif")]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            ReplayError::EscapesOutput { .. }
        ));
        assert!(io.get(Path::new("out/../secret/a_0.tif")).is_none());
    }

    #[test]
    fn test_same_stem_sources_are_not_overwritten() {
        let io = MemoryVolumeIo::new();
        io.insert("in/cells.tif", two_cube_volume());
        io.insert("in/cells.tiff", two_cube_volume());

        let rows = vec![
            row("cells.tif", 0, Box3::new(15, 34, 15, 34, 18, 31)),
            row("cells.tiff", 0, Box3::new(65, 84, 65, 84, 18, 31)),
        ];
        let report = replay_rows(&rows, Path::new("in"), Path::new("out"), &io, None);

        assert_eq!(report.written, vec![PathBuf::from("out/cells_0.tif")]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            ReplayError::NameClash { .. }
        ));
        let crop = io.get(Path::new("out/cells_0.tif")).unwrap();
        assert_eq!(crop.get(10, 10, 5, 0), Some(200));
    }
}
