//! Coordinate ledger: one row per cropped nucleus, enough to replay the crop.
//!
//! Rows are written header-less and tab-delimited:
//!
//! ```text
//! source  index  x_min  x_max  y_min  y_max  z_min  z_max
//! ```
//!
//! The reader also accepts comma-delimited rows and skips blank lines and
//! lines starting with `#`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use crate::math::Box3;

/// File name of the ledger inside a batch output directory.
pub const LEDGER_FILE_NAME: &str = "coordinates.tsv";

const FIELD_COUNT: usize = 8;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to access ledger '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source path '{path}' cannot be stored in a ledger row")]
    InvalidPath { path: PathBuf },

    #[error("Malformed ledger row at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// One crop: its source, its index within that source and its clamped bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerRow {
    pub source: PathBuf,
    pub index: usize,
    pub bounds: Box3,
}

impl LedgerRow {
    /// Tab-delimited line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, LedgerError> {
        let source = self
            .source
            .to_str()
            .filter(|s| !s.is_empty() && !s.contains(['\t', '\n', '\r']))
            .ok_or_else(|| LedgerError::InvalidPath {
                path: self.source.clone(),
            })?;
        let b = &self.bounds;
        Ok(format!(
            "{source}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.index, b.x_min, b.x_max, b.y_min, b.y_max, b.z_min, b.z_max
        ))
    }

    /// Parse a tab- or comma-delimited row. `line` is 1-based, for errors.
    pub fn parse(text: &str, line: usize) -> Result<Self, LedgerError> {
        let malformed = |reason: String| LedgerError::Malformed { line, reason };

        let delimiter = if text.contains('\t') { '\t' } else { ',' };
        let fields: Vec<&str> = text.split(delimiter).map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return Err(malformed(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }
        if fields[0].is_empty() {
            return Err(malformed("empty source path".to_string()));
        }

        let mut numbers = [0usize; FIELD_COUNT - 1];
        for (slot, field) in numbers.iter_mut().zip(&fields[1..]) {
            *slot = field
                .parse()
                .map_err(|_| malformed(format!("'{field}' is not a non-negative integer")))?;
        }

        let [index, x_min, x_max, y_min, y_max, z_min, z_max] = numbers;
        if x_min > x_max || y_min > y_max || z_min > z_max {
            return Err(malformed("minimum bound exceeds maximum".to_string()));
        }

        Ok(Self {
            source: PathBuf::from(fields[0]),
            index,
            bounds: Box3::new(x_min, x_max, y_min, y_max, z_min, z_max),
        })
    }
}

/// A fully loaded ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    rows: Vec<LedgerRow>,
}

impl Ledger {
    pub fn new(rows: Vec<LedgerRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn parse(text: &str) -> Result<Self, LedgerError> {
        let rows = text
            .lines()
            .enumerate()
            .filter(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .map(|(idx, line)| LedgerRow::parse(line, idx + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    pub fn read(path: &Path) -> Result<Self, LedgerError> {
        let text = std::fs::read_to_string(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn write(&self, path: &Path) -> Result<(), LedgerError> {
        let mut text = String::new();
        for row in &self.rows {
            text.push_str(&row.to_line()?);
            text.push('\n');
        }
        std::fs::write(path, text).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Append-only ledger file shared by concurrent volume workers.
///
/// Each [`append`](Self::append) call writes its rows contiguously.
#[derive(Debug)]
pub struct LedgerWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl LedgerWriter {
    /// Create (or truncate) the ledger at `path`.
    pub fn create(path: &Path) -> Result<Self, LedgerError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|source| LedgerError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows and flush. Rows are validated before anything is written.
    pub fn append(&self, rows: &[LedgerRow]) -> Result<(), LedgerError> {
        let mut block = String::new();
        for row in rows {
            block.push_str(&row.to_line()?);
            block.push('\n');
        }

        let mut writer = self.writer.lock();
        let result = match writer.write_all(block.as_bytes()) {
            Ok(()) => writer.flush(),
            Err(e) => Err(e),
        };
        result.map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
