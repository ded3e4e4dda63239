//! Checksum comparison of a produced output tree against a reference tree.
//!
//! Files are matched by file name alone, wherever they sit below each root.
//! Mismatches are collected, never raised; only failing to list a root is an
//! error.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use common::file_utils::{DirectoryError, list_files};
use rayon::prelude::*;
use thiserror::Error;

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Verdict for one file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCheck {
    Match,
    Mismatch { expected: String, produced: String },
    /// In the expected tree only.
    MissingProduced,
    /// In the produced tree only.
    Unexpected,
    /// One of the two copies could not be read.
    Unreadable { reason: String },
}

impl FileCheck {
    pub fn is_match(&self) -> bool {
        matches!(self, FileCheck::Match)
    }
}

impl fmt::Display for FileCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileCheck::Match => write!(f, "match"),
            FileCheck::Mismatch { expected, produced } => {
                write!(f, "mismatch (expected {expected}, produced {produced})")
            }
            FileCheck::MissingProduced => write!(f, "missing from produced output"),
            FileCheck::Unexpected => write!(f, "not in expected output"),
            FileCheck::Unreadable { reason } => write!(f, "unreadable: {reason}"),
        }
    }
}

/// Per-file-name verdicts, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub files: BTreeMap<String, FileCheck>,
}

impl VerificationReport {
    pub fn matched(&self) -> usize {
        self.files.values().filter(|c| c.is_match()).count()
    }

    pub fn problems(&self) -> impl Iterator<Item = (&String, &FileCheck)> {
        self.files.iter().filter(|(_, c)| !c.is_match())
    }

    pub fn is_clean(&self) -> bool {
        self.files.values().all(FileCheck::is_match)
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, check) in &self.files {
            writeln!(f, "{name}\t{check}")?;
        }
        write!(f, "{}/{} files match", self.matched(), self.files.len())
    }
}

/// Lowercase hex MD5 of a file's contents, streamed.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Every file below `root` keyed by file name, with its checksum.
fn hash_tree(root: &Path) -> Result<BTreeMap<String, Result<String, String>>, VerifyError> {
    let mut by_name: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in list_files(root)? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if let Some(first) = by_name.get(&name) {
            tracing::warn!(
                name,
                kept = %first.display(),
                ignored = %path.display(),
                "Duplicate file name in tree"
            );
            continue;
        }
        by_name.insert(name, path);
    }

    Ok(by_name
        .into_par_iter()
        .map(|(name, path)| {
            let digest =
                md5_file(&path).map_err(|e| format!("{}: {e}", path.display()));
            (name, digest)
        })
        .collect())
}

/// Compare the trees below `expected_root` and `produced_root`.
pub fn verify_outputs(
    expected_root: &Path,
    produced_root: &Path,
) -> Result<VerificationReport, VerifyError> {
    let mut expected = hash_tree(expected_root)?;
    let produced = hash_tree(produced_root)?;

    let mut report = VerificationReport::default();
    for (name, produced_digest) in produced {
        let check = match expected.remove(&name) {
            None => FileCheck::Unexpected,
            Some(expected_digest) => match (expected_digest, produced_digest) {
                (Ok(e), Ok(p)) if e == p => FileCheck::Match,
                (Ok(expected), Ok(produced)) => FileCheck::Mismatch { expected, produced },
                (Err(reason), _) | (_, Err(reason)) => FileCheck::Unreadable { reason },
            },
        };
        report.files.insert(name, check);
    }
    for name in expected.into_keys() {
        report.files.insert(name, FileCheck::MissingProduced);
    }

    tracing::info!(
        expected = %expected_root.display(),
        produced = %produced_root.display(),
        files = report.files.len(),
        matched = report.matched(),
        "Verified outputs"
    );
    Ok(report)
}
