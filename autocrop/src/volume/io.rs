use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Volume;

/// Errors that can occur when reading or writing a volume.
#[derive(Debug, Error)]
pub enum VolumeIoError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode or encode TIFF '{path}': {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Unsupported stack '{path}': {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("Inconsistent stack layout in '{path}': {reason}")]
    Layout { path: PathBuf, reason: String },
}

/// Reads source stacks and writes cropped sub-volumes.
///
/// Implementations must be deterministic on write: the same volume written
/// twice produces byte-identical files.
pub trait VolumeIo: Send + Sync {
    fn read(&self, path: &Path) -> Result<Volume, VolumeIoError>;

    fn write(&self, volume: &Volume, path: &Path) -> Result<(), VolumeIoError>;
}
