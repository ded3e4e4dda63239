//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::math::Box3;
use crate::volume::{BitDepth, Volume, VolumeDimensions, VolumeIo, VolumeIoError};

/// Initialize tracing for tests. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// 100×100×50 single-channel 16-bit volume, background 5, with two 10³ cubes
/// of intensity 200 with their lowest corners at (20, 20, 20) and (70, 70, 20).
pub fn two_cube_volume() -> Volume {
    let mut volume = Volume::new_filled(
        VolumeDimensions::new(100, 100, 50, 1),
        BitDepth::Sixteen,
        5,
    );
    volume.fill_box(&Box3::new(20, 29, 20, 29, 20, 29), 0, 200);
    volume.fill_box(&Box3::new(70, 79, 70, 79, 20, 29), 0, 200);
    volume
}

/// Same stack as [`two_cube_volume`] with the cubes centered on (20, 20, 20)
/// and (70, 70, 20), i.e. covering voxels 15..=24 and 65..=74.
pub fn centered_two_cube_volume() -> Volume {
    let mut volume = Volume::new_filled(
        VolumeDimensions::new(100, 100, 50, 1),
        BitDepth::Sixteen,
        5,
    );
    volume.fill_box(&Box3::new(15, 24, 15, 24, 15, 24), 0, 200);
    volume.fill_box(&Box3::new(65, 74, 65, 74, 15, 24), 0, 200);
    volume
}

/// [`VolumeIo`] backed by a map. Missing paths read as `NotFound`.
#[derive(Debug, Default)]
pub struct MemoryVolumeIo {
    volumes: Mutex<HashMap<PathBuf, Volume>>,
}

impl MemoryVolumeIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, volume: Volume) {
        self.volumes.lock().insert(path.into(), volume);
    }

    pub fn get(&self, path: &Path) -> Option<Volume> {
        self.volumes.lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.volumes.lock().len()
    }
}

impl VolumeIo for MemoryVolumeIo {
    fn read(&self, path: &Path) -> Result<Volume, VolumeIoError> {
        self.get(path).ok_or_else(|| VolumeIoError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such volume"),
        })
    }

    fn write(&self, volume: &Volume, path: &Path) -> Result<(), VolumeIoError> {
        self.insert(path, volume.clone());
        Ok(())
    }
}
