//! Multi-channel 3D image stacks.
//!
//! A [`Volume`] stores `u16` samples in channel-major order: every channel is a
//! contiguous block of `depth` planes, every plane a contiguous block of rows.
//! Sources with 8-bit samples are widened on load and narrowed again on write,
//! so the original bit depth is carried in [`BitDepth`].

mod io;
mod tiff_io;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::Box3;

pub use self::io::{VolumeIo, VolumeIoError};
pub use self::tiff_io::TiffVolumeIo;

/// Integer extents of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeDimensions {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub channels: usize,
}

impl VolumeDimensions {
    pub const fn new(width: usize, height: usize, depth: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            depth,
            channels,
        }
    }

    /// Voxels per channel.
    #[inline]
    pub const fn voxels_per_channel(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Samples across all channels.
    #[inline]
    pub const fn sample_count(&self) -> usize {
        self.voxels_per_channel() * self.channels
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Box covering every voxel. Must not be called on an empty volume.
    #[inline]
    pub const fn bounds(&self) -> Box3 {
        Box3::covering(self.width, self.height, self.depth)
    }

    #[inline]
    pub const fn xyz(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }
}

impl fmt::Display for VolumeDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} ({} channel{})",
            self.width,
            self.height,
            self.depth,
            self.channels,
            if self.channels == 1 { "" } else { "s" }
        )
    }
}

/// Physical size of one voxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub unit: String,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.0,
            unit: "pixel".to_string(),
        }
    }
}

impl Calibration {
    pub fn new(x: f64, y: f64, z: f64, unit: impl Into<String>) -> Self {
        Self {
            x,
            y,
            z,
            unit: unit.into(),
        }
    }
}

/// Sample width of the source stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitDepth {
    Eight,
    #[default]
    Sixteen,
}

impl BitDepth {
    pub const fn max_value(&self) -> u16 {
        match self {
            BitDepth::Eight => u8::MAX as u16,
            BitDepth::Sixteen => u16::MAX,
        }
    }
}

/// A 4D grid of intensity samples (x, y, z, channel).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    dimensions: VolumeDimensions,
    calibration: Calibration,
    bit_depth: BitDepth,
    samples: Vec<u16>,
}

impl Volume {
    pub fn new(
        dimensions: VolumeDimensions,
        calibration: Calibration,
        bit_depth: BitDepth,
        samples: Vec<u16>,
    ) -> Self {
        assert_eq!(
            samples.len(),
            dimensions.sample_count(),
            "samples length must equal width * height * depth * channels"
        );
        debug_assert!(
            samples.iter().all(|&v| v <= bit_depth.max_value()),
            "sample exceeds bit depth"
        );
        Self {
            dimensions,
            calibration,
            bit_depth,
            samples,
        }
    }

    /// A volume with every sample set to `value`.
    pub fn new_filled(dimensions: VolumeDimensions, bit_depth: BitDepth, value: u16) -> Self {
        Self::new(
            dimensions,
            Calibration::default(),
            bit_depth,
            vec![value; dimensions.sample_count()],
        )
    }

    #[inline]
    pub fn dimensions(&self) -> VolumeDimensions {
        self.dimensions
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.dimensions.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.dimensions.height
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.dimensions.depth
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.dimensions.channels
    }

    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    #[inline]
    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    #[inline]
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Replace the calibration, keeping the samples.
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize, channel: usize) -> usize {
        let d = &self.dimensions;
        ((channel * d.depth + z) * d.height + y) * d.width + x
    }

    /// Sample at (x, y, z, channel), or `None` outside the volume.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize, channel: usize) -> Option<u16> {
        let d = &self.dimensions;
        if x >= d.width || y >= d.height || z >= d.depth || channel >= d.channels {
            return None;
        }
        Some(self.samples[self.index(x, y, z, channel)])
    }

    /// Set the sample at (x, y, z, channel). Panics outside the volume.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, channel: usize, value: u16) {
        let d = &self.dimensions;
        assert!(
            x < d.width && y < d.height && z < d.depth && channel < d.channels,
            "voxel ({x}, {y}, {z}, c{channel}) outside {d}"
        );
        let idx = self.index(x, y, z, channel);
        self.samples[idx] = value;
    }

    /// Set every voxel of `bbox` in `channel` to `value`.
    pub fn fill_box(&mut self, bbox: &Box3, channel: usize, value: u16) {
        assert!(
            self.dimensions.bounds().contains_box(bbox),
            "{bbox:?} outside {}",
            self.dimensions
        );
        for z in bbox.z_min..=bbox.z_max {
            for y in bbox.y_min..=bbox.y_max {
                let start = self.index(bbox.x_min, y, z, channel);
                self.samples[start..start + bbox.width()].fill(value);
            }
        }
    }

    /// One z-plane of one channel, row after row.
    #[inline]
    pub fn plane(&self, channel: usize, z: usize) -> &[u16] {
        let len = self.dimensions.width * self.dimensions.height;
        let start = self.index(0, 0, z, channel);
        &self.samples[start..start + len]
    }

    /// Copy out the sub-volume covered by `bbox`, across all channels.
    ///
    /// Calibration and bit depth are preserved. Panics if `bbox` is not inside
    /// the volume.
    pub fn crop(&self, bbox: &Box3) -> Volume {
        assert!(
            !self.dimensions.is_empty() && self.dimensions.bounds().contains_box(bbox),
            "crop {bbox:?} outside {}",
            self.dimensions
        );

        let dimensions = VolumeDimensions::new(
            bbox.width(),
            bbox.height(),
            bbox.depth(),
            self.dimensions.channels,
        );
        let mut samples = Vec::with_capacity(dimensions.sample_count());
        for channel in 0..self.dimensions.channels {
            for z in bbox.z_min..=bbox.z_max {
                for y in bbox.y_min..=bbox.y_max {
                    let start = self.index(bbox.x_min, y, z, channel);
                    samples.extend_from_slice(&self.samples[start..start + bbox.width()]);
                }
            }
        }

        Volume::new(
            dimensions,
            self.calibration.clone(),
            self.bit_depth,
            samples,
        )
    }
}
