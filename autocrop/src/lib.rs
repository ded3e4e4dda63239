//! Autocrop - nucleus detection and cropping for 3D microscopy stacks.
//!
//! Each stack is thresholded with Otsu's method, its foreground is split into
//! 6-connected components, components are filtered by voxel count and their
//! bounding boxes merged where they overlap in the xy projection. Every
//! resulting box is padded, clamped and written out as its own stack, and its
//! bounds recorded in a coordinate ledger that can replay the crops later.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use autocrop::{BatchOptions, Config, TiffVolumeIo, run_batch};
//!
//! let config = Config::from_file("autocrop.properties".as_ref())?;
//! let report = run_batch(
//!     "raw".as_ref(),
//!     "crops".as_ref(),
//!     &config,
//!     &TiffVolumeIo,
//!     &BatchOptions::default(),
//! )?;
//! println!("{} nuclei cropped", report.crops_written());
//! ```

pub mod batch;
pub mod config;
pub mod crop;
pub mod detection;
pub mod ledger;
pub(crate) mod math;
pub mod pipeline;
pub mod replay;
pub mod verify;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Volumes
// ============================================================================

pub use math::Box3;
pub use volume::{
    BitDepth, Calibration, TiffVolumeIo, Volume, VolumeDimensions, VolumeIo, VolumeIoError,
};

// ============================================================================
// Configuration and per-volume pipeline
// ============================================================================

pub use config::{Config, ConfigError};
pub use crop::{CropResult, Margins};
pub use detection::{OverlapBasis, OverlapRule, VolumeRange};
pub use pipeline::{Autocrop, Detection, PipelineError, Stage};

// ============================================================================
// Batch, ledger, replay and verification
// ============================================================================

pub use batch::{
    BatchError, BatchOptions, BatchProgress, BatchReport, CancelToken, ProgressCallback,
    VolumeOutcome, VolumeStatus, run_batch,
};
pub use ledger::{Ledger, LedgerError, LedgerRow, LedgerWriter};
pub use replay::{ReplayError, ReplayReport, replay_ledger};
pub use verify::{FileCheck, VerificationReport, VerifyError, verify_outputs};
