//! Nucleus detection: threshold, mask, label, filter and consolidate.

mod consolidate;
mod filter;
pub mod labeling;
mod mask;
mod threshold;
mod union_find;

pub use consolidate::{OverlapBasis, OverlapRule, consolidate};
pub use filter::VolumeRange;
pub use labeling::{Component, Labeling, VoxelRun, extract_components, label_components};
pub use mask::BitBuffer3;
pub use threshold::{
    DEFAULT_OTSU_FLOOR, ThresholdParams, compute_threshold, histogram, otsu_threshold,
};
