//! Per-volume detection and cropping.
//!
//! ```text
//! Idle → Thresholding → Labeling → Filtering → Consolidating → Cropping → Done
//! ```
//!
//! Every stage is a pure function of the volume and the configuration; the
//! only side effect of a pass is the returned crops.

use std::path::Path;

use strum_macros::Display;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::crop::{CropResult, Margins, crop_boxes};
use crate::detection::{
    BitBuffer3, OverlapRule, ThresholdParams, VolumeRange, compute_threshold, consolidate,
    extract_components,
};
use crate::math::Box3;
use crate::volume::Volume;

/// Errors that abort the processing of one volume.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Threshold channel {channel} out of range: volume has {channels} channel(s)")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("Volume is empty")]
    EmptyVolume,
}

/// Stage of a volume pass, reported through progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum Stage {
    #[default]
    Idle,
    Thresholding,
    Labeling,
    Filtering,
    Consolidating,
    Cropping,
    Done,
}

/// Outcome of detection on one volume, before cropping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub threshold: u16,
    /// All components, boundary-touching ones included.
    pub components_found: usize,
    pub discarded_at_boundary: usize,
    /// Components inside the volume range.
    pub kept: usize,
    /// Consolidated boxes, one per nucleus, before padding.
    pub boxes: Vec<Box3>,
}

/// Detection and cropping with a fixed, validated parameter set.
#[derive(Debug, Clone)]
pub struct Autocrop {
    threshold: ThresholdParams,
    volume_range: VolumeRange,
    overlap: Option<OverlapRule>,
    margins: Margins,
}

impl Autocrop {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            threshold: config.threshold_params(),
            volume_range: config.volume_range(),
            overlap: config.overlap_rule(),
            margins: config.margins(),
        })
    }

    pub fn margins(&self) -> &Margins {
        &self.margins
    }

    /// Threshold, label, filter and consolidate.
    pub fn detect(
        &self,
        volume: &Volume,
        on_stage: &mut dyn FnMut(Stage),
    ) -> Result<Detection, PipelineError> {
        if volume.dimensions().is_empty() {
            return Err(PipelineError::EmptyVolume);
        }

        on_stage(Stage::Thresholding);
        let threshold = compute_threshold(volume, &self.threshold)?;
        let mask = BitBuffer3::from_threshold(volume, self.threshold.channel, threshold);

        on_stage(Stage::Labeling);
        let labeling = extract_components(&mask);
        let components_found = labeling.components.len() + labeling.discarded_at_boundary;

        on_stage(Stage::Filtering);
        let kept = self.volume_range.retain(labeling.components);
        let boxes: Vec<Box3> = kept.iter().map(|c| c.bbox).collect();

        on_stage(Stage::Consolidating);
        let boxes = match &self.overlap {
            Some(rule) => consolidate(&boxes, rule),
            None => boxes,
        };

        tracing::debug!(
            threshold,
            foreground = mask.count_ones(),
            components_found,
            discarded_at_boundary = labeling.discarded_at_boundary,
            kept = kept.len(),
            boxes = boxes.len(),
            "Detection finished"
        );

        Ok(Detection {
            threshold,
            components_found,
            discarded_at_boundary: labeling.discarded_at_boundary,
            kept: kept.len(),
            boxes,
        })
    }

    /// Pad and extract every detected box.
    pub fn crop(&self, volume: &Volume, source: &Path, detection: &Detection) -> Vec<CropResult> {
        crop_boxes(volume, source, &detection.boxes, &self.margins)
    }

    /// Full pass over one volume. `source` is the identity recorded in the
    /// crops' ledger rows.
    pub fn process(
        &self,
        volume: &Volume,
        source: &Path,
        on_stage: &mut dyn FnMut(Stage),
    ) -> Result<(Detection, Vec<CropResult>), PipelineError> {
        on_stage(Stage::Idle);
        let detection = self.detect(volume, on_stage)?;
        on_stage(Stage::Cropping);
        let crops = self.crop(volume, source, &detection);
        on_stage(Stage::Done);
        Ok((detection, crops))
    }
}
