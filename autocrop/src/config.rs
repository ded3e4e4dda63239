//! Configuration for a batch run.
//!
//! [`Config`] is a single flat struct with every parameter grouped by pipeline
//! stage. It loads from a Java-style property file using the historic key
//! names (`xCropBoxSize=40`, `boxesRegroupement=true`, ...) or from YAML with
//! the field names below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crop::Margins;
use crate::detection::{
    DEFAULT_OTSU_FLOOR, OverlapBasis, OverlapRule, ThresholdParams, VolumeRange,
};
use crate::volume::Calibration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value '{value}' for '{key}': {reason}")]
    Parse {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse YAML config '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Parameters for detection, cropping and batch execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -- Crop margins --
    /// Voxels added on both sides of a box along x.
    pub x_margin: usize,
    pub y_margin: usize,
    pub z_margin: usize,

    // -- Component filtering --
    /// Inclusive voxel-count range of a kept component.
    pub min_volume: u64,
    pub max_volume: u64,

    // -- Thresholding --
    /// Lowest Otsu threshold used.
    pub otsu_floor: u16,
    pub threshold_channel: usize,
    /// First slice included in the threshold histogram.
    pub otsu_start_slice: usize,

    // -- Box consolidation --
    pub box_merge_enabled: bool,
    /// Required projected overlap, 0-100.
    pub box_merge_overlap_percent: u8,
    pub overlap_basis: OverlapBasis,

    // -- Calibration --
    /// Override the calibration read from each stack.
    pub manual_calibration: bool,
    pub x_calibration: f64,
    pub y_calibration: f64,
    pub z_calibration: f64,
    pub calibration_unit: String,

    // -- Batch --
    /// Volumes processed concurrently.
    pub max_concurrent_volumes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Crop margins
            x_margin: 40,
            y_margin: 40,
            z_margin: 20,

            // Component filtering
            min_volume: 1,
            max_volume: i32::MAX as u64,

            // Thresholding
            otsu_floor: DEFAULT_OTSU_FLOOR,
            threshold_channel: 0,
            otsu_start_slice: 0,

            // Box consolidation
            box_merge_enabled: true,
            box_merge_overlap_percent: 50,
            overlap_basis: OverlapBasis::Smaller,

            // Calibration
            manual_calibration: false,
            x_calibration: 1.0,
            y_calibration: 1.0,
            z_calibration: 1.0,
            calibration_unit: "pixel".to_string(),

            // Batch
            max_concurrent_volumes: 4,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Parse {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::Parse {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Split a property-file line into key and value.
///
/// The key ends at the first unescaped `=`, `:` or whitespace; whitespace
/// around the separator is ignored.
fn split_property(line: &str) -> (&str, &str) {
    let key_end = line
        .find(|c: char| c == '=' || c == ':' || c.is_whitespace())
        .unwrap_or(line.len());
    let key = &line[..key_end];
    let rest = line[key_end..].trim_start();
    let value = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(':'))
        .unwrap_or(rest);
    (key, value.trim())
}

impl Config {
    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_volume > self.max_volume {
            return Err(ConfigError::Invalid(format!(
                "min_volume ({}) must be <= max_volume ({})",
                self.min_volume, self.max_volume
            )));
        }
        if self.box_merge_overlap_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "box_merge_overlap_percent must be <= 100, got {}",
                self.box_merge_overlap_percent
            )));
        }
        for (name, value) in [
            ("x_calibration", self.x_calibration),
            ("y_calibration", self.y_calibration),
            ("z_calibration", self.z_calibration),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.max_concurrent_volumes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_volumes must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from `path`: YAML for `.yaml`/`.yml`, property file otherwise.
    /// The result is validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        let config = if is_yaml {
            serde_yml::from_str::<Self>(&text).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::from_properties_str(&text)?
        };

        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse a property file over the defaults. Unknown keys are logged and
    /// ignored. Not validated.
    pub fn from_properties_str(text: &str) -> Result<Self, ConfigError> {
        let mut properties: HashMap<&str, &str> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = split_property(line);
            if properties.insert(key, value).is_none() {
                order.push(key);
            }
        }

        let mut config = Self::default();
        for key in order {
            let value = properties[key];
            match key {
                "xCropBoxSize" => config.x_margin = parse_value(key, value)?,
                "yCropBoxSize" => config.y_margin = parse_value(key, value)?,
                "zCropBoxSize" => config.z_margin = parse_value(key, value)?,
                "minVolumeNucleus" => config.min_volume = parse_value(key, value)?,
                "maxVolumeNucleus" => config.max_volume = parse_value(key, value)?,
                "thresholdOTSUcomputing" => config.otsu_floor = parse_value(key, value)?,
                "channelToComputeThreshold" => {
                    config.threshold_channel = parse_value(key, value)?
                }
                "slicesOTSUcomputing" => config.otsu_start_slice = parse_value(key, value)?,
                "boxesRegroupement" => config.box_merge_enabled = parse_bool(key, value)?,
                "boxesPercentSurfaceToFilter" => {
                    config.box_merge_overlap_percent = parse_value(key, value)?
                }
                "boxesOverlapBasis" => config.overlap_basis = parse_value(key, value)?,
                "xCal" => {
                    config.x_calibration = parse_value(key, value)?;
                    config.manual_calibration = true;
                }
                "yCal" => {
                    config.y_calibration = parse_value(key, value)?;
                    config.manual_calibration = true;
                }
                "zCal" => {
                    config.z_calibration = parse_value(key, value)?;
                    config.manual_calibration = true;
                }
                "calibrationUnit" => config.calibration_unit = value.to_string(),
                "maxConcurrentVolumes" => {
                    config.max_concurrent_volumes = parse_value(key, value)?
                }
                _ => tracing::warn!(key, "Ignoring unknown configuration key"),
            }
        }
        Ok(config)
    }

    pub fn threshold_params(&self) -> ThresholdParams {
        ThresholdParams {
            channel: self.threshold_channel,
            start_slice: self.otsu_start_slice,
            floor: self.otsu_floor,
        }
    }

    pub fn volume_range(&self) -> VolumeRange {
        VolumeRange::new(self.min_volume, self.max_volume)
    }

    /// `None` when box merging is disabled.
    pub fn overlap_rule(&self) -> Option<OverlapRule> {
        self.box_merge_enabled
            .then(|| OverlapRule::new(self.box_merge_overlap_percent, self.overlap_basis))
    }

    pub fn margins(&self) -> Margins {
        Margins::new(self.x_margin, self.y_margin, self.z_margin)
    }

    /// Calibration forced onto every volume, if any.
    pub fn calibration_override(&self) -> Option<Calibration> {
        self.manual_calibration.then(|| {
            Calibration::new(
                self.x_calibration,
                self.y_calibration,
                self.z_calibration,
                self.calibration_unit.clone(),
            )
        })
    }

    /// `#key: value` lines describing the run, written at the top of reports.
    pub fn analysis_header(&self, input: &Path, output: &Path) -> String {
        let mut header = format!(
            "#Input folder: {}\n#Output folder: {}\n",
            input.display(),
            output.display()
        );
        if self.manual_calibration {
            header.push_str(&format!(
                "#Calibration: {}x{}x{} {}\n",
                self.x_calibration, self.y_calibration, self.z_calibration, self.calibration_unit
            ));
        } else {
            header.push_str("#Calibration: from image metadata\n");
        }
        header.push_str(&format!(
            "#X box size: {}\n\
             #Y box size: {}\n\
             #Z box size: {}\n\
             #thresholdOTSUcomputing: {}\n\
             #slicesOTSUcomputing: {}\n\
             #channelToComputeThreshold: {}\n\
             #maxVolumeNucleus: {}\n\
             #minVolumeNucleus: {}\n\
             #boxesRegroupement: {}\n\
             #boxesPercentSurfaceToFilter: {}\n\
             #boxesOverlapBasis: {}\n",
            self.x_margin,
            self.y_margin,
            self.z_margin,
            self.otsu_floor,
            self.otsu_start_slice,
            self.threshold_channel,
            self.max_volume,
            self.min_volume,
            self.box_merge_enabled,
            self.box_merge_overlap_percent,
            self.overlap_basis,
        ));
        header
    }
}
