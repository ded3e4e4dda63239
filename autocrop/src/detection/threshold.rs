//! Otsu thresholding restricted to one channel and a trailing slice range.

use rayon::prelude::*;

use crate::pipeline::PipelineError;
use crate::volume::Volume;

/// Lowest threshold ever returned.
pub const DEFAULT_OTSU_FLOOR: u16 = 20;

/// Where the histogram is taken from and the lower clamp on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdParams {
    pub channel: usize,
    /// First slice included in the histogram.
    pub start_slice: usize,
    pub floor: u16,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            channel: 0,
            start_slice: 0,
            floor: DEFAULT_OTSU_FLOOR,
        }
    }
}

/// Intensity histogram of `channel` over slices `start_slice..depth`.
///
/// Has one bin per representable value of the volume's bit depth. Planes are
/// counted in parallel and reduced.
pub fn histogram(volume: &Volume, channel: usize, start_slice: usize) -> Vec<u64> {
    let bins = volume.bit_depth().max_value() as usize + 1;
    (start_slice.min(volume.depth())..volume.depth())
        .into_par_iter()
        .fold(
            || vec![0u64; bins],
            |mut hist, z| {
                for &v in volume.plane(channel, z) {
                    hist[v as usize] += 1;
                }
                hist
            },
        )
        .reduce(
            || vec![0u64; bins],
            |mut a, b| {
                a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                a
            },
        )
}

/// Otsu's method on an integer histogram.
///
/// Returns the cutoff `t` maximizing the between-class variance of
/// `{v < t}` vs `{v >= t}`, or `None` when no cutoff splits the histogram into
/// two non-empty classes (empty or single-valued input). Ties keep the lowest
/// cutoff.
pub fn otsu_threshold(histogram: &[u64]) -> Option<u16> {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return None;
    }
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &count)| v as f64 * count as f64)
        .sum();

    let mut weight_below = 0u64;
    let mut sum_below = 0.0f64;
    let mut best: Option<(f64, usize)> = None;

    // Background is 0..=k, so the cutoff is k + 1.
    for (k, &count) in histogram.iter().enumerate() {
        weight_below += count;
        sum_below += k as f64 * count as f64;
        if weight_below == 0 {
            continue;
        }
        let weight_above = total - weight_below;
        if weight_above == 0 {
            break;
        }

        let mean_below = sum_below / weight_below as f64;
        let mean_above = (sum_total - sum_below) / weight_above as f64;
        let variance =
            weight_below as f64 * weight_above as f64 * (mean_below - mean_above).powi(2);

        if best.is_none_or(|(max, _)| variance > max) {
            best = Some((variance, k + 1));
        }
    }

    best.map(|(_, cutoff)| cutoff.min(u16::MAX as usize) as u16)
}

/// Otsu threshold of the configured region, never below `params.floor`.
///
/// An empty region (start slice past the last slice) or a uniform region
/// yields the floor.
pub fn compute_threshold(volume: &Volume, params: &ThresholdParams) -> Result<u16, PipelineError> {
    if params.channel >= volume.channels() {
        return Err(PipelineError::ChannelOutOfRange {
            channel: params.channel,
            channels: volume.channels(),
        });
    }

    let hist = histogram(volume, params.channel, params.start_slice);
    let threshold = match otsu_threshold(&hist) {
        Some(t) => t.max(params.floor),
        None => params.floor,
    };

    tracing::debug!(
        channel = params.channel,
        start_slice = params.start_slice,
        threshold,
        "Computed Otsu threshold"
    );
    Ok(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Box3;
    use crate::volume::{BitDepth, VolumeDimensions};

    fn bimodal_volume() -> Volume {
        let dims = VolumeDimensions::new(20, 20, 10, 2);
        let mut volume = Volume::new_filled(dims, BitDepth::Sixteen, 5);
        volume.fill_box(&Box3::new(5, 14, 5, 14, 2, 7), 0, 200);
        volume
    }

    #[test]
    fn test_otsu_splits_bimodal_histogram() {
        let mut hist = vec![0u64; 256];
        hist[10] = 500;
        hist[200] = 100;
        let t = otsu_threshold(&hist).unwrap();
        assert!(t > 10 && t <= 200, "threshold {t}");
        // First maximum: the cutoff right after the lower mode
        assert_eq!(t, 11);
    }

    #[test]
    fn test_otsu_degenerate_histograms() {
        assert_eq!(otsu_threshold(&[]), None);
        assert_eq!(otsu_threshold(&[0, 0, 0]), None);
        assert_eq!(otsu_threshold(&[0, 42, 0]), None);
    }

    #[test]
    fn test_histogram_respects_channel_and_start_slice() {
        let volume = bimodal_volume();
        let hist = histogram(&volume, 0, 0);
        assert_eq!(hist.len(), 65536);
        assert_eq!(hist[200], 10 * 10 * 6);
        assert_eq!(hist[5], 20 * 20 * 10 - 600);

        // Slices 8 and 9 contain only background
        let hist = histogram(&volume, 0, 8);
        assert_eq!(hist[200], 0);
        assert_eq!(hist[5], 800);

        let hist = histogram(&volume, 1, 0);
        assert_eq!(hist[200], 0);
    }

    #[test]
    fn test_threshold_separates_cube() {
        let volume = bimodal_volume();
        let t = compute_threshold(&volume, &ThresholdParams::default()).unwrap();
        assert!(t > 5 && t <= 200, "threshold {t}");
    }

    #[test]
    fn test_threshold_never_below_floor() {
        let dims = VolumeDimensions::new(8, 8, 4, 1);
        let mut volume = Volume::new_filled(dims, BitDepth::Eight, 1);
        volume.fill_box(&Box3::new(2, 5, 2, 5, 1, 2), 0, 3);

        let params = ThresholdParams::default();
        assert_eq!(compute_threshold(&volume, &params).unwrap(), DEFAULT_OTSU_FLOOR);
    }

    #[test]
    fn test_threshold_empty_or_uniform_region_yields_floor() {
        let volume = bimodal_volume();
        let params = ThresholdParams {
            start_slice: 10,
            floor: 33,
            ..Default::default()
        };
        assert_eq!(compute_threshold(&volume, &params).unwrap(), 33);

        let uniform = Volume::new_filled(VolumeDimensions::new(4, 4, 4, 1), BitDepth::Sixteen, 900);
        assert_eq!(
            compute_threshold(&uniform, &ThresholdParams::default()).unwrap(),
            DEFAULT_OTSU_FLOOR
        );
    }

    #[test]
    fn test_threshold_channel_out_of_range() {
        let volume = bimodal_volume();
        let params = ThresholdParams {
            channel: 2,
            ..Default::default()
        };
        let err = compute_threshold(&volume, &params).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ChannelOutOfRange {
                channel: 2,
                channels: 2
            }
        ));
    }
}
