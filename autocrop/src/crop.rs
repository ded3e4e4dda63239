//! Margin-padded extraction of detected nuclei.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Component, Path, PathBuf};

use crate::ledger::LedgerRow;
use crate::math::Box3;
use crate::volume::Volume;

/// Extension of every written crop.
pub const CROP_EXTENSION: &str = "tif";

/// Padding added on both sides of a box before cropping, in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Margins {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            x: 40,
            y: 40,
            z: 20,
        }
    }
}

impl Margins {
    pub const NONE: Margins = Margins { x: 0, y: 0, z: 0 };

    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub const fn xyz(&self) -> (usize, usize, usize) {
        (self.x, self.y, self.z)
    }
}

/// One extracted nucleus.
#[derive(Debug, Clone, PartialEq)]
pub struct CropResult {
    /// Source identity as recorded in the ledger.
    pub source: PathBuf,
    pub index: usize,
    /// Clamped bounds in source coordinates.
    pub bounds: Box3,
    pub channels: usize,
    pub volume: Volume,
}

impl CropResult {
    pub fn ledger_row(&self) -> LedgerRow {
        LedgerRow {
            source: self.source.clone(),
            index: self.index,
            bounds: self.bounds,
        }
    }
}

/// `bbox` grown by `margins` and clamped to the volume extents.
#[inline]
pub fn padded_bounds(bbox: &Box3, margins: &Margins, volume: &Volume) -> Box3 {
    bbox.expand_clamped(margins.xyz(), volume.dimensions().xyz())
}

/// Crop every box (in order, indices from 0) after padding it by `margins`.
pub fn crop_boxes(
    volume: &Volume,
    source: &Path,
    boxes: &[Box3],
    margins: &Margins,
) -> Vec<CropResult> {
    boxes
        .iter()
        .enumerate()
        .map(|(index, bbox)| {
            let bounds = padded_bounds(bbox, margins, volume);
            CropResult {
                source: source.to_path_buf(),
                index,
                bounds,
                channels: volume.channels(),
                volume: volume.crop(&bounds),
            }
        })
        .collect()
}

/// Where crop `index` of `source` is written: `<output_root>/<parent>/<stem>_<index>.tif`,
/// with `<parent>` the source's relative parent directory.
pub fn crop_output_path(output_root: &Path, source: &Path, index: usize) -> PathBuf {
    let mut path = crop_output_prefix(output_root, source).into_os_string();
    path.push(format!("_{index}.{CROP_EXTENSION}"));
    PathBuf::from(path)
}

/// [`crop_output_path`] without the `_<index>.tif` suffix. Sources sharing a
/// prefix would write over each other's crops.
pub fn crop_output_prefix(output_root: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "volume".into());

    match source.parent() {
        Some(parent) if source.is_relative() => output_root.join(parent).join(stem),
        _ => output_root.join(stem),
    }
}

/// A relative source with `..` components would put its crops outside the
/// output root.
pub fn escapes_output_root(source: &Path) -> bool {
    source.is_relative()
        && source
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}

/// For each source, the earlier source whose crops would get the same file
/// names, if any. The first source of a clashing set owns the names.
pub fn crop_name_clashes<'a>(sources: impl IntoIterator<Item = &'a Path>) -> Vec<Option<PathBuf>> {
    let mut owners: HashMap<PathBuf, &Path> = HashMap::new();
    sources
        .into_iter()
        .map(|source| match owners.entry(crop_output_prefix(Path::new(""), source)) {
            Entry::Occupied(owner) => Some(owner.get().to_path_buf()),
            Entry::Vacant(slot) => {
                slot.insert(source);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{BitDepth, VolumeDimensions};

    #[test]
    fn test_padding_is_clamped_to_extents() {
        let volume = Volume::new_filled(VolumeDimensions::new(50, 40, 10, 1), BitDepth::Eight, 0);
        let near_origin = Box3::new(2, 5, 3, 6, 1, 2);
        assert_eq!(
            padded_bounds(&near_origin, &Margins::default(), &volume),
            Box3::new(0, 45, 0, 39, 0, 9)
        );

        let interior = Box3::new(20, 25, 15, 20, 4, 5);
        assert_eq!(
            padded_bounds(&interior, &Margins::new(5, 5, 2), &volume),
            Box3::new(15, 30, 10, 25, 2, 7)
        );
        assert_eq!(padded_bounds(&interior, &Margins::NONE, &volume), interior);
    }

    #[test]
    fn test_crop_boxes_indices_and_channels() {
        let mut volume =
            Volume::new_filled(VolumeDimensions::new(30, 30, 12, 2), BitDepth::Sixteen, 5);
        volume.fill_box(&Box3::new(10, 12, 10, 12, 5, 6), 1, 999);
        let boxes = [Box3::new(10, 12, 10, 12, 5, 6), Box3::new(20, 21, 3, 4, 1, 1)];

        let crops = crop_boxes(&volume, Path::new("a/b.tif"), &boxes, &Margins::new(1, 1, 1));
        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].index, 0);
        assert_eq!(crops[1].index, 1);
        assert_eq!(crops[0].bounds, Box3::new(9, 13, 9, 13, 4, 7));
        assert_eq!(crops[0].channels, 2);
        assert_eq!(crops[0].volume.dimensions(), VolumeDimensions::new(5, 5, 4, 2));
        assert_eq!(crops[0].volume.get(1, 1, 1, 1), Some(999));
        assert_eq!(crops[0].volume.get(0, 0, 0, 1), Some(5));

        let row = crops[1].ledger_row();
        assert_eq!(row.source, PathBuf::from("a/b.tif"));
        assert_eq!(row.index, 1);
        assert_eq!(row.bounds, Box3::new(19, 22, 2, 5, 0, 2));
    }

    #[test]
    fn test_crop_output_path() {
        let root = Path::new("/out");
        assert_eq!(
            crop_output_path(root, Path::new("exp1/cells.tif"), 3),
            PathBuf::from("/out/exp1/cells_3.tif")
        );
        assert_eq!(
            crop_output_path(root, Path::new("cells.nd"), 0),
            PathBuf::from("/out/cells_0.tif")
        );
        assert_eq!(
            crop_output_path(root, Path::new("/abs/elsewhere/cells.tif"), 1),
            PathBuf::from("/out/cells_1.tif")
        );
    }

    #[test]
    fn test_same_stem_sources_clash() {
        let sources = [
            Path::new("exp/cells.tif"),
            Path::new("exp/cells.tiff"),
            Path::new("other/cells.tif"),
            Path::new("exp/cells_b.tif"),
            Path::new("/abs/cells.tif"),
        ];
        let clashes = crop_name_clashes(sources);
        assert_eq!(
            clashes,
            vec![
                None,
                Some(PathBuf::from("exp/cells.tif")),
                None,
                None,
                None,
            ]
        );
        assert_eq!(
            crop_name_clashes([Path::new("cells.tif"), Path::new("/abs/cells.tif")]),
            vec![None, Some(PathBuf::from("cells.tif"))]
        );
    }

    #[test]
    fn test_parent_components_escape_output_root() {
        assert!(escapes_output_root(Path::new("../secret/a.tif")));
        assert!(escapes_output_root(Path::new("exp/../../a.tif")));
        assert!(!escapes_output_root(Path::new("exp/a.tif")));
        assert!(!escapes_output_root(Path::new("/abs/../a.tif")));
    }
}
