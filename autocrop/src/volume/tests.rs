use super::*;
use crate::testing::init_tracing;

fn ramp_volume(width: usize, height: usize, depth: usize, channels: usize) -> Volume {
    let dims = VolumeDimensions::new(width, height, depth, channels);
    let samples = (0..dims.sample_count()).map(|i| (i % 4096) as u16).collect();
    Volume::new(dims, Calibration::default(), BitDepth::Sixteen, samples)
}

#[test]
fn test_get_is_bounds_checked() {
    let volume = ramp_volume(4, 3, 2, 2);
    assert_eq!(volume.get(0, 0, 0, 0), Some(0));
    assert_eq!(volume.get(3, 2, 1, 1), Some(47));
    assert_eq!(volume.get(4, 0, 0, 0), None);
    assert_eq!(volume.get(0, 3, 0, 0), None);
    assert_eq!(volume.get(0, 0, 2, 0), None);
    assert_eq!(volume.get(0, 0, 0, 2), None);
}

#[test]
fn test_channel_major_layout() {
    let volume = ramp_volume(4, 3, 2, 2);
    // Second channel starts after width * height * depth samples
    assert_eq!(volume.get(0, 0, 0, 1), Some(24));
    assert_eq!(volume.plane(1, 1)[0], 36);
    assert_eq!(volume.get(1, 2, 1, 0), Some(21));
}

#[test]
fn test_fill_box_only_touches_box() {
    let mut volume = Volume::new_filled(VolumeDimensions::new(6, 6, 6, 2), BitDepth::Sixteen, 5);
    volume.fill_box(&Box3::new(1, 2, 1, 2, 1, 2), 1, 200);

    let mut filled = 0;
    for z in 0..6 {
        for y in 0..6 {
            for x in 0..6 {
                assert_eq!(volume.get(x, y, z, 0), Some(5));
                if volume.get(x, y, z, 1) == Some(200) {
                    filled += 1;
                }
            }
        }
    }
    assert_eq!(filled, 8);
}

#[test]
fn test_crop_copies_all_channels() {
    let volume = ramp_volume(5, 4, 3, 2).with_calibration(Calibration::new(0.2, 0.2, 0.5, "µm"));
    let bbox = Box3::new(1, 3, 1, 2, 1, 2);
    let crop = volume.crop(&bbox);

    assert_eq!(crop.dimensions(), VolumeDimensions::new(3, 2, 2, 2));
    assert_eq!(crop.calibration(), volume.calibration());
    assert_eq!(crop.bit_depth(), BitDepth::Sixteen);
    for c in 0..2 {
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..3 {
                    assert_eq!(
                        crop.get(x, y, z, c),
                        volume.get(x + 1, y + 1, z + 1, c),
                        "voxel ({x}, {y}, {z}, c{c})"
                    );
                }
            }
        }
    }
}

#[test]
#[should_panic(expected = "outside")]
fn test_crop_outside_panics() {
    let volume = ramp_volume(5, 4, 3, 1);
    volume.crop(&Box3::new(0, 5, 0, 3, 0, 2));
}

#[test]
fn test_tiff_round_trip_16bit_multichannel() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/stack.tif");

    let volume = ramp_volume(7, 5, 4, 2).with_calibration(Calibration::new(0.25, 0.5, 2.0, "µm"));
    TiffVolumeIo.write(&volume, &path).unwrap();
    let loaded = TiffVolumeIo.read(&path).unwrap();

    assert_eq!(loaded, volume);
}

#[test]
fn test_tiff_round_trip_8bit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack8.tif");

    let dims = VolumeDimensions::new(6, 4, 3, 1);
    let samples = (0..dims.sample_count()).map(|i| (i * 3 % 256) as u16).collect();
    let volume = Volume::new(dims, Calibration::default(), BitDepth::Eight, samples);
    TiffVolumeIo.write(&volume, &path).unwrap();
    let loaded = TiffVolumeIo.read(&path).unwrap();

    assert_eq!(loaded.bit_depth(), BitDepth::Eight);
    assert_eq!(loaded, volume);
}

#[test]
fn test_tiff_write_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.tif");
    let b = dir.path().join("b.tif");

    let volume = ramp_volume(8, 8, 3, 1);
    TiffVolumeIo.write(&volume, &a).unwrap();
    TiffVolumeIo.write(&volume, &b).unwrap();

    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

#[test]
fn test_tiff_read_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = TiffVolumeIo.read(&dir.path().join("missing.tif")).unwrap_err();
    assert!(matches!(err, VolumeIoError::Io { .. }), "{err}");
}

#[test]
fn test_tiff_read_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.tif");
    std::fs::write(&path, b"not a tiff at all").unwrap();

    let err = TiffVolumeIo.read(&path).unwrap_err();
    assert!(matches!(err, VolumeIoError::Tiff { .. }), "{err}");
}
