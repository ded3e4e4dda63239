//! Multi-page TIFF stacks in the ImageJ hyperstack layout.
//!
//! Pages are ordered channel-fastest (`page = z * channels + c`). The channel
//! and slice counts, the z spacing and the unit travel in the ImageJ
//! `ImageDescription` block; x/y calibration in `XResolution`/`YResolution`.

use std::fs::{self, File};
use std::io::{BufReader, Cursor, Seek, Write};
use std::path::Path;

use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{Rational, TiffEncoder, TiffValue};
use tiff::tags::{ResolutionUnit, Tag};

use super::io::{VolumeIo, VolumeIoError};
use super::{BitDepth, Calibration, Volume, VolumeDimensions};

/// Denominator used when storing calibration as a TIFF rational.
const RESOLUTION_SCALE: f64 = 1_000_000.0;

const MICRO_SIGN_ESCAPE: &str = "\\u00B5";

/// Reads and writes volumes as uncompressed multi-page grayscale TIFF files.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiffVolumeIo;

impl VolumeIo for TiffVolumeIo {
    fn read(&self, path: &Path) -> Result<Volume, VolumeIoError> {
        read_tiff_stack(path)
    }

    fn write(&self, volume: &Volume, path: &Path) -> Result<(), VolumeIoError> {
        write_tiff_stack(volume, path)
    }
}

/// Hyperstack fields parsed from an ImageJ description block.
#[derive(Debug, Default, PartialEq)]
struct StackDescription {
    channels: Option<usize>,
    slices: Option<usize>,
    spacing: Option<f64>,
    unit: Option<String>,
}

impl StackDescription {
    fn parse(text: &str) -> Self {
        let mut desc = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "channels" => desc.channels = value.parse().ok(),
                "slices" => desc.slices = value.parse().ok(),
                "spacing" => desc.spacing = value.parse().ok(),
                "unit" => desc.unit = Some(value.replace(MICRO_SIGN_ESCAPE, "µ")),
                _ => {}
            }
        }
        desc
    }

    fn render(dimensions: &VolumeDimensions, calibration: &Calibration) -> String {
        let mut text = format!(
            "ImageJ=1.54f\nimages={}\n",
            dimensions.depth * dimensions.channels
        );
        if dimensions.channels > 1 {
            text.push_str(&format!("channels={}\n", dimensions.channels));
        }
        text.push_str(&format!("slices={}\n", dimensions.depth));
        if dimensions.channels > 1 {
            text.push_str("hyperstack=true\nmode=grayscale\n");
        }
        text.push_str(&format!(
            "unit={}\nspacing={}\nloop=false\n",
            calibration.unit.replace('µ', MICRO_SIGN_ESCAPE),
            calibration.z
        ));
        text
    }
}

fn tiff_error(path: &Path) -> impl FnOnce(tiff::TiffError) -> VolumeIoError + '_ {
    move |source| VolumeIoError::Tiff {
        path: path.to_path_buf(),
        source,
    }
}

fn read_resolution<R: std::io::Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Option<f64> {
    match decoder.find_tag(tag).ok().flatten()? {
        Value::Rational(n, d) if n > 0 => Some(d as f64 / n as f64),
        _ => None,
    }
}

fn read_tiff_stack(path: &Path) -> Result<Volume, VolumeIoError> {
    let file = File::open(path).map_err(|source| VolumeIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(tiff_error(path))?
        .with_limits(Limits::unlimited());

    let description = decoder
        .get_tag_ascii_string(Tag::ImageDescription)
        .map(|text| StackDescription::parse(&text))
        .unwrap_or_default();
    let x_cal = read_resolution(&mut decoder, Tag::XResolution);
    let y_cal = read_resolution(&mut decoder, Tag::YResolution);

    let (width, height) = decoder.dimensions().map_err(tiff_error(path))?;
    let (width, height) = (width as usize, height as usize);

    let mut bit_depth = None;
    let mut pages: Vec<Vec<u16>> = Vec::new();
    loop {
        let page_dims = decoder.dimensions().map_err(tiff_error(path))?;
        if (page_dims.0 as usize, page_dims.1 as usize) != (width, height) {
            return Err(VolumeIoError::Layout {
                path: path.to_path_buf(),
                reason: format!(
                    "page {} is {}x{}, expected {}x{}",
                    pages.len(),
                    page_dims.0,
                    page_dims.1,
                    width,
                    height
                ),
            });
        }

        let (page_depth, samples) = match decoder.read_image().map_err(tiff_error(path))? {
            DecodingResult::U8(buf) => (BitDepth::Eight, buf.into_iter().map(u16::from).collect()),
            DecodingResult::U16(buf) => (BitDepth::Sixteen, buf),
            other => {
                return Err(VolumeIoError::Unsupported {
                    path: path.to_path_buf(),
                    reason: format!("sample format {}", decoding_result_name(&other)),
                });
            }
        };
        if samples.len() != width * height {
            return Err(VolumeIoError::Unsupported {
                path: path.to_path_buf(),
                reason: "only single-sample grayscale pages are supported".to_string(),
            });
        }
        if *bit_depth.get_or_insert(page_depth) != page_depth {
            return Err(VolumeIoError::Layout {
                path: path.to_path_buf(),
                reason: "pages mix 8-bit and 16-bit samples".to_string(),
            });
        }
        pages.push(samples);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_error(path))?;
    }

    let channels = description.channels.unwrap_or(1).max(1);
    if pages.len() % channels != 0 {
        return Err(VolumeIoError::Layout {
            path: path.to_path_buf(),
            reason: format!(
                "{} pages cannot be split into {} channels",
                pages.len(),
                channels
            ),
        });
    }
    let depth = pages.len() / channels;
    if let Some(slices) = description.slices
        && slices != depth
    {
        tracing::warn!(
            path = %path.display(),
            slices,
            depth,
            "ImageJ slice count disagrees with page count; using page count"
        );
    }

    // Pages are channel-fastest on disk; the volume is channel-major.
    let dimensions = VolumeDimensions::new(width, height, depth, channels);
    let plane = width * height;
    let mut samples = vec![0u16; dimensions.sample_count()];
    for (page_idx, page) in pages.iter().enumerate() {
        let channel = page_idx % channels;
        let z = page_idx / channels;
        let start = (channel * depth + z) * plane;
        samples[start..start + plane].copy_from_slice(page);
    }

    let defaults = Calibration::default();
    let calibration = Calibration {
        x: x_cal.unwrap_or(defaults.x),
        y: y_cal.unwrap_or(defaults.y),
        z: description.spacing.unwrap_or(defaults.z),
        unit: description.unit.unwrap_or(defaults.unit),
    };

    Ok(Volume::new(
        dimensions,
        calibration,
        bit_depth.unwrap_or_default(),
        samples,
    ))
}

fn decoding_result_name(result: &DecodingResult) -> &'static str {
    match result {
        DecodingResult::U8(_) => "u8",
        DecodingResult::U16(_) => "u16",
        DecodingResult::U32(_) => "u32",
        DecodingResult::U64(_) => "u64",
        DecodingResult::F32(_) => "f32",
        DecodingResult::F64(_) => "f64",
        _ => "signed integer",
    }
}

fn to_rational(size: f64) -> Rational {
    let n = (RESOLUTION_SCALE / size).round().clamp(1.0, u32::MAX as f64) as u32;
    Rational {
        n,
        d: RESOLUTION_SCALE as u32,
    }
}

fn write_page<W, C>(
    encoder: &mut TiffEncoder<W>,
    width: u32,
    height: u32,
    data: &[C::Inner],
    description: Option<&str>,
    calibration: &Calibration,
) -> tiff::TiffResult<()>
where
    W: Write + Seek,
    C: ColorType,
    [C::Inner]: TiffValue,
{
    let mut image = encoder.new_image::<C>(width, height)?;
    if let Some(description) = description {
        image
            .encoder()
            .write_tag(Tag::ImageDescription, description)?;
    }
    image.resolution_unit(ResolutionUnit::None);
    image.x_resolution(to_rational(calibration.x));
    image.y_resolution(to_rational(calibration.y));
    image.write_data(data)
}

fn write_tiff_stack(volume: &Volume, path: &Path) -> Result<(), VolumeIoError> {
    let dims = volume.dimensions();
    if dims.is_empty() {
        return Err(VolumeIoError::Unsupported {
            path: path.to_path_buf(),
            reason: format!("cannot write empty volume {dims}"),
        });
    }

    let description = StackDescription::render(&dims, volume.calibration());
    let (width, height) = (dims.width as u32, dims.height as u32);

    // Encode to memory first so a failure never leaves a truncated file behind.
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buffer).map_err(tiff_error(path))?;
        for z in 0..dims.depth {
            for channel in 0..dims.channels {
                let first = z == 0 && channel == 0;
                let desc = first.then_some(description.as_str());
                let plane = volume.plane(channel, z);
                let result = match volume.bit_depth() {
                    BitDepth::Eight => {
                        let narrowed: Vec<u8> =
                            plane.iter().map(|&v| v.min(u8::MAX as u16) as u8).collect();
                        write_page::<_, colortype::Gray8>(
                            &mut encoder,
                            width,
                            height,
                            &narrowed,
                            desc,
                            volume.calibration(),
                        )
                    }
                    BitDepth::Sixteen => write_page::<_, colortype::Gray16>(
                        &mut encoder,
                        width,
                        height,
                        plane,
                        desc,
                        volume.calibration(),
                    ),
                };
                result.map_err(tiff_error(path))?;
            }
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| VolumeIoError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, buffer.into_inner()).map_err(|source| VolumeIoError::Io {
        path: path.to_path_buf(),
        source,
    })
}
