//! Texture File I/O
//!
//! TIFF storage for texture, environment and shadow maps. A map is a TIFF
//! with one directory per mip level (or per cube face), 32-bit float
//! texels for depth data, and the Pixar private tags describing what kind
//! of map it is:
//!
//! - `TEXTUREFORMAT` — "Plain Texture", "CubeFace Environment",
//!   "LatLong Environment" or "Shadow"
//! - `WRAPMODES` — `"swrap twrap filter swidth twidth"`
//! - `MATRIX_WORLDTOCAMERA` / `MATRIX_WORLDTOSCREEN` — shadow matrices

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use glam::Mat4;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::TiffEncoder;
use tiff::encoder::colortype::{Gray32Float, RGB32Float};
use tiff::tags::Tag;

use crate::errors::{RenderError, Result};

use super::{Segment, WrapMode};

pub const TAG_TEXTUREFORMAT: u16 = 33302;
pub const TAG_WRAPMODES: u16 = 33303;
pub const TAG_MATRIX_WORLDTOSCREEN: u16 = 33305;
pub const TAG_MATRIX_WORLDTOCAMERA: u16 = 33306;

/// The map kind recorded in the `TEXTUREFORMAT` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Plain,
    CubeFace,
    LatLong,
    Shadow,
}

impl TextureFormat {
    #[must_use]
    pub fn tag_value(self) -> &'static str {
        match self {
            Self::Plain => "Plain Texture",
            Self::CubeFace => "CubeFace Environment",
            Self::LatLong => "LatLong Environment",
            Self::Shadow => "Shadow",
        }
    }

    #[must_use]
    pub fn from_tag_value(value: &str) -> Option<Self> {
        match value {
            "Plain Texture" => Some(Self::Plain),
            "CubeFace Environment" => Some(Self::CubeFace),
            "LatLong Environment" => Some(Self::LatLong),
            "Shadow" => Some(Self::Shadow),
            _ => None,
        }
    }
}

/// The `WRAPMODES` tag payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WrapModes {
    pub swrap: WrapMode,
    pub twrap: WrapMode,
    pub filter: String,
    pub swidth: f32,
    pub twidth: f32,
}

impl Default for WrapModes {
    fn default() -> Self {
        Self {
            swrap: WrapMode::Black,
            twrap: WrapMode::Black,
            filter: "box".to_string(),
            swidth: 1.0,
            twidth: 1.0,
        }
    }
}

impl WrapModes {
    #[must_use]
    pub fn tag_value(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.swrap.name(),
            self.twrap.name(),
            self.filter,
            self.swidth,
            self.twidth
        )
    }

    #[must_use]
    pub fn from_tag_value(value: &str) -> Option<Self> {
        let mut words = value.split_whitespace();
        let swrap = WrapMode::from_name(words.next()?)?;
        let twrap = WrapMode::from_name(words.next()?)?;
        let filter = words.next()?.to_string();
        let swidth = words.next()?.parse().ok()?;
        let twidth = words.next()?.parse().ok()?;
        Some(Self {
            swrap,
            twrap,
            filter,
            swidth,
            twidth,
        })
    }
}

/// Metadata of an opened map file.
#[derive(Debug, Clone)]
pub struct MapInfo {
    /// Dimensions of each directory, in file order.
    pub levels: Vec<(u32, u32)>,
    pub channels: u32,
    pub format: Option<TextureFormat>,
    pub wrapmodes: Option<WrapModes>,
    pub world_to_camera: Option<Mat4>,
    pub world_to_screen: Option<Mat4>,
}

fn tiff_error(e: tiff::TiffError) -> RenderError {
    RenderError::InvalidData(format!("tiff: {e}"))
}

fn matrix_to_row_major(m: &Mat4) -> [f32; 16] {
    m.transpose().to_cols_array()
}

fn matrix_from_row_major(values: &[f32]) -> Option<Mat4> {
    if values.len() < 16 {
        return None;
    }
    let mut a = [0.0f32; 16];
    a.copy_from_slice(&values[..16]);
    Some(Mat4::from_cols_array(&a).transpose())
}

/// Reads directory dimensions and the Pixar tags without decoding texels.
pub fn probe(path: &Path) -> Result<MapInfo> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(file).map_err(tiff_error)?;

    let format = decoder
        .get_tag_ascii_string(Tag::Unknown(TAG_TEXTUREFORMAT))
        .ok()
        .and_then(|v| TextureFormat::from_tag_value(v.trim_end_matches('\0')));
    let wrapmodes = decoder
        .get_tag_ascii_string(Tag::Unknown(TAG_WRAPMODES))
        .ok()
        .and_then(|v| WrapModes::from_tag_value(&v));
    let world_to_camera = decoder
        .get_tag_f32_vec(Tag::Unknown(TAG_MATRIX_WORLDTOCAMERA))
        .ok()
        .and_then(|v| matrix_from_row_major(&v));
    let world_to_screen = decoder
        .get_tag_f32_vec(Tag::Unknown(TAG_MATRIX_WORLDTOSCREEN))
        .ok()
        .and_then(|v| matrix_from_row_major(&v));

    let channels = match decoder.colortype().map_err(tiff_error)? {
        tiff::ColorType::Gray(_) => 1,
        tiff::ColorType::GrayA(_) => 2,
        tiff::ColorType::RGB(_) => 3,
        tiff::ColorType::RGBA(_) | tiff::ColorType::CMYK(_) => 4,
        other => {
            return Err(RenderError::InvalidData(format!(
                "unsupported tiff color type {other:?}"
            )));
        }
    };

    let mut levels = vec![decoder.dimensions().map_err(tiff_error)?];
    while decoder.more_images() {
        decoder.next_image().map_err(tiff_error)?;
        levels.push(decoder.dimensions().map_err(tiff_error)?);
    }

    Ok(MapInfo {
        levels,
        channels,
        format,
        wrapmodes,
        world_to_camera,
        world_to_screen,
    })
}

fn decode_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(|p| f32::from(p) / 255.0).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|p| f32::from(p) / 65535.0).collect(),
        DecodingResult::U32(v) => v
            .into_iter()
            .map(|p| p as f64 / f64::from(u32::MAX))
            .map(|p| p as f32)
            .collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|p| p as f32).collect(),
        other => {
            return Err(RenderError::InvalidData(format!(
                "unsupported tiff sample format {other:?}"
            )));
        }
    })
}

/// Decodes one directory of a map into a dense segment.
pub fn read_level(path: &Path, directory: u32) -> Result<Segment> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(file).map_err(tiff_error)?;
    for _ in 0..directory {
        decoder.next_image().map_err(tiff_error)?;
    }
    let (width, height) = decoder.dimensions().map_err(tiff_error)?;
    let channels = match decoder.colortype().map_err(tiff_error)? {
        tiff::ColorType::Gray(_) => 1,
        tiff::ColorType::GrayA(_) => 2,
        tiff::ColorType::RGB(_) => 3,
        _ => 4,
    };
    let texels = decode_to_f32(decoder.read_image().map_err(tiff_error)?)?;
    if texels.len() != (width * height * channels) as usize {
        return Err(RenderError::InvalidData(format!(
            "tiff directory {directory} holds {} samples, expected {}",
            texels.len(),
            width * height * channels
        )));
    }
    Ok(Segment {
        width,
        height,
        channels,
        texels,
    })
}

/// Writes a map: one directory per segment, tags repeated on each
/// directory so any entry point finds them.
pub fn write_map(
    path: &Path,
    levels: &[Segment],
    format: TextureFormat,
    wrapmodes: Option<&WrapModes>,
    matrices: Option<(&Mat4, &Mat4)>,
) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file).map_err(tiff_error)?;
    for level in levels {
        match level.channels {
            1 => {
                let mut image = encoder
                    .new_image::<Gray32Float>(level.width, level.height)
                    .map_err(tiff_error)?;
                write_tags(image.encoder(), format, wrapmodes, matrices)?;
                image.write_data(&level.texels).map_err(tiff_error)?;
            }
            3 => {
                let mut image = encoder
                    .new_image::<RGB32Float>(level.width, level.height)
                    .map_err(tiff_error)?;
                write_tags(image.encoder(), format, wrapmodes, matrices)?;
                image.write_data(&level.texels).map_err(tiff_error)?;
            }
            other => {
                return Err(RenderError::InvalidData(format!(
                    "cannot write {other}-channel map"
                )));
            }
        }
    }
    Ok(())
}

fn write_tags<W: std::io::Write + std::io::Seek, K: tiff::encoder::TiffKind>(
    dir: &mut tiff::encoder::DirectoryEncoder<'_, W, K>,
    format: TextureFormat,
    wrapmodes: Option<&WrapModes>,
    matrices: Option<(&Mat4, &Mat4)>,
) -> Result<()> {
    dir.write_tag(Tag::Unknown(TAG_TEXTUREFORMAT), format.tag_value())
        .map_err(tiff_error)?;
    if let Some(w) = wrapmodes {
        dir.write_tag(Tag::Unknown(TAG_WRAPMODES), w.tag_value().as_str())
            .map_err(tiff_error)?;
    }
    if let Some((world_to_camera, world_to_screen)) = matrices {
        dir.write_tag(
            Tag::Unknown(TAG_MATRIX_WORLDTOCAMERA),
            &matrix_to_row_major(world_to_camera)[..],
        )
        .map_err(tiff_error)?;
        dir.write_tag(
            Tag::Unknown(TAG_MATRIX_WORLDTOSCREEN),
            &matrix_to_row_major(world_to_screen)[..],
        )
        .map_err(tiff_error)?;
    }
    Ok(())
}

/// Builds the mip chain for a base level by successive box halving, down
/// to 1×1. The base is not included.
#[must_use]
pub fn generate_mip_chain(base: &Segment) -> Vec<Segment> {
    let mut chain: Vec<Segment> = Vec::new();
    loop {
        let src = chain.last().unwrap_or(base);
        if src.width <= 1 && src.height <= 1 {
            break;
        }
        let next = downsample(src);
        chain.push(next);
    }
    chain
}

pub(crate) fn downsample(src: &Segment) -> Segment {
    let width = (src.width / 2).max(1);
    let height = (src.height / 2).max(1);
    let c = src.channels as usize;
    let mut texels = vec![0.0f32; width as usize * height as usize * c];
    for y in 0..height {
        for x in 0..width {
            let x0 = (x * 2).min(src.width - 1);
            let x1 = (x * 2 + 1).min(src.width - 1);
            let y0 = (y * 2).min(src.height - 1);
            let y1 = (y * 2 + 1).min(src.height - 1);
            for ch in 0..c {
                let sum = src.texel(x0, y0)[ch]
                    + src.texel(x1, y0)[ch]
                    + src.texel(x0, y1)[ch]
                    + src.texel(x1, y1)[ch];
                texels[(y as usize * width as usize + x as usize) * c + ch] = sum * 0.25;
            }
        }
    }
    Segment {
        width,
        height,
        channels: src.channels,
        texels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("reyes-file-test-{}-{name}", std::process::id()));
        p
    }

    fn checker(size: u32) -> Segment {
        let mut texels = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                texels.push(if (x + y) % 2 == 0 { 1.0 } else { 0.0 });
            }
        }
        Segment {
            width: size,
            height: size,
            channels: 1,
            texels,
        }
    }

    #[test]
    fn wrapmodes_tag_round_trip() {
        let w = WrapModes {
            swrap: WrapMode::Periodic,
            twrap: WrapMode::Clamp,
            filter: "gaussian".to_string(),
            swidth: 2.0,
            twidth: 3.0,
        };
        assert_eq!(WrapModes::from_tag_value(&w.tag_value()).unwrap(), w);
    }

    #[test]
    fn texture_format_names() {
        for f in [
            TextureFormat::Plain,
            TextureFormat::CubeFace,
            TextureFormat::LatLong,
            TextureFormat::Shadow,
        ] {
            assert_eq!(TextureFormat::from_tag_value(f.tag_value()), Some(f));
        }
    }

    #[test]
    fn mip_chain_halves_to_one() {
        let chain = generate_mip_chain(&checker(8));
        let dims: Vec<(u32, u32)> = chain.iter().map(|s| (s.width, s.height)).collect();
        assert_eq!(dims, vec![(4, 4), (2, 2), (1, 1)]);
        // A checkerboard averages to grey everywhere.
        assert!((chain[0].texels[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn map_write_probe_read_round_trip() {
        let path = temp_path("roundtrip.tx");
        let base = checker(8);
        let mut levels = vec![base];
        levels.extend(generate_mip_chain(&levels[0]));
        let w2c = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, 5.0));
        let w2s = Mat4::from_scale(glam::Vec3::splat(2.0));
        write_map(
            &path,
            &levels,
            TextureFormat::Shadow,
            Some(&WrapModes::default()),
            Some((&w2c, &w2s)),
        )
        .unwrap();

        let info = probe(&path).unwrap();
        assert_eq!(info.levels.len(), 4);
        assert_eq!(info.format, Some(TextureFormat::Shadow));
        assert_eq!(info.world_to_camera.unwrap(), w2c);
        assert_eq!(info.world_to_screen.unwrap(), w2s);

        let level0 = read_level(&path, 0).unwrap();
        assert_eq!(level0.texels, levels[0].texels);
        let _ = std::fs::remove_file(&path);
    }
}
