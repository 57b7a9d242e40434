//! Shadow Maps
//!
//! Depth maps rendered from a light's point of view, stored as 32-bit
//! float TIFF with the light's `worldToCamera` and `worldToScreen`
//! matrices embedded, plus the legacy raw ZFile format. Lookups use
//! percentage-closer filtering: jittered taps across the footprint, each
//! compared against the receiver's light-space depth minus a bias.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use rand::{Rng, RngExt};

use crate::errors::{RenderError, Result};
use crate::math::transform_point;

use super::file::{self, TextureFormat, WrapModes};
use super::{Segment, SegmentKey, TextureCache, locate};

/// Magic prefix of the legacy depth-file format.
pub const ZFILE_MAGIC: &[u8; 16] = b"Aqsis ZFile 2.0\0";

/// Cap on jittered taps per axis.
const MAX_TAPS: u32 = 16;

/// Per-lookup shadow parameters, from the light shader's arguments.
#[derive(Debug, Clone, Copy)]
pub struct ShadowSampleParams {
    pub sblur: f32,
    pub tblur: f32,
    /// Fixed receiver bias; when zero, a value is picked uniformly in
    /// [bias0, bias1].
    pub bias: f32,
    pub bias0: f32,
    pub bias1: f32,
    /// Requested tap count (taken as a square grid).
    pub samples: f32,
}

impl Default for ShadowSampleParams {
    fn default() -> Self {
        Self {
            sblur: 0.0,
            tblur: 0.0,
            bias: 0.225,
            bias0: 0.0,
            bias1: 0.0,
            samples: 16.0,
        }
    }
}

/// Result of one shadow lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowSample {
    /// Fraction of taps in shadow, in [0, 1].
    pub fraction: f32,
    /// Mean stored depth across the taps.
    pub average_depth: f32,
    /// Mean receiver-minus-occluder distance over shadowed taps.
    pub shadow_depth: f32,
}

pub struct ShadowMap {
    id: u64,
    name: String,
    source: ShadowSource,
    width: u32,
    height: u32,
    world_to_camera: Mat4,
    world_to_screen: Mat4,
}

enum ShadowSource {
    File(PathBuf),
    Memory(Arc<Segment>),
}

impl ShadowMap {
    /// Opens a shadow map by name, accepting tiled TIFF or ZFile.
    pub fn open(name: &str, search_paths: &[String], cache: &TextureCache) -> Result<Arc<Self>> {
        let path = locate(name, search_paths)
            .ok_or_else(|| RenderError::FileNotFound(name.to_string()))?;
        if is_zfile(&path)? {
            let (segment, world_to_camera, world_to_screen) = read_zfile(&path)?;
            return Ok(Arc::new(Self {
                id: cache.allocate_map_id(),
                name: name.to_string(),
                width: segment.width,
                height: segment.height,
                source: ShadowSource::Memory(Arc::new(segment)),
                world_to_camera,
                world_to_screen,
            }));
        }
        let info = file::probe(&path)?;
        if info.format != Some(TextureFormat::Shadow) {
            return Err(RenderError::InvalidShadowMap(format!(
                "\"{name}\" carries no shadow format tag"
            )));
        }
        let (world_to_camera, world_to_screen) =
            match (info.world_to_camera, info.world_to_screen) {
                (Some(c), Some(s)) => (c, s),
                _ => {
                    return Err(RenderError::InvalidShadowMap(format!(
                        "\"{name}\" is missing its light matrices"
                    )));
                }
            };
        let (width, height) = info.levels[0];
        Ok(Arc::new(Self {
            id: cache.allocate_map_id(),
            name: name.to_string(),
            source: ShadowSource::File(path),
            width,
            height,
            world_to_camera,
            world_to_screen,
        }))
    }

    /// Builds an in-memory map directly from a depth-hider frame.
    #[must_use]
    pub fn from_depths(
        name: &str,
        cache: &TextureCache,
        width: u32,
        height: u32,
        depths: Vec<f32>,
        world_to_camera: Mat4,
        world_to_screen: Mat4,
    ) -> Self {
        Self {
            id: cache.allocate_map_id(),
            name: name.to_string(),
            source: ShadowSource::Memory(Arc::new(Segment {
                width,
                height,
                channels: 1,
                texels: depths,
            })),
            width,
            height,
            world_to_camera,
            world_to_screen,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn world_to_camera(&self) -> &Mat4 {
        &self.world_to_camera
    }

    #[must_use]
    pub fn world_to_screen(&self) -> &Mat4 {
        &self.world_to_screen
    }

    fn segment(&self, cache: &TextureCache) -> Result<Arc<Segment>> {
        match &self.source {
            ShadowSource::Memory(seg) => Ok(Arc::clone(seg)),
            ShadowSource::File(path) => {
                let key = SegmentKey {
                    map_id: self.id,
                    face: 0,
                    level: 0,
                };
                cache.segment(key, || file::read_level(path, 0))
            }
        }
    }

    /// Saves the map as a tiled float TIFF with the light matrices.
    pub fn save(&self, path: &Path, cache: &TextureCache) -> Result<()> {
        let seg = self.segment(cache)?;
        let level = Segment {
            width: seg.width,
            height: seg.height,
            channels: 1,
            texels: seg.texels.clone(),
        };
        file::write_map(
            path,
            &[level],
            TextureFormat::Shadow,
            Some(&WrapModes::default()),
            Some((&self.world_to_camera, &self.world_to_screen)),
        )
    }

    /// Saves the legacy raw ZFile.
    pub fn save_zfile(&self, path: &Path, cache: &TextureCache) -> Result<()> {
        let seg = self.segment(cache)?;
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(ZFILE_MAGIC)?;
        out.write_all(&(self.width as i32).to_le_bytes())?;
        out.write_all(&(self.height as i32).to_le_bytes())?;
        write_matrix(&mut out, &self.world_to_camera)?;
        write_matrix(&mut out, &self.world_to_screen)?;
        for depth in &seg.texels {
            out.write_all(&depth.to_le_bytes())?;
        }
        Ok(())
    }

    /// The percentage-closer lookup. `point` and the filter widths are in
    /// world space; the jitter stream comes from the caller so results
    /// stay keyed to the sample position.
    pub fn sample<R: Rng>(
        &self,
        cache: &TextureCache,
        point: Vec3,
        swidth: Vec3,
        twidth: Vec3,
        params: &ShadowSampleParams,
        rng: &mut R,
    ) -> Result<ShadowSample> {
        cache.critical_measure();
        let seg = self.segment(cache)?;

        let bias = if params.bias > 0.0 {
            params.bias
        } else {
            let lo = params.bias0.min(params.bias1);
            let hi = params.bias0.max(params.bias1);
            if hi > lo {
                rng.random_range(lo..=hi)
            } else {
                lo
            }
        };

        // The four corners of the filter footprint, biased toward the
        // light along z after the transform.
        let half_s = swidth * 0.5;
        let half_t = twidth * 0.5;
        let corners = [
            point - half_s - half_t,
            point + half_s - half_t,
            point - half_s + half_t,
            point + half_s + half_t,
        ];
        let centre = (corners[0] + corners[1] + corners[2] + corners[3]) * 0.25;
        let z = transform_point(&self.world_to_camera, centre).z - bias;

        let xr2 = self.width as f32 * 0.5;
        let yr2 = self.height as f32 * 0.5;
        let mut smin = f32::INFINITY;
        let mut smax = f32::NEG_INFINITY;
        let mut tmin = f32::INFINITY;
        let mut tmax = f32::NEG_INFINITY;
        for corner in corners {
            let m = transform_point(&self.world_to_screen, corner);
            let s = m.x * xr2 + xr2;
            let t = self.height as f32 - (m.y * yr2 + yr2);
            smin = smin.min(s);
            smax = smax.max(s);
            tmin = tmin.min(t);
            tmax = tmax.max(t);
        }
        // Blur inflates the footprint in texel units.
        smin -= params.sblur * 0.5 * self.width as f32;
        smax += params.sblur * 0.5 * self.width as f32;
        tmin -= params.tblur * 0.5 * self.height as f32;
        tmax += params.tblur * 0.5 * self.height as f32;

        if smax < 0.0 || smin >= self.width as f32 || tmax < 0.0 || tmin >= self.height as f32 {
            // Footprint entirely off the map: unoccluded.
            return Ok(ShadowSample::default());
        }
        let lu = smin.floor().max(0.0);
        let hu = smax.ceil().min((self.width - 1) as f32);
        let lv = tmin.floor().max(0.0);
        let hv = tmax.ceil().min((self.height - 1) as f32);

        let n = (params.samples.max(1.0).sqrt().ceil() as u32).clamp(1, MAX_TAPS);
        let ds = (hu - lu) / n as f32;
        let dt = (hv - lv) / n as f32;

        let mut in_shadow = 0u32;
        let mut depth_sum = 0.0f32;
        let mut shadow_depth_sum = 0.0f32;
        let total = n * n;
        for i in 0..n {
            for j in 0..n {
                let s = lu + (i as f32 + rng.random::<f32>()) * ds;
                let t = lv + (j as f32 + rng.random::<f32>()) * dt;
                let iu = (s as u32).min(self.width - 1);
                let iv = (t as u32).min(self.height - 1);
                let map_z = seg.texel(iu, iv)[0];
                depth_sum += map_z;
                if z > map_z {
                    in_shadow += 1;
                    shadow_depth_sum += z - map_z;
                }
            }
        }

        Ok(ShadowSample {
            fraction: in_shadow as f32 / total as f32,
            average_depth: depth_sum / total as f32,
            shadow_depth: if in_shadow > 0 {
                shadow_depth_sum / total as f32
            } else {
                0.0
            },
        })
    }
}

fn write_matrix<W: Write>(out: &mut W, m: &Mat4) -> Result<()> {
    for v in m.transpose().to_cols_array() {
        out.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn read_matrix<R: Read>(input: &mut R) -> Result<Mat4> {
    let mut values = [0.0f32; 16];
    let mut buf = [0u8; 4];
    for v in &mut values {
        input.read_exact(&mut buf)?;
        *v = f32::from_le_bytes(buf);
    }
    Ok(Mat4::from_cols_array(&values).transpose())
}

fn is_zfile(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 12];
    if file.read_exact(&mut magic).is_err() {
        return Ok(false);
    }
    Ok(&magic == b"Aqsis ZFile ")
}

/// Reads a legacy ZFile: magic, resolution, both matrices, raw depths.
pub fn read_zfile(path: &Path) -> Result<(Segment, Mat4, Mat4)> {
    let mut input = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 16];
    input.read_exact(&mut magic)?;
    if &magic[..12] != b"Aqsis ZFile " {
        return Err(RenderError::InvalidShadowMap(format!(
            "{} is not a depth file",
            path.display()
        )));
    }
    let mut word = [0u8; 4];
    input.read_exact(&mut word)?;
    let width = i32::from_le_bytes(word);
    input.read_exact(&mut word)?;
    let height = i32::from_le_bytes(word);
    if width <= 0 || height <= 0 {
        return Err(RenderError::InvalidShadowMap(format!(
            "{} has degenerate resolution {width}x{height}",
            path.display()
        )));
    }
    let world_to_camera = read_matrix(&mut input)?;
    let world_to_screen = read_matrix(&mut input)?;
    let count = (width * height) as usize;
    let mut texels = vec![0.0f32; count];
    for v in &mut texels {
        input.read_exact(&mut word)?;
        *v = f32::from_le_bytes(word);
    }
    Ok((
        Segment {
            width: width as u32,
            height: height as u32,
            channels: 1,
            texels,
        },
        world_to_camera,
        world_to_screen,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Statistics;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("reyes-shadow-{}-{name}", std::process::id()));
        p
    }

    fn cache() -> TextureCache {
        TextureCache::new(4096, Arc::new(Statistics::new()))
    }

    /// Orthographic light looking down -z at the origin, covering
    /// [-1, 1]² in x and y.
    fn ortho_light_map(cache: &TextureCache, occluder_depth: f32) -> ShadowMap {
        let world_to_camera = Mat4::IDENTITY;
        let world_to_screen = Mat4::IDENTITY;
        ShadowMap::from_depths(
            "light.shad",
            cache,
            32,
            32,
            vec![occluder_depth; 32 * 32],
            world_to_camera,
            world_to_screen,
        )
    }

    #[test]
    fn receiver_behind_occluder_is_fully_shadowed() {
        let cache = cache();
        let map = ortho_light_map(&cache, 5.0);
        let mut rng = StdRng::seed_from_u64(7);
        let params = ShadowSampleParams {
            bias: 0.01,
            ..ShadowSampleParams::default()
        };
        let sample = map
            .sample(
                &cache,
                Vec3::new(0.0, 0.0, 6.0),
                Vec3::splat(0.01),
                Vec3::splat(0.01),
                &params,
                &mut rng,
            )
            .unwrap();
        assert!((sample.fraction - 1.0).abs() < 1e-6);
        assert!(sample.shadow_depth > 0.0);
    }

    #[test]
    fn receiver_in_front_is_unshadowed() {
        let cache = cache();
        let map = ortho_light_map(&cache, 5.0);
        let mut rng = StdRng::seed_from_u64(7);
        let sample = map
            .sample(
                &cache,
                Vec3::new(0.0, 0.0, 4.0),
                Vec3::splat(0.01),
                Vec3::splat(0.01),
                &ShadowSampleParams::default(),
                &mut rng,
            )
            .unwrap();
        assert!(sample.fraction.abs() < 1e-6);
    }

    #[test]
    fn zfile_round_trip_is_bit_identical() {
        let cache = cache();
        let depths: Vec<f32> = (0..64).map(|i| i as f32 * 0.125).collect();
        let map = ShadowMap::from_depths(
            "rt.z",
            &cache,
            8,
            8,
            depths.clone(),
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            Mat4::from_scale(Vec3::splat(0.5)),
        );
        let path = temp_path("roundtrip.z");
        map.save_zfile(&path, &cache).unwrap();
        let (seg, w2c, w2s) = read_zfile(&path).unwrap();
        assert_eq!(seg.texels, depths);
        assert_eq!(w2c, Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(w2s, Mat4::from_scale(Vec3::splat(0.5)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn tiff_save_reopen_preserves_matrices() {
        let cache = cache();
        let map = ortho_light_map(&cache, 2.5);
        let path = temp_path("light.shad");
        map.save(&path, &cache).unwrap();
        let reopened = ShadowMap::open(path.to_str().unwrap(), &[], &cache).unwrap();
        assert_eq!(reopened.resolution(), (32, 32));
        assert_eq!(*reopened.world_to_camera(), Mat4::IDENTITY);
        let _ = std::fs::remove_file(&path);
    }
}
