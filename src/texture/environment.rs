//! Environment Maps
//!
//! Reflection-direction sampling over either a latitude/longitude image
//! or a six-face cube map. A lookup sweeps the quad of directions
//! (R, R+sw, R+tw, R+sw+tw); the swept area is supersampled on a small
//! grid of interpolated directions, each projected to its face, and the
//! per-face contributions are weighted by the sub-area each face covers.

use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec3;

use crate::errors::{RenderError, Result};
use crate::math::Color;

use super::file::{self, TextureFormat};
use super::{Segment, SegmentKey, TextureCache, locate};

/// Supersampling grid across the swept direction quad.
const SWEEP_GRID: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvKind {
    LatLong,
    CubeFace,
}

pub struct EnvironmentMap {
    id: u64,
    name: String,
    path: PathBuf,
    kind: EnvKind,
    /// Square face size for cube maps, full image size for latlong.
    face_size: (u32, u32),
    channels: u32,
}

impl EnvironmentMap {
    /// Opens an environment map; the kind comes from its format tag. A
    /// cube map must carry six directories of equal size.
    pub fn open(name: &str, search_paths: &[String], cache: &TextureCache) -> Result<Arc<Self>> {
        let path = locate(name, search_paths)
            .ok_or_else(|| RenderError::FileNotFound(name.to_string()))?;
        let info = file::probe(&path)?;
        let kind = match info.format {
            Some(TextureFormat::CubeFace) => EnvKind::CubeFace,
            Some(TextureFormat::LatLong) => EnvKind::LatLong,
            // An untagged image is taken as latlong.
            None | Some(TextureFormat::Plain) => EnvKind::LatLong,
            Some(TextureFormat::Shadow) => {
                return Err(RenderError::InvalidData(format!(
                    "\"{name}\" is a shadow map, not an environment"
                )));
            }
        };
        if kind == EnvKind::CubeFace {
            if info.levels.len() < 6 {
                return Err(RenderError::InvalidData(format!(
                    "cube environment \"{name}\" holds {} faces, expected 6",
                    info.levels.len()
                )));
            }
            if info.levels[..6].iter().any(|&d| d != info.levels[0]) {
                return Err(RenderError::InvalidData(format!(
                    "cube environment \"{name}\" has mismatched face sizes"
                )));
            }
        }
        Ok(Arc::new(Self {
            id: cache.allocate_map_id(),
            name: name.to_string(),
            path,
            kind,
            face_size: info.levels[0],
            channels: info.channels,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn face_segment(&self, cache: &TextureCache, face: u32) -> Result<Arc<Segment>> {
        let key = SegmentKey {
            map_id: self.id,
            face,
            level: 0,
        };
        cache.segment(key, || file::read_level(&self.path, face))
    }

    fn texel_color(&self, seg: &Segment, x: u32, y: u32) -> Color {
        let t = seg.texel(x.min(seg.width - 1), y.min(seg.height - 1));
        match self.channels {
            1 | 2 => Color::splat(t[0]),
            _ => Color::new(t[0], t[1], t[2]),
        }
    }

    /// Bilinear fetch at (s, t) in [0,1]² of a face segment.
    fn bilinear(&self, seg: &Segment, s: f32, t: f32) -> Color {
        let x = (s.clamp(0.0, 1.0) * (seg.width - 1) as f32).max(0.0);
        let y = (t.clamp(0.0, 1.0) * (seg.height - 1) as f32).max(0.0);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(seg.width - 1);
        let y1 = (y0 + 1).min(seg.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let top = self
            .texel_color(seg, x0, y0)
            .lerp(self.texel_color(seg, x1, y0), fx);
        let bottom = self
            .texel_color(seg, x0, y1)
            .lerp(self.texel_color(seg, x1, y1), fx);
        top.lerp(bottom, fy)
    }

    /// Samples along the reflection quad and combines per-face
    /// contributions weighted by covered sub-area.
    pub fn sample(
        &self,
        cache: &TextureCache,
        r: Vec3,
        swidth: Vec3,
        twidth: Vec3,
        sblur: f32,
        tblur: f32,
    ) -> Result<Color> {
        let blur = Vec3::splat((sblur + tblur) * 0.5 * r.length().max(1e-6));
        let sw = swidth + blur;
        let tw = twidth + blur;

        let mut accum = Color::BLACK;
        let mut total = 0.0f32;
        // Weighted by sub-area: every grid cell of the swept quad carries
        // equal solid-angle weight, so per-face weight is the fraction of
        // cells landing on that face.
        for gy in 0..SWEEP_GRID {
            let fy = (gy as f32 + 0.5) / SWEEP_GRID as f32 - 0.5;
            for gx in 0..SWEEP_GRID {
                let fx = (gx as f32 + 0.5) / SWEEP_GRID as f32 - 0.5;
                let dir = r + sw * fx + tw * fy;
                if dir.length_squared() <= f32::EPSILON {
                    continue;
                }
                let c = match self.kind {
                    EnvKind::LatLong => {
                        let (s, t) = latlong_st(dir);
                        let seg = self.face_segment(cache, 0)?;
                        self.bilinear(&seg, s, t)
                    }
                    EnvKind::CubeFace => {
                        let (face, s, t) = cube_face_st(dir);
                        let seg = self.face_segment(cache, face)?;
                        self.bilinear(&seg, s, t)
                    }
                };
                accum += c;
                total += 1.0;
            }
        }
        if total > 0.0 {
            Ok(accum / total)
        } else {
            Ok(Color::BLACK)
        }
    }
}

/// Latitude/longitude parameterisation: s wraps the longitude, t runs
/// pole to pole with +y up.
fn latlong_st(dir: Vec3) -> (f32, f32) {
    let d = dir.normalize();
    let s = 0.5 + d.x.atan2(d.z) / (2.0 * std::f32::consts::PI);
    let t = 0.5 - d.y.asin() / std::f32::consts::PI;
    (s.rem_euclid(1.0), t.clamp(0.0, 1.0))
}

/// Face order: +x, -x, +y, -y, +z, -z.
fn cube_face_st(dir: Vec3) -> (u32, f32, f32) {
    let ax = dir.x.abs();
    let ay = dir.y.abs();
    let az = dir.z.abs();
    let (face, u, v, major) = if ax >= ay && ax >= az {
        if dir.x > 0.0 {
            (0, -dir.z, -dir.y, ax)
        } else {
            (1, dir.z, -dir.y, ax)
        }
    } else if ay >= ax && ay >= az {
        if dir.y > 0.0 {
            (2, dir.x, dir.z, ay)
        } else {
            (3, dir.x, -dir.z, ay)
        }
    } else if dir.z > 0.0 {
        (4, dir.x, -dir.y, az)
    } else {
        (5, -dir.x, -dir.y, az)
    };
    let s = 0.5 * (u / major + 1.0);
    let t = 0.5 * (v / major + 1.0);
    (face, s, t)
}

#[cfg(test)]
mod tests {
    use super::super::file::{WrapModes, write_map};
    use super::*;
    use crate::stats::Statistics;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("reyes-env-{}-{name}", std::process::id()));
        p
    }

    #[test]
    fn latlong_poles_and_equator() {
        let (_, t_up) = latlong_st(Vec3::Y);
        let (_, t_down) = latlong_st(Vec3::NEG_Y);
        let (_, t_fwd) = latlong_st(Vec3::Z);
        assert!(t_up < 0.01);
        assert!(t_down > 0.99);
        assert!((t_fwd - 0.5).abs() < 0.01);
    }

    #[test]
    fn cube_faces_cover_axes() {
        assert_eq!(cube_face_st(Vec3::X).0, 0);
        assert_eq!(cube_face_st(Vec3::NEG_X).0, 1);
        assert_eq!(cube_face_st(Vec3::Y).0, 2);
        assert_eq!(cube_face_st(Vec3::NEG_Y).0, 3);
        assert_eq!(cube_face_st(Vec3::Z).0, 4);
        assert_eq!(cube_face_st(Vec3::NEG_Z).0, 5);
        // Axis centre lands mid-face.
        let (_, s, t) = cube_face_st(Vec3::X);
        assert!((s - 0.5).abs() < 1e-6 && (t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn cube_sample_picks_face_color() {
        let path = temp_path("cube.tx");
        // Six 4x4 faces, each a distinct grey level.
        let faces: Vec<Segment> = (0..6)
            .map(|f| Segment {
                width: 4,
                height: 4,
                channels: 1,
                texels: vec![f as f32 / 5.0; 16],
            })
            .collect();
        write_map(
            &path,
            &faces,
            TextureFormat::CubeFace,
            Some(&WrapModes::default()),
            None,
        )
        .unwrap();
        let cache = TextureCache::new(4096, Arc::new(Statistics::new()));
        let env = EnvironmentMap::open(path.to_str().unwrap(), &[], &cache).unwrap();
        let c = env
            .sample(&cache, Vec3::Y, Vec3::ZERO, Vec3::ZERO, 0.0, 0.0)
            .unwrap();
        assert!((c.r - 2.0 / 5.0).abs() < 1e-4, "got {}", c.r);
        let _ = std::fs::remove_file(&path);
    }
}
