//! Plain Texture Maps
//!
//! Mipmapped 2D textures sampled by (s, t) with a filter footprint. Files
//! already carrying a mip chain are used directly; a plain image is
//! converted on first open by generating its chain in memory. Each mip
//! level lives in the shared segment cache and is reloaded (or
//! regenerated) after eviction.

use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::{RenderError, Result};
use crate::filters;
use crate::math::Color;

use super::file::{self, MapInfo, TextureFormat, WrapModes};
use super::{Segment, SegmentKey, TextureCache, WrapMode, locate};

#[derive(Debug)]
pub struct TextureMap {
    id: u64,
    name: String,
    path: PathBuf,
    /// Level dimensions, base first.
    levels: Vec<(u32, u32)>,
    channels: u32,
    wrapmodes: WrapModes,
    /// True when the file held no chain and levels past 0 are generated.
    generated: bool,
    /// True when the file carried no wrap-mode metadata; the open site
    /// reports `TextureMissingWrapMode` once.
    pub missing_wrapmodes: bool,
}

impl TextureMap {
    /// Opens a texture by name through the texture search path.
    pub fn open(name: &str, search_paths: &[String], cache: &TextureCache) -> Result<Arc<Self>> {
        let path = locate(name, search_paths)
            .ok_or_else(|| RenderError::FileNotFound(name.to_string()))?;
        let info: MapInfo = file::probe(&path)?;
        if matches!(info.format, Some(TextureFormat::Shadow)) {
            return Err(RenderError::InvalidData(format!(
                "\"{name}\" is a shadow map, not a texture"
            )));
        }
        let missing_wrapmodes = info.wrapmodes.is_none();
        let wrapmodes = info.wrapmodes.unwrap_or_default();

        let generated = info.levels.len() < 2 || info.format.is_none();
        let mut levels = vec![info.levels[0]];
        if generated {
            let (mut w, mut h) = info.levels[0];
            while w > 1 || h > 1 {
                w = (w / 2).max(1);
                h = (h / 2).max(1);
                levels.push((w, h));
            }
        } else {
            levels.extend(&info.levels[1..]);
        }

        Ok(Arc::new(Self {
            id: cache.allocate_map_id(),
            name: name.to_string(),
            path,
            levels,
            channels: info.channels,
            wrapmodes,
            generated,
            missing_wrapmodes,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn load_level(&self, level: u32) -> Result<Segment> {
        if !self.generated || level == 0 {
            return file::read_level(&self.path, level);
        }
        // Regenerate the chain down to the requested level.
        let mut current = file::read_level(&self.path, 0)?;
        for _ in 0..level {
            current = file::downsample(&current);
        }
        Ok(current)
    }

    fn segment(&self, cache: &TextureCache, level: u32) -> Result<Arc<Segment>> {
        let key = SegmentKey {
            map_id: self.id,
            face: 0,
            level,
        };
        cache.segment(key, || self.load_level(level))
    }

    fn texel_color(&self, seg: &Segment, x: u32, y: u32) -> Color {
        let t = seg.texel(x, y);
        match self.channels {
            1 => Color::splat(t[0]),
            2 => Color::new(t[0], t[0], t[0]),
            _ => Color::new(t[0], t[1], t[2]),
        }
    }

    /// One wrapped texel; black wrap returns black off the edge.
    fn fetch(&self, seg: &Segment, i: i64, j: i64) -> Color {
        match (
            self.wrapmodes.swrap.apply(i, seg.width),
            self.wrapmodes.twrap.apply(j, seg.height),
        ) {
            (Some(x), Some(y)) => self.texel_color(seg, x, y),
            _ => Color::BLACK,
        }
    }

    /// Filters the map over the footprint centred at (s, t).
    ///
    /// `swidth`/`twidth` are the footprint extents in texture units as
    /// derived from surface derivatives; `sblur`/`tblur` widen it.
    pub fn sample(
        &self,
        cache: &TextureCache,
        s: f32,
        t: f32,
        swidth: f32,
        twidth: f32,
        sblur: f32,
        tblur: f32,
    ) -> Result<Color> {
        let (base_w, base_h) = self.levels[0];
        let fs = (swidth * self.wrapmodes.swidth + sblur).max(1.0 / base_w as f32);
        let ft = (twidth * self.wrapmodes.twidth + tblur).max(1.0 / base_h as f32);

        // Pick the level whose texels roughly match the footprint.
        let texels_covered = (fs * base_w as f32).min(ft * base_h as f32).max(1.0);
        let level = texels_covered
            .log2()
            .floor()
            .clamp(0.0, (self.levels.len() - 1) as f32) as u32;
        let seg = self.segment(cache, level)?;

        let filter = filters::by_name(&self.wrapmodes.filter).unwrap_or(filters::box_filter);
        let fw = seg.width as f32;
        let fh = seg.height as f32;
        let cx = s * fw - 0.5;
        let cy = t * fh - 0.5;
        let rx = (fs * fw * 0.5).max(0.5);
        let ry = (ft * fh * 0.5).max(0.5);

        // Up to 4 taps per axis across the footprint.
        let nx = (rx * 2.0).ceil().min(4.0) as i64;
        let ny = (ry * 2.0).ceil().min(4.0) as i64;
        let mut accum = Color::BLACK;
        let mut weight_total = 0.0f32;
        for jy in 0..=ny {
            let fy = if ny == 0 { 0.0 } else { jy as f32 / ny as f32 - 0.5 };
            let py = cy + fy * 2.0 * ry;
            for jx in 0..=nx {
                let fx = if nx == 0 { 0.0 } else { jx as f32 / nx as f32 - 0.5 };
                let px = cx + fx * 2.0 * rx;
                let w = filter(px - cx, py - cy, 2.0 * rx, 2.0 * ry);
                if w <= 0.0 {
                    continue;
                }
                accum += self.fetch(&seg, px.round() as i64, py.round() as i64) * w;
                weight_total += w;
            }
        }
        if weight_total > 0.0 {
            Ok(accum / weight_total)
        } else {
            Ok(Color::BLACK)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::file::write_map;
    use super::*;
    use crate::stats::Statistics;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("reyes-texmap-{}-{name}", std::process::id()));
        p
    }

    fn write_flat(path: &std::path::Path, value: f32, wrap: Option<&WrapModes>) {
        let seg = Segment {
            width: 8,
            height: 8,
            channels: 1,
            texels: vec![value; 64],
        };
        let mut levels = vec![seg];
        levels.extend(file::generate_mip_chain(&levels[0]));
        write_map(path, &levels, TextureFormat::Plain, wrap, None).unwrap();
    }

    #[test]
    fn open_and_sample_flat_map() {
        let path = temp_path("flat.tx");
        write_flat(&path, 0.75, Some(&WrapModes::default()));
        let cache = TextureCache::new(4096, Arc::new(Statistics::new()));
        let map = TextureMap::open(path.to_str().unwrap(), &[], &cache).unwrap();
        assert!(!map.missing_wrapmodes);
        assert_eq!(map.level_count(), 4);
        let c = map.sample(&cache, 0.5, 0.5, 0.01, 0.01, 0.0, 0.0).unwrap();
        assert!((c.r - 0.75).abs() < 1e-4, "sampled {}", c.r);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn black_wrap_darkens_outside() {
        let path = temp_path("wrap.tx");
        write_flat(&path, 1.0, Some(&WrapModes::default()));
        let cache = TextureCache::new(4096, Arc::new(Statistics::new()));
        let map = TextureMap::open(path.to_str().unwrap(), &[], &cache).unwrap();
        let outside = map.sample(&cache, 2.0, 2.0, 0.01, 0.01, 0.0, 0.0).unwrap();
        assert!(outside.r < 0.01);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_not_found() {
        let cache = TextureCache::new(4096, Arc::new(Statistics::new()));
        let err = TextureMap::open("nonexistent.tx", &[], &cache).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::FileNotFound);
    }
}
