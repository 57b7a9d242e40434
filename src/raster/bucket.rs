//! Buckets
//!
//! The per-bucket pixel frame: the bucket's core pixel region plus a
//! filter-width margin of extra pixels, so each bucket convolves its own
//! samples without waiting on neighbours. Sampling tests micropolygons
//! against every stratified sample the bound touches; the resolve stage
//! combines, filters with the precomputed kernel table, exposes and
//! quantises, then packs channels for the display.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::sync::Arc;

use crate::math::Color;
use crate::micropoly::MicroPolygon;
use crate::state::DisplayMode;
use crate::stats::Statistics;

use super::pixel::{ImageSample, Pixel, SampleFlags, sample_seed};
use super::FrameConfig;

/// A bucket's pixels, covering the core region expanded by the filter
/// margin on every side.
pub struct BucketFrame {
    pub bucket_x: u32,
    pub bucket_y: u32,
    /// Core region origin and size in pixels.
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    margin_x: u32,
    margin_y: u32,
    /// Row-major over the expanded region.
    pixels: Vec<Pixel>,
}

impl BucketFrame {
    #[must_use]
    pub fn new(config: &FrameConfig, bucket_x: u32, bucket_y: u32) -> Self {
        let x0 = config.crop_x_min + bucket_x * config.bucket_width;
        let y0 = config.crop_y_min + bucket_y * config.bucket_height;
        let width = config.bucket_width.min(config.crop_x_max.saturating_sub(x0));
        let height = config
            .bucket_height
            .min(config.crop_y_max.saturating_sub(y0));
        let (mx, my) = (config.margin_x, config.margin_y);

        let ex0 = x0 as i64 - mx as i64;
        let ey0 = y0 as i64 - my as i64;
        let ew = width + 2 * mx;
        let eh = height + 2 * my;
        let mut pixels = Vec::with_capacity((ew * eh) as usize);
        for row in 0..eh {
            for col in 0..ew {
                let gx = ex0 + i64::from(col);
                let gy = ey0 + i64::from(row);
                // Pixels outside the image still exist (their samples
                // stay empty) so indexing stays rectangular.
                let (px, py) = (gx.max(0) as u32, gy.max(0) as u32);
                pixels.push(Pixel::new(
                    px,
                    py,
                    config.x_samples as usize,
                    config.y_samples as usize,
                    (config.shutter_open, config.shutter_close),
                    config.jitter,
                    sample_seed(bucket_x, bucket_y, px, py),
                ));
            }
        }
        Self {
            bucket_x,
            bucket_y,
            x0,
            y0,
            width,
            height,
            margin_x: mx,
            margin_y: my,
            pixels,
        }
    }

    fn expanded_origin(&self) -> (i64, i64) {
        (
            i64::from(self.x0) - i64::from(self.margin_x),
            i64::from(self.y0) - i64::from(self.margin_y),
        )
    }

    fn expanded_dims(&self) -> (u32, u32) {
        (
            self.width + 2 * self.margin_x,
            self.height + 2 * self.margin_y,
        )
    }

    /// The raster region this bucket samples: core plus margins.
    #[must_use]
    pub fn sample_region(&self) -> (f32, f32, f32, f32) {
        let (ex0, ey0) = self.expanded_origin();
        let (ew, eh) = self.expanded_dims();
        (
            ex0 as f32,
            ey0 as f32,
            (ex0 + i64::from(ew)) as f32,
            (ey0 + i64::from(eh)) as f32,
        )
    }

    /// Tests one micropolygon against every sample its bound touches.
    pub fn sample_mpg(&mut self, mpg: &MicroPolygon, config: &FrameConfig, stats: &Statistics) {
        let mut bound = mpg.bound;
        // Depth of field widens the bound by the largest lens blur over
        // the z range.
        let coc = if config.dof_active {
            let r = config
                .coc_radius_pixels(bound.min.z)
                .max(config.coc_radius_pixels(bound.max.z));
            bound = crate::math::Bound::new(
                bound.min - glam::Vec3::new(r, r, 0.0),
                bound.max + glam::Vec3::new(r, r, 0.0),
            );
            config.coc_radius_pixels(bound.center().z)
        } else {
            0.0
        };

        if bound.min.z > config.far_clip || bound.max.z < config.near_clip {
            return;
        }

        let (ex0, ey0) = self.expanded_origin();
        let (ew, eh) = self.expanded_dims();
        let px0 = (bound.min.x.floor() as i64).max(ex0);
        let py0 = (bound.min.y.floor() as i64).max(ey0);
        let px1 = (bound.max.x.ceil() as i64).min(ex0 + i64::from(ew) - 1);
        let py1 = (bound.max.y.ceil() as i64).min(ey0 + i64::from(eh) - 1);
        if px1 < px0 || py1 < py0 {
            return;
        }

        let mut tested = 0u64;
        let mut bound_hits = 0u64;
        let mut hits = 0u64;
        for gy in py0..=py1 {
            for gx in px0..=px1 {
                let local = ((gy - ey0) as usize) * ew as usize + (gx - ex0) as usize;
                let pixel = &mut self.pixels[local];
                for sample in &mut pixel.samples {
                    tested += 1;
                    let offset = if config.dof_active {
                        -sample.dof_offset * coc
                    } else {
                        Vec2::ZERO
                    };
                    // The containment pre-test shifts the sample rather
                    // than the bound.
                    if !bound.contains2d(sample.position - offset) {
                        continue;
                    }
                    bound_hits += 1;
                    if let Some(z) = mpg.sample(sample.position, sample.time, offset) {
                        if z < config.near_clip || z > config.far_clip {
                            continue;
                        }
                        hits += 1;
                        let mut flags = SampleFlags::VALID;
                        if mpg.matte {
                            flags |= SampleFlags::MATTE;
                        }
                        if mpg.occludes {
                            flags |= SampleFlags::OCCLUDES;
                        }
                        sample.insert(ImageSample {
                            z,
                            color: mpg.color,
                            opacity: mpg.opacity,
                            flags,
                            csg: mpg.csg,
                        });
                    }
                }
            }
        }
        Statistics::add(&stats.samples_tested, tested);
        Statistics::add(&stats.sample_bound_hits, bound_hits);
        Statistics::add(&stats.sample_hits, hits);
    }

    /// Collapses every sample's entry list.
    pub fn combine(&mut self, config: &FrameConfig) {
        for pixel in &mut self.pixels {
            pixel.combine(&config.csg, config.depth_filter, config.z_threshold);
        }
    }

    /// Convolves sub-samples with the kernel table, normalising by the
    /// weights actually applied so image edges do not darken.
    pub fn filter(&mut self, config: &FrameConfig) {
        let (ew, _) = self.expanded_dims();
        let subs = (config.x_samples * config.y_samples) as usize;
        let nx = (2 * self.margin_x + 1) as usize;
        let ny = (2 * self.margin_y + 1) as usize;

        let mut filtered = Vec::with_capacity((self.width * self.height) as usize);
        for py in 0..self.height as usize {
            for px in 0..self.width as usize {
                let gx = self.x0 + px as u32;
                let gy = self.y0 + py as u32;
                let mut color = Color::BLACK;
                let mut alpha = 0.0f32;
                let mut weight_total = 0.0f32;
                for dy in 0..ny {
                    for dx in 0..nx {
                        let ngx = i64::from(gx) + dx as i64 - i64::from(self.margin_x);
                        let ngy = i64::from(gy) + dy as i64 - i64::from(self.margin_y);
                        if ngx < 0
                            || ngy < 0
                            || ngx >= i64::from(config.x_resolution)
                            || ngy >= i64::from(config.y_resolution)
                        {
                            continue;
                        }
                        let local = (py + dy) * ew as usize + (px + dx);
                        let pixel = &self.pixels[local];
                        let table_row = (dy * nx + dx) * subs;
                        for (si, sample) in pixel.samples.iter().enumerate() {
                            let w = config.filter_table[table_row + si];
                            if w == 0.0 {
                                continue;
                            }
                            color += sample.resolved.color * w;
                            alpha += sample.resolved.alpha * w;
                            weight_total += w;
                        }
                    }
                }
                if weight_total > 0.0 {
                    filtered.push((color / weight_total, alpha / weight_total));
                } else {
                    filtered.push((Color::BLACK, 0.0));
                }
            }
        }

        for (i, (color, alpha)) in filtered.into_iter().enumerate() {
            let px = i % self.width as usize;
            let py = i / self.width as usize;
            let local = (py + self.margin_y as usize) * ew as usize + px + self.margin_x as usize;
            self.pixels[local].color = color;
            self.pixels[local].alpha = alpha;
        }

        // Imager: background fills uncovered coverage after filtering.
        if let Some(background) = config.imager_background {
            for py in 0..self.height {
                for px in 0..self.width {
                    let pixel = self.core_pixel_mut(px, py);
                    let a = pixel.alpha.clamp(0.0, 1.0);
                    pixel.color += background * (1.0 - a);
                }
            }
        }
    }

    /// `C' = (C · gain)^(1/gamma)` per channel.
    pub fn expose(&mut self, config: &FrameConfig) {
        if config.exposure_gain == 1.0 && config.exposure_gamma == 1.0 {
            return;
        }
        let inv_gamma = 1.0 / config.exposure_gamma;
        for py in 0..self.height {
            for px in 0..self.width {
                let pixel = self.core_pixel_mut(px, py);
                let mut c = pixel.color;
                if config.exposure_gain != 1.0 {
                    c *= config.exposure_gain;
                }
                if config.exposure_gamma != 1.0 {
                    c = c.powf(inv_gamma);
                }
                pixel.color = c;
            }
        }
    }

    /// Dithered quantisation; skipped entirely when the dither amplitude
    /// is zero, leaving floats for the display to convert.
    pub fn quantize(&mut self, config: &FrameConfig) {
        if config.mode.contains(DisplayMode::RGB) {
            let q = config.color_quantize;
            if q.dither != 0.0 {
                for py in 0..self.height {
                    for px in 0..self.width {
                        let seed = sample_seed(self.bucket_x, self.bucket_y, self.x0 + px, self.y0 + py)
                            ^ 0x5151_7ea1;
                        let mut rng = StdRng::seed_from_u64(seed);
                        let pixel = self.core_pixel_mut(px, py);
                        let quant = |v: f32, r: f32| -> f32 {
                            let stepped = (q.one as f32 * v + q.dither * r - 0.5).floor();
                            stepped.clamp(q.min as f32, q.max as f32)
                        };
                        let c = pixel.color;
                        pixel.color = Color::new(
                            quant(c.r, rng.random::<f32>()),
                            quant(c.g, rng.random::<f32>()),
                            quant(c.b, rng.random::<f32>()),
                        );
                        pixel.alpha = quant(pixel.alpha, rng.random::<f32>());
                    }
                }
            }
        } else if config.mode.contains(DisplayMode::Z) {
            let q = config.depth_quantize;
            if q.dither != 0.0 {
                for py in 0..self.height {
                    for px in 0..self.width {
                        let seed = sample_seed(self.bucket_x, self.bucket_y, self.x0 + px, self.y0 + py)
                            ^ 0x5151_7ea1;
                        let mut rng = StdRng::seed_from_u64(seed);
                        let pixel = self.core_pixel_mut(px, py);
                        let stepped =
                            (q.one as f32 * pixel.depth + q.dither * rng.random::<f32>() - 0.5)
                                .floor();
                        pixel.depth = stepped.clamp(q.min as f32, q.max as f32);
                    }
                }
            }
        }
    }

    fn core_pixel_index(&self, px: u32, py: u32) -> usize {
        let (ew, _) = self.expanded_dims();
        ((py + self.margin_y) * ew + px + self.margin_x) as usize
    }

    #[must_use]
    pub fn core_pixel(&self, px: u32, py: u32) -> &Pixel {
        &self.pixels[self.core_pixel_index(px, py)]
    }

    fn core_pixel_mut(&mut self, px: u32, py: u32) -> &mut Pixel {
        let idx = self.core_pixel_index(px, py);
        &mut self.pixels[idx]
    }

    /// The deepest guaranteed occluder across the core pixels, for the
    /// occlusion hierarchy.
    #[must_use]
    pub fn max_occluder_depth(&self) -> f32 {
        let mut max_depth = f32::NEG_INFINITY;
        for py in 0..self.height {
            for px in 0..self.width {
                max_depth = max_depth.max(self.core_pixel(px, py).max_occluder_depth());
            }
        }
        max_depth
    }

    /// Packs the core pixels channel-interleaved per the display mode.
    #[must_use]
    pub fn pack(&self, mode: DisplayMode) -> Vec<f32> {
        let channels = mode.channel_count();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * channels);
        for py in 0..self.height {
            for px in 0..self.width {
                let pixel = self.core_pixel(px, py);
                if mode.contains(DisplayMode::RGB) {
                    out.extend_from_slice(&[pixel.color.r, pixel.color.g, pixel.color.b]);
                }
                if mode.contains(DisplayMode::A) {
                    out.push(pixel.alpha);
                }
                if mode.contains(DisplayMode::Z) {
                    out.push(pixel.depth);
                }
            }
        }
        out
    }

    /// Runs the full resolve pipeline on a sampled bucket.
    pub fn resolve(&mut self, config: &FrameConfig, mpgs: &[Arc<MicroPolygon>], stats: &Statistics) {
        for mpg in mpgs {
            self.sample_mpg(mpg, config, stats);
        }
        self.combine(config);
        self.filter(config);
        self.expose(config);
        self.quantize(config);
    }
}
