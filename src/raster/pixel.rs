//! Pixels and Sample Data
//!
//! Each pixel owns an `Xs × Ys` set of stratified sub-pixel samples:
//! canonical multi-jittered positions, a shared-offset time distribution
//! over the shutter, and shuffled concentric-disk lens offsets. Sample
//! hits accumulate in a z-sorted entry list with an opaque fast path;
//! composition resolves CSG, walks entries back to front, and collapses
//! to one color, alpha and depth per sample.

use bitflags::bitflags;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use smallvec::SmallVec;

use crate::csg::{CsgNodeId, CsgTree};
use crate::math::Color;
use crate::state::DepthFilter;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SampleFlags: u8 {
        const VALID = 1;
        const MATTE = 2;
        const OCCLUDES = 4;
        const PROCESSED = 8;
    }
}

/// One surface hit recorded at a sample.
#[derive(Debug, Clone, Copy)]
pub struct ImageSample {
    pub z: f32,
    pub color: Color,
    pub opacity: Color,
    pub flags: SampleFlags,
    pub csg: Option<CsgNodeId>,
}

/// The collapsed result of composing one sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolvedSample {
    pub color: Color,
    pub alpha: f32,
    pub depth: f32,
    pub coverage: f32,
}

/// One stratified sub-pixel sample.
#[derive(Debug, Clone)]
pub struct SampleData {
    /// Absolute raster position.
    pub position: Vec2,
    /// Sample time within the shutter interval.
    pub time: f32,
    /// Lens offset on the unit disk.
    pub dof_offset: Vec2,
    /// Which stratum the lens offset came from, for batched tests.
    pub dof_index: usize,
    /// Hits sorted by increasing z.
    pub entries: SmallVec<[ImageSample; 4]>,
    /// Depth of the nearest fully-opaque hit; entries beyond it are
    /// discarded.
    pub opaque_z: f32,
    pub resolved: ResolvedSample,
}

impl SampleData {
    fn new(position: Vec2, time: f32, dof_offset: Vec2, dof_index: usize) -> Self {
        Self {
            position,
            time,
            dof_offset,
            dof_index,
            entries: SmallVec::new(),
            opaque_z: f32::INFINITY,
            resolved: ResolvedSample::default(),
        }
    }

    /// Inserts a hit in z order. Exact-z collisions average color and
    /// opacity, suppressing double hits along shared micropolygon edges.
    /// Fully-occluding hits truncate everything behind them.
    pub fn insert(&mut self, entry: ImageSample) {
        if entry.z > self.opaque_z {
            return;
        }
        let idx = self.entries.partition_point(|e| e.z < entry.z);
        if idx < self.entries.len() && self.entries[idx].z == entry.z {
            let existing = &mut self.entries[idx];
            existing.color = (existing.color + entry.color) * 0.5;
            existing.opacity = (existing.opacity + entry.opacity) * 0.5;
            return;
        }
        self.entries.insert(idx, entry);
        if entry.flags.contains(SampleFlags::OCCLUDES) && entry.z < self.opaque_z {
            self.opaque_z = entry.z;
            let keep = self.entries.partition_point(|e| e.z <= self.opaque_z);
            self.entries.truncate(keep);
        }
    }

    /// Resolves CSG membership: walking front to back, each tagged entry
    /// toggles its leaf's inside state and survives only when the
    /// crossing changes the combined solid's state.
    fn resolve_csg(&mut self, tree: &CsgTree) {
        if self.entries.iter().all(|e| e.csg.is_none()) {
            return;
        }
        let mut states = vec![false; tree.node_count()];
        let mut kept: SmallVec<[ImageSample; 4]> = SmallVec::new();
        for mut entry in self.entries.drain(..) {
            match entry.csg {
                None => kept.push(entry),
                Some(leaf) => {
                    let root = tree.root_of(leaf);
                    let before = tree.inside(root, &states);
                    let state = &mut states[leaf.0 as usize];
                    *state = !*state;
                    let after = tree.inside(root, &states);
                    if before != after {
                        entry.csg = None;
                        kept.push(entry);
                    }
                }
            }
        }
        self.entries = kept;
    }

    /// Back-to-front composition with matte handling and the depth
    /// filter.
    pub fn combine(&mut self, tree: &CsgTree, depth_filter: DepthFilter, z_threshold: Color) {
        if self.entries.is_empty() {
            self.resolved = ResolvedSample {
                depth: f32::INFINITY,
                ..ResolvedSample::default()
            };
            return;
        }
        if !tree.is_empty() {
            self.resolve_csg(tree);
        }

        let mut color = Color::BLACK;
        let mut opacity = Color::BLACK;
        let mut nearest_depths = [f32::INFINITY, f32::INFINITY];
        let mut max_depth = f32::INFINITY;
        let mut depth_sum = 0.0f32;
        let mut depth_count = 0u32;
        for entry in self.entries.iter().rev() {
            if entry.flags.contains(SampleFlags::MATTE) {
                if entry.flags.contains(SampleFlags::OCCLUDES) {
                    color = Color::BLACK;
                    opacity = Color::BLACK;
                } else {
                    // Matte attenuates what lies behind it with a black
                    // source.
                    color = color * (Color::WHITE - entry.opacity);
                    opacity = opacity * (Color::WHITE - entry.opacity);
                }
            } else {
                color = color * (Color::WHITE - entry.opacity) + entry.color;
                opacity = (Color::WHITE - opacity) * entry.opacity + opacity;
            }
            if entry.opacity.any_channel_reaches(z_threshold) {
                nearest_depths[1] = nearest_depths[0];
                nearest_depths[0] = entry.z;
                if !max_depth.is_finite() {
                    max_depth = entry.z;
                }
                depth_sum += entry.z;
                depth_count += 1;
            }
        }

        let depth = match depth_filter {
            DepthFilter::Min => nearest_depths[0],
            DepthFilter::Midpoint => {
                if nearest_depths[1].is_finite() {
                    (nearest_depths[0] + nearest_depths[1]) * 0.5
                } else {
                    nearest_depths[0]
                }
            }
            DepthFilter::Max => max_depth,
            DepthFilter::Average => {
                if depth_count > 0 {
                    depth_sum / depth_count as f32
                } else {
                    f32::INFINITY
                }
            }
        };

        self.resolved = ResolvedSample {
            color,
            alpha: opacity.average().clamp(0.0, 1.0),
            depth,
            coverage: if self.entries.is_empty() { 0.0 } else { 1.0 },
        };
    }

    /// Depth of the nearest occluding hit, for the occlusion hierarchy.
    #[must_use]
    pub fn occluder_depth(&self) -> f32 {
        self.opaque_z
    }
}

/// Seed for all of a pixel's jitter streams: keyed by bucket and pixel
/// coordinates so output is independent of worker scheduling.
#[must_use]
pub fn sample_seed(bucket_x: u32, bucket_y: u32, pixel_x: u32, pixel_y: u32) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for v in [bucket_x, bucket_y, pixel_x, pixel_y] {
        h ^= u64::from(v).wrapping_add(0x9e37_79b9_7f4a_7c15);
        h = h.wrapping_mul(0x100_0000_01b3);
    }
    h
}

/// One output pixel with its sample set.
#[derive(Debug, Clone)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
    pub samples: Vec<SampleData>,
    /// Filtered outputs.
    pub color: Color,
    pub alpha: f32,
    pub depth: f32,
}

impl Pixel {
    /// Builds the pixel's stratified samples.
    ///
    /// Positions use the canonical multi-jitter: one sample per sub-cell
    /// of the `xs × ys` partition, y-coordinates shuffled within each
    /// row of cells and x-coordinates within each column, preserving
    /// stratification on both axes at once. Times share a single random
    /// offset per pixel; lens offsets are a shuffled concentric-disk
    /// mapping of a regular grid.
    #[must_use]
    pub fn new(
        x: u32,
        y: u32,
        xs: usize,
        ys: usize,
        shutter: (f32, f32),
        jitter: bool,
        seed: u64,
    ) -> Self {
        let n = xs * ys;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut positions = vec![Vec2::ZERO; n];

        if jitter {
            // Canonical multi-jittered pattern on the (xs, ys) grid of
            // cells, each cell subdivided into n sub-cells.
            let mut xi = vec![0.0f32; n];
            let mut yi = vec![0.0f32; n];
            for row in 0..ys {
                for col in 0..xs {
                    let which = row * xs + col;
                    xi[which] = row as f32;
                    yi[which] = col as f32;
                }
            }
            // Shuffle y within each row of cells.
            for row in 0..ys {
                for col in 0..xs {
                    let k = row + rng.random_range(0..(ys - row));
                    let i1 = row * xs + col;
                    let i2 = k * xs + col;
                    yi.swap(i1, i2);
                }
            }
            // Shuffle x within each column of cells.
            for col in 0..xs {
                for row in 0..ys {
                    let k = row + rng.random_range(0..(ys - row));
                    let i1 = row * xs + col;
                    let i2 = k * xs + col;
                    xi.swap(i1, i2);
                }
            }
            let subcell = 1.0 / n as f32;
            let cell_w = 1.0 / xs as f32;
            let cell_h = 1.0 / ys as f32;
            let mut which = 0usize;
            for row in 0..ys {
                let sy = row as f32 * cell_h;
                for col in 0..xs {
                    let sx = col as f32 * cell_w;
                    positions[which] = Vec2::new(
                        xi[which] * subcell + subcell * 0.5 + sx,
                        yi[which] * subcell + subcell * 0.5 + sy,
                    );
                    which += 1;
                }
            }
        } else {
            for row in 0..ys {
                for col in 0..xs {
                    positions[row * xs + col] = Vec2::new(
                        (col as f32 + 0.5) / xs as f32,
                        (row as f32 + 0.5) / ys as f32,
                    );
                }
            }
        }

        // Times: stratified with one shared random offset per pixel.
        let (open, close) = shutter;
        let dtime = 1.0 / n as f32;
        let time_offset = if jitter { rng.random::<f32>() * dtime } else { 0.0 };

        // Lens offsets: regular grid mapped to the unit disk, shuffled.
        let mut dof: Vec<(usize, Vec2)> = (0..n)
            .map(|i| {
                let gx = (i % xs) as f32;
                let gy = (i / xs) as f32;
                let square = Vec2::new(
                    (gx + 0.5) / xs as f32 * 2.0 - 1.0,
                    (gy + 0.5) / ys as f32 * 2.0 - 1.0,
                );
                (i, concentric_disk(square))
            })
            .collect();
        if jitter {
            for i in (1..n).rev() {
                let j = rng.random_range(0..=i);
                dof.swap(i, j);
            }
        }

        let origin = Vec2::new(x as f32, y as f32);
        let samples = (0..n)
            .map(|i| {
                let time = open + (i as f32 * dtime + time_offset) * (close - open);
                SampleData::new(origin + positions[i], time, dof[i].1, dof[i].0)
            })
            .collect();

        Self {
            x,
            y,
            samples,
            color: Color::BLACK,
            alpha: 0.0,
            depth: f32::INFINITY,
        }
    }

    pub fn combine(&mut self, tree: &CsgTree, depth_filter: DepthFilter, z_threshold: Color) {
        for sample in &mut self.samples {
            sample.combine(tree, depth_filter, z_threshold);
        }
        // The pixel depth applies the same filter across its samples.
        let depths: Vec<f32> = self
            .samples
            .iter()
            .filter(|s| s.resolved.depth.is_finite())
            .map(|s| s.resolved.depth)
            .collect();
        self.depth = if depths.is_empty() {
            f32::INFINITY
        } else {
            match depth_filter {
                DepthFilter::Min | DepthFilter::Midpoint => {
                    depths.iter().copied().fold(f32::INFINITY, f32::min)
                }
                DepthFilter::Max => depths.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                DepthFilter::Average => depths.iter().sum::<f32>() / depths.len() as f32,
            }
        };
    }

    /// Deepest guaranteed occluder across the pixel, infinite when any
    /// sample is uncovered.
    #[must_use]
    pub fn max_occluder_depth(&self) -> f32 {
        self.samples
            .iter()
            .map(SampleData::occluder_depth)
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Shirley-Chiu concentric square-to-disk mapping.
fn concentric_disk(p: Vec2) -> Vec2 {
    if p.x == 0.0 && p.y == 0.0 {
        return Vec2::ZERO;
    }
    let (r, theta) = if p.x.abs() > p.y.abs() {
        (p.x, std::f32::consts::FRAC_PI_4 * (p.y / p.x))
    } else {
        (
            p.y,
            std::f32::consts::FRAC_PI_2 - std::f32::consts::FRAC_PI_4 * (p.x / p.y),
        )
    };
    Vec2::new(r * theta.cos(), r * theta.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque_entry(z: f32, value: f32) -> ImageSample {
        ImageSample {
            z,
            color: Color::splat(value),
            opacity: Color::WHITE,
            flags: SampleFlags::VALID | SampleFlags::OCCLUDES,
            csg: None,
        }
    }

    fn translucent_entry(z: f32, value: f32, opacity: f32) -> ImageSample {
        ImageSample {
            z,
            color: Color::splat(value * opacity),
            opacity: Color::splat(opacity),
            flags: SampleFlags::VALID,
            csg: None,
        }
    }

    #[test]
    fn entries_stay_sorted() {
        let mut s = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
        for z in [3.0, 1.0, 2.0] {
            s.insert(translucent_entry(z, 1.0, 0.5));
        }
        let zs: Vec<f32> = s.entries.iter().map(|e| e.z).collect();
        assert_eq!(zs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn equal_z_hits_average() {
        let mut s = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
        s.insert(translucent_entry(1.0, 1.0, 1.0));
        s.insert(translucent_entry(1.0, 0.0, 1.0));
        assert_eq!(s.entries.len(), 1);
        assert!((s.entries[0].color.r - 0.5).abs() < 1e-6);
    }

    #[test]
    fn opaque_fast_path_truncates() {
        let mut s = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
        s.insert(translucent_entry(5.0, 1.0, 0.5));
        s.insert(opaque_entry(2.0, 1.0));
        assert_eq!(s.entries.len(), 1);
        // Later, farther hits are rejected outright.
        s.insert(translucent_entry(4.0, 1.0, 0.5));
        assert_eq!(s.entries.len(), 1);
        // Nearer hits still land.
        s.insert(translucent_entry(1.0, 1.0, 0.5));
        assert_eq!(s.entries.len(), 2);
    }

    #[test]
    fn combine_composites_front_to_back() {
        let mut s = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
        s.insert(opaque_entry(2.0, 0.25));
        s.insert(translucent_entry(1.0, 1.0, 0.5));
        s.combine(&CsgTree::new(), DepthFilter::Min, Color::WHITE);
        // 0.5 from the near translucent layer + 0.25 * (1 - 0.5) behind.
        assert!((s.resolved.color.r - 0.625).abs() < 1e-5);
        assert!((s.resolved.depth - 2.0).abs() < 1e-6);
    }

    #[test]
    fn matte_occluder_blacks_out_background() {
        let mut s = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
        s.insert(opaque_entry(3.0, 1.0));
        s.insert(ImageSample {
            z: 1.0,
            color: Color::WHITE,
            opacity: Color::WHITE,
            flags: SampleFlags::VALID | SampleFlags::MATTE | SampleFlags::OCCLUDES,
            csg: None,
        });
        s.combine(&CsgTree::new(), DepthFilter::Min, Color::WHITE);
        assert_eq!(s.resolved.color, Color::BLACK);
        assert!((s.resolved.alpha - 0.0).abs() < 1e-6);
    }

    #[test]
    fn depth_filters() {
        let make = || {
            let mut s = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
            // Two qualifying opaque-ish layers at z = 1 and z = 3.
            s.insert(translucent_entry(3.0, 1.0, 1.0));
            s.insert(translucent_entry(1.0, 1.0, 1.0));
            s
        };
        let mut s = make();
        s.combine(&CsgTree::new(), DepthFilter::Min, Color::WHITE);
        assert!((s.resolved.depth - 1.0).abs() < 1e-6);
        let mut s = make();
        s.combine(&CsgTree::new(), DepthFilter::Midpoint, Color::WHITE);
        assert!((s.resolved.depth - 2.0).abs() < 1e-6);
        let mut s = make();
        s.combine(&CsgTree::new(), DepthFilter::Max, Color::WHITE);
        assert!((s.resolved.depth - 3.0).abs() < 1e-6);
        let mut s = make();
        s.combine(&CsgTree::new(), DepthFilter::Average, Color::WHITE);
        assert!((s.resolved.depth - 2.0).abs() < 1e-6);
    }

    #[test]
    fn csg_difference_carves_hole() {
        use crate::state::SolidOp;
        let mut tree = CsgTree::new();
        let diff = tree.add(SolidOp::Difference, None);
        let a = tree.add(SolidOp::Primitive, Some(diff));
        let b = tree.add(SolidOp::Primitive, Some(diff));

        // enter-A, enter-B, exit-B, exit-A along z; B inside A.
        let mut s = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
        for (z, leaf) in [(1.0, a), (2.0, b), (3.0, b), (4.0, a)] {
            s.insert(ImageSample {
                z,
                color: Color::splat(0.5),
                opacity: Color::splat(0.5),
                flags: SampleFlags::VALID,
                csg: Some(leaf),
            });
        }
        s.resolve_csg(&tree);
        // Surviving crossings: enter-A (outside -> inside), enter-B
        // (inside -> carved out), exit-B (carved -> inside), exit-A.
        assert_eq!(s.entries.len(), 4);

        // A second ray passing only through B (no A): nothing visible.
        let mut s2 = SampleData::new(Vec2::ZERO, 0.0, Vec2::ZERO, 0);
        for (z, leaf) in [(2.0, b), (3.0, b)] {
            s2.insert(ImageSample {
                z,
                color: Color::splat(0.5),
                opacity: Color::splat(0.5),
                flags: SampleFlags::VALID,
                csg: Some(leaf),
            });
        }
        s2.resolve_csg(&tree);
        assert!(s2.entries.is_empty());
    }

    #[test]
    fn multijitter_is_stratified() {
        let pixel = Pixel::new(0, 0, 4, 4, (0.0, 0.0), true, sample_seed(0, 0, 0, 0));
        assert_eq!(pixel.samples.len(), 16);
        // One sample in every cell of the 4x4 partition.
        let mut cells = [false; 16];
        for s in &pixel.samples {
            assert!((0.0..1.0).contains(&s.position.x));
            assert!((0.0..1.0).contains(&s.position.y));
            let cx = (s.position.x * 4.0) as usize;
            let cy = (s.position.y * 4.0) as usize;
            cells[cy * 4 + cx] = true;
        }
        assert!(cells.iter().all(|&c| c), "every cell holds one sample");
    }

    #[test]
    fn times_cover_shutter() {
        let pixel = Pixel::new(0, 0, 2, 2, (0.25, 0.75), true, sample_seed(0, 0, 1, 1));
        for s in &pixel.samples {
            assert!((0.25..=0.75).contains(&s.time));
        }
    }

    #[test]
    fn seeded_pixels_reproduce() {
        let a = Pixel::new(3, 4, 2, 2, (0.0, 1.0), true, sample_seed(0, 0, 3, 4));
        let b = Pixel::new(3, 4, 2, 2, (0.0, 1.0), true, sample_seed(0, 0, 3, 4));
        for (sa, sb) in a.samples.iter().zip(&b.samples) {
            assert_eq!(sa.position, sb.position);
            assert_eq!(sa.time, sb.time);
            assert_eq!(sa.dof_offset, sb.dof_offset);
        }
    }

    #[test]
    fn dof_offsets_on_unit_disk() {
        let pixel = Pixel::new(0, 0, 3, 3, (0.0, 1.0), true, sample_seed(1, 1, 0, 0));
        for s in &pixel.samples {
            assert!(s.dof_offset.length() <= 1.0 + 1e-5);
        }
    }
}
