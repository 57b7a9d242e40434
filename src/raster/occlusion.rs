//! Occlusion Hierarchy
//!
//! A shared grid over the buckets tracking, per bucket, the deepest
//! guaranteed occluder: the maximum over its samples of each sample's
//! nearest fully-opaque depth. A primitive whose near z lies beyond that
//! value in every bucket it touches can never contribute and is culled.
//!
//! Values only tighten (they start unbounded and move nearer), so reads
//! racing with worker updates can at worst miss a culling opportunity —
//! never change the rendered result.

use std::sync::atomic::{AtomicU32, Ordering};

pub struct OcclusionGrid {
    width: usize,
    height: usize,
    /// f32 bit patterns; +inf until the bucket proves full coverage.
    values: Vec<AtomicU32>,
}

impl OcclusionGrid {
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        let values = (0..width * height)
            .map(|_| AtomicU32::new(f32::INFINITY.to_bits()))
            .collect();
        Self {
            width,
            height,
            values,
        }
    }

    fn index(&self, bx: usize, by: usize) -> usize {
        by * self.width + bx
    }

    /// Records a completed bucket's guaranteed-occluder depth. Only
    /// tightens the stored value.
    pub fn update(&self, bx: usize, by: usize, depth: f32) {
        if bx >= self.width || by >= self.height {
            return;
        }
        let slot = &self.values[self.index(bx, by)];
        let mut current = slot.load(Ordering::Relaxed);
        while depth < f32::from_bits(current) {
            match slot.compare_exchange_weak(
                current,
                depth.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    #[must_use]
    pub fn bucket_depth(&self, bx: usize, by: usize) -> f32 {
        f32::from_bits(self.values[self.index(bx, by)].load(Ordering::Relaxed))
    }

    /// True when a primitive spanning buckets `[bx0, bx1] × [by0, by1]`
    /// with near depth `zmin` is hidden everywhere.
    #[must_use]
    pub fn occluded(&self, bx0: usize, by0: usize, bx1: usize, by1: usize, zmin: f32) -> bool {
        let bx1 = bx1.min(self.width.saturating_sub(1));
        let by1 = by1.min(self.height.saturating_sub(1));
        for by in by0..=by1 {
            for bx in bx0..=bx1 {
                if zmin <= self.bucket_depth(bx, by) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unproven_buckets_never_occlude() {
        let grid = OcclusionGrid::new(4, 4);
        assert!(!grid.occluded(0, 0, 3, 3, 1000.0));
    }

    #[test]
    fn fully_covered_region_occludes_deeper_prims() {
        let grid = OcclusionGrid::new(4, 4);
        for by in 0..4 {
            for bx in 0..4 {
                grid.update(bx, by, 5.0);
            }
        }
        assert!(grid.occluded(1, 1, 2, 2, 6.0));
        assert!(!grid.occluded(1, 1, 2, 2, 4.0));
    }

    #[test]
    fn one_open_bucket_blocks_culling() {
        let grid = OcclusionGrid::new(2, 2);
        grid.update(0, 0, 5.0);
        grid.update(1, 0, 5.0);
        grid.update(0, 1, 5.0);
        // (1, 1) still unbounded.
        assert!(!grid.occluded(0, 0, 1, 1, 6.0));
    }

    #[test]
    fn update_only_tightens() {
        let grid = OcclusionGrid::new(1, 1);
        grid.update(0, 0, 5.0);
        grid.update(0, 0, 9.0);
        assert_eq!(grid.bucket_depth(0, 0), 5.0);
    }
}
