//! Axis-Aligned Bounds
//!
//! The 3D bound used for primitive culling, bucket binding and the
//! occlusion hierarchy. An empty bound is inverted (min = +inf, max = -inf)
//! so that union and point-encapsulation work without a validity flag.

use glam::{Mat4, Vec2, Vec3};

use super::transform_point;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bound {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bound {
    /// The inverted empty bound.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bound = Self::EMPTY;
        for p in points {
            bound.encapsulate(p);
        }
        bound
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Grows the bound to contain `p`.
    pub fn encapsulate(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Expands the bound outward by `amount` on every axis.
    #[must_use]
    pub fn inflate(&self, amount: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    /// True when the 2D projection of the bound contains `p`, with the
    /// half-open convention used by the sample tests.
    #[must_use]
    pub fn contains2d(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Transforms all eight corners and rebounds. Perspective matrices are
    /// handled through the homogeneous divide.
    #[must_use]
    pub fn transform(&self, m: &Mat4) -> Self {
        let mut out = Self::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.encapsulate(transform_point(m, corner));
        }
        out
    }
}
