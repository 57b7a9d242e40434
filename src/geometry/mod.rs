//! Geometric Primitives
//!
//! Every surface the interface can emit, polymorphic over the capability
//! set the bucket engine drives: bound, diceable, dice, split, transform.
//! Parametric surfaces (quadrics, patches, NURBS after refinement,
//! triangulated polygons) share one dicer that samples an object-space
//! evaluator over a parameter rectangle; structured surfaces
//! (subdivision meshes, curves, points, blobbies, procedurals) implement
//! the trait directly.

pub mod blobby;
pub mod curves;
pub mod nurbs;
pub mod patch;
pub mod points;
pub mod polygon;
pub mod procedural;
pub mod quadric;
pub mod subdivision;

pub use procedural::ProceduralGenerator;

use glam::{Mat4, Vec2, Vec3};
use smallvec::SmallVec;

use crate::csg::CsgNodeId;
use crate::errors::Result;
use crate::math::{Bound, Color};
use crate::micropoly::MicroGrid;
use crate::state::{AttributesHandle, TransformHandle};

/// Everything the engine needs to judge raster extents while dicing.
#[derive(Debug, Clone, Copy)]
pub struct DiceContext {
    pub camera_to_raster: Mat4,
    /// Soft cap on vertices per grid, from `limits:gridsize`.
    pub grid_limit: u32,
}

/// State common to every primitive. The engine owns primitives uniquely;
/// splits transfer ownership to the children.
#[derive(Debug, Clone)]
pub struct PrimBase {
    pub attributes: AttributesHandle,
    /// Object-to-camera transform, motion keys included.
    pub transform: TransformHandle,
    pub eye_splits: u32,
    pub discard: bool,
    pub csg: Option<CsgNodeId>,
}

impl PrimBase {
    #[must_use]
    pub fn new(attributes: AttributesHandle, transform: TransformHandle) -> Self {
        Self {
            attributes,
            transform,
            eye_splits: 0,
            discard: false,
            csg: None,
        }
    }

    /// Camera-space padding for a bound displacement shader. The declared
    /// bound is scaled by the largest axis scale of its coordinate
    /// system's transform to camera space.
    #[must_use]
    pub fn displacement_padding(&self) -> f32 {
        let geo = &self.base_attrs().geometric;
        if geo.displacement.is_none() || geo.displacement_bound == 0.0 {
            return 0.0;
        }
        let m = self.transform.matrix_at(self.transform.times().next().unwrap_or(0.0));
        let scale = m
            .x_axis
            .truncate()
            .length()
            .max(m.y_axis.truncate().length())
            .max(m.z_axis.truncate().length());
        geo.displacement_bound.abs()
            * if geo.displacement_coordsys == "camera" {
                1.0
            } else {
                scale.max(1e-6)
            }
    }

    fn base_attrs(&self) -> &crate::state::Attributes {
        &self.attributes
    }

    /// Camera-space bound of an object-space bound, union over motion
    /// keys, inflated by any displacement padding.
    #[must_use]
    pub fn camera_bound(&self, object_bound: &Bound) -> Bound {
        let mut out = Bound::EMPTY;
        for time in self.transform.times() {
            out = out.union(&object_bound.transform(&self.transform.matrix_at(time)));
        }
        if !self.transform.is_moving() {
            out = object_bound.transform(&self.transform.matrix_at(0.0));
        }
        out.inflate(self.displacement_padding())
    }

    /// The effective shading rate for dicing.
    #[must_use]
    pub fn shading_rate(&self) -> f32 {
        self.base_attrs().shading.shading_rate.max(0.01)
    }
}

/// The primitive capability set.
pub trait Primitive: Send {
    fn type_name(&self) -> &'static str;

    fn base(&self) -> &PrimBase;

    fn base_mut(&mut self) -> &mut PrimBase;

    /// Camera-space bound over all motion times, displacement included.
    fn bound(&self) -> Bound;

    /// True when the primitive is small and simple enough to dice.
    fn diceable(&self, ctx: &DiceContext) -> bool;

    /// Produces the shaded-grid precursor. Only called after `diceable`.
    fn dice(&self, ctx: &DiceContext) -> Result<MicroGrid>;

    /// Subdivides into simpler primitives. May return nothing, which
    /// drops the primitive.
    fn split(&self, ctx: &DiceContext) -> Result<Vec<Box<dyn Primitive>>>;

    fn clone_boxed(&self) -> Box<dyn Primitive>;

    /// Applies an additional camera-space transform, as object-instance
    /// replay does.
    fn concat_transform(&mut self, m: &Mat4) {
        let base = self.base_mut();
        let mut t = (*base.transform).clone();
        t.concat_all(*m);
        base.transform = std::sync::Arc::new(t);
    }

    /// Rebases the primitive under an outer transform: the recorded
    /// transform becomes relative to `m`.
    fn pre_transform(&mut self, m: &Mat4) {
        let base = self.base_mut();
        let mut t = (*base.transform).clone();
        t.pre_concat_all(*m);
        base.transform = std::sync::Arc::new(t);
    }
}

/// Marks a primitive undiceable and counts the forced split; used by the
/// eye-split path. Returns the updated count.
pub fn mark_eye_split(prim: &mut dyn Primitive) -> u32 {
    let base = prim.base_mut();
    base.eye_splits += 1;
    base.eye_splits
}

// ----------------------------------------------------------------------
// Shared parametric dicer
// ----------------------------------------------------------------------

/// An object-space surface evaluated over a (u, v) rectangle.
pub trait ParamSurface: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Position at (u, v) in the surface's natural domain.
    fn eval(&self, u: f32, v: f32) -> Vec3;

    fn clone_surface(&self) -> Box<dyn ParamSurface>;
}

/// Per-corner varying values carried across splits: color, opacity and
/// texture coordinates at the four corners of the current range.
#[derive(Debug, Clone, Copy)]
pub struct CornerVaryings {
    pub cs: Option<[Color; 4]>,
    pub os: Option<[Color; 4]>,
    pub st: [Vec2; 4],
}

impl CornerVaryings {
    #[must_use]
    pub fn from_attributes(attrs: &crate::state::Attributes) -> Self {
        Self {
            cs: None,
            os: None,
            st: attrs.shading.texture_coordinates,
        }
    }
}

fn bilerp<T: Copy + std::ops::Add<Output = T> + std::ops::Mul<f32, Output = T>>(
    corners: &[T; 4],
    u: f32,
    v: f32,
) -> T {
    let top = corners[0] * (1.0 - u) + corners[1] * u;
    let bottom = corners[2] * (1.0 - u) + corners[3] * u;
    top * (1.0 - v) + bottom * v
}

/// A parametric primitive: evaluator, current parameter range, corner
/// varyings.
pub struct ParametricPrim {
    pub prim_base: PrimBase,
    pub surface: Box<dyn ParamSurface>,
    /// (u0, u1, v0, v1) within the surface's domain.
    pub range: [f32; 4],
    pub varyings: CornerVaryings,
}

impl ParametricPrim {
    #[must_use]
    pub fn new(base: PrimBase, surface: Box<dyn ParamSurface>) -> Self {
        let varyings = CornerVaryings::from_attributes(&base.attributes);
        Self {
            prim_base: base,
            surface,
            range: [0.0, 1.0, 0.0, 1.0],
            varyings,
        }
    }

    fn eval_range(&self, u: f32, v: f32) -> Vec3 {
        let [u0, u1, v0, v1] = self.range;
        self.surface.eval(u0 + (u1 - u0) * u, v0 + (v1 - v0) * v)
    }

    /// Object-space bound from a sampled lattice over the range.
    fn object_bound(&self) -> Bound {
        const N: usize = 5;
        let mut b = Bound::EMPTY;
        for j in 0..N {
            for i in 0..N {
                let u = i as f32 / (N - 1) as f32;
                let v = j as f32 / (N - 1) as f32;
                b.encapsulate(self.eval_range(u, v));
            }
        }
        // Sampled hulls can clip extrema slightly; widen a touch.
        let pad = b.size().max_element().max(1e-4) * 0.05;
        b.inflate(pad)
    }

    /// Estimated dice resolution from raster-space edge lengths at the
    /// most conservative motion key.
    fn dice_counts(&self, ctx: &DiceContext) -> (u32, u32) {
        let rate_len = self.prim_base.shading_rate().sqrt();
        let mut max_u_len = 0.0f32;
        let mut max_v_len = 0.0f32;
        for time in self.prim_base.transform.times() {
            let m = ctx.camera_to_raster * self.prim_base.transform.matrix_at(time);
            let corner = |u: f32, v: f32| crate::math::transform_point(&m, self.eval_range(u, v));
            let samples = [0.0, 0.5, 1.0];
            for &v in &samples {
                let mut len = 0.0;
                for w in samples.windows(2) {
                    len += (corner(w[1], v) - corner(w[0], v))
                        .truncate()
                        .length();
                }
                max_u_len = max_u_len.max(len);
            }
            for &u in &samples {
                let mut len = 0.0;
                for w in samples.windows(2) {
                    len += (corner(u, w[1]) - corner(u, w[0]))
                        .truncate()
                        .length();
                }
                max_v_len = max_v_len.max(len);
            }
        }
        // The max(1) also catches NaN extents from degenerate control
        // data, which would otherwise cast to zero.
        let nu = ((max_u_len / rate_len).ceil().clamp(1.0, 255.0) as u32).max(1);
        let nv = ((max_v_len / rate_len).ceil().clamp(1.0, 255.0) as u32).max(1);
        (nu, nv)
    }

    fn split_varyings(&self, half: SplitHalf) -> (CornerVaryings, CornerVaryings) {
        let lerp4 =
            |c: &[Color; 4], u: f32, v: f32| -> Color { bilerp(c, u, v) };
        let lerp2 = |c: &[Vec2; 4], u: f32, v: f32| -> Vec2 { bilerp(c, u, v) };
        let corners: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
        let map = |shift: fn(f32, f32) -> (f32, f32)| -> CornerVaryings {
            let mut out = self.varyings;
            if let Some(cs) = &self.varyings.cs {
                let mut new = [Color::BLACK; 4];
                for (i, (u, v)) in corners.iter().enumerate() {
                    let (su, sv) = shift(*u, *v);
                    new[i] = lerp4(cs, su, sv);
                }
                out.cs = Some(new);
            }
            if let Some(os) = &self.varyings.os {
                let mut new = [Color::BLACK; 4];
                for (i, (u, v)) in corners.iter().enumerate() {
                    let (su, sv) = shift(*u, *v);
                    new[i] = lerp4(os, su, sv);
                }
                out.os = Some(new);
            }
            let mut st = self.varyings.st;
            for (i, (u, v)) in corners.iter().enumerate() {
                let (su, sv) = shift(*u, *v);
                st[i] = lerp2(&self.varyings.st, su, sv);
            }
            out.st = st;
            out
        };
        match half {
            SplitHalf::U => (map(|u, v| (u * 0.5, v)), map(|u, v| (0.5 + u * 0.5, v))),
            SplitHalf::V => (map(|u, v| (u, v * 0.5)), map(|u, v| (u, 0.5 + v * 0.5))),
        }
    }
}

#[derive(Clone, Copy)]
enum SplitHalf {
    U,
    V,
}

impl Primitive for ParametricPrim {
    fn type_name(&self) -> &'static str {
        self.surface.type_name()
    }

    fn base(&self) -> &PrimBase {
        &self.prim_base
    }

    fn base_mut(&mut self) -> &mut PrimBase {
        &mut self.prim_base
    }

    fn bound(&self) -> Bound {
        self.prim_base.camera_bound(&self.object_bound())
    }

    fn diceable(&self, ctx: &DiceContext) -> bool {
        let (nu, nv) = self.dice_counts(ctx);
        (nu + 1) * (nv + 1) <= ctx.grid_limit.max(4)
    }

    fn dice(&self, ctx: &DiceContext) -> Result<MicroGrid> {
        let (nu, nv) = self.dice_counts(ctx);
        let u_dim = (nu + 1) as usize;
        let v_dim = (nv + 1) as usize;
        let mut grid = MicroGrid::new(u_dim, v_dim, self.prim_base.attributes.clone());
        grid.csg = self.prim_base.csg;

        let times: SmallVec<[f32; 2]> = self.prim_base.transform.times().collect();
        grid.times = times.clone();
        grid.positions.clear();
        for &time in &times {
            let m = self.prim_base.transform.matrix_at(time);
            let mut key = Vec::with_capacity(u_dim * v_dim);
            for jv in 0..v_dim {
                let v = jv as f32 / nv as f32;
                for iu in 0..u_dim {
                    let u = iu as f32 / nu as f32;
                    key.push(crate::math::transform_point(&m, self.eval_range(u, v)));
                }
            }
            grid.positions.push(key);
        }

        let [u0, u1, v0, v1] = self.range;
        for jv in 0..v_dim {
            let v = jv as f32 / nv as f32;
            for iu in 0..u_dim {
                let u = iu as f32 / nu as f32;
                let idx = grid.index(iu, jv);
                grid.u[idx] = u0 + (u1 - u0) * u;
                grid.v[idx] = v0 + (v1 - v0) * v;
                let st = bilerp(&self.varyings.st, u, v);
                grid.s[idx] = st.x;
                grid.t[idx] = st.y;
                if let Some(cs) = &self.varyings.cs {
                    grid.color[idx] = bilerp(cs, u, v);
                }
                if let Some(os) = &self.varyings.os {
                    grid.opacity[idx] = bilerp(os, u, v);
                }
            }
        }
        grid.compute_normals();
        Ok(grid)
    }

    fn split(&self, ctx: &DiceContext) -> Result<Vec<Box<dyn Primitive>>> {
        let (nu, nv) = self.dice_counts(ctx);
        let half = if nu >= nv { SplitHalf::U } else { SplitHalf::V };
        let [u0, u1, v0, v1] = self.range;
        let (range_a, range_b) = match half {
            SplitHalf::U => {
                let mid = (u0 + u1) * 0.5;
                ([u0, mid, v0, v1], [mid, u1, v0, v1])
            }
            SplitHalf::V => {
                let mid = (v0 + v1) * 0.5;
                ([u0, u1, v0, mid], [u0, u1, mid, v1])
            }
        };
        let (vary_a, vary_b) = self.split_varyings(half);
        let make = |range: [f32; 4], varyings: CornerVaryings| -> Box<dyn Primitive> {
            Box::new(Self {
                prim_base: self.prim_base.clone(),
                surface: self.surface.clone_surface(),
                range,
                varyings,
            })
        };
        Ok(vec![make(range_a, vary_a), make(range_b, vary_b)])
    }

    fn clone_boxed(&self) -> Box<dyn Primitive> {
        Box::new(Self {
            prim_base: self.prim_base.clone(),
            surface: self.surface.clone_surface(),
            range: self.range,
            varyings: self.varyings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Attributes, Transform};
    use std::sync::Arc;

    struct Plane;

    impl ParamSurface for Plane {
        fn type_name(&self) -> &'static str {
            "plane"
        }

        fn eval(&self, u: f32, v: f32) -> Vec3 {
            Vec3::new(u, v, 1.0)
        }

        fn clone_surface(&self) -> Box<dyn ParamSurface> {
            Box::new(Plane)
        }
    }

    fn plane_prim() -> ParametricPrim {
        let base = PrimBase::new(
            Arc::new(Attributes::default()),
            Arc::new(Transform::identity()),
        );
        ParametricPrim::new(base, Box::new(Plane))
    }

    fn ctx() -> DiceContext {
        DiceContext {
            camera_to_raster: Mat4::from_scale(Vec3::new(16.0, 16.0, 1.0)),
            grid_limit: 1024,
        }
    }

    #[test]
    fn bound_covers_surface() {
        let prim = plane_prim();
        let b = prim.bound();
        assert!(b.min.x <= 0.0 && b.max.x >= 1.0);
        assert!((b.center().z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn dice_counts_follow_raster_size() {
        let prim = plane_prim();
        // 16 raster units per side, shading rate 1: 16x16 cells.
        let (nu, nv) = prim.dice_counts(&ctx());
        assert_eq!((nu, nv), (16, 16));
    }

    #[test]
    fn grid_positions_are_transformed() {
        let prim = plane_prim();
        let grid = prim.dice(&ctx()).unwrap();
        assert_eq!(grid.u_dim, 17);
        let corner = grid.positions[0][0];
        assert!((corner.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn split_halves_longest_axis() {
        let prim = plane_prim();
        let children = prim.split(&ctx()).unwrap();
        assert_eq!(children.len(), 2);
        let b0 = children[0].bound();
        let b1 = children[1].bound();
        assert!(b0.max.x <= b1.max.x);
    }

    #[test]
    fn diceable_respects_grid_limit() {
        let prim = plane_prim();
        let small = DiceContext {
            grid_limit: 16,
            ..ctx()
        };
        assert!(!prim.diceable(&small));
        assert!(prim.diceable(&ctx()));
    }
}
