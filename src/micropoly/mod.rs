//! Micropolygon Grids
//!
//! A diced primitive becomes a 2D grid of vertices in camera space. The
//! grid is shaded once (displacement, surface with its illuminance
//! accumulation, atmosphere), projected to raster space, and split into
//! micropolygons — one quad per (u, v) cell. Micropolygons inherit the
//! grid's shaded color and opacity and are never re-shaded; sample tests
//! read those values.

use glam::{Mat4, Vec2, Vec3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::csg::CsgNodeId;
use crate::errors::Result;
use crate::math::{Bound, Color, transform_point};
use crate::shading::{
    EvalContext, LightContribution, LightKey, LightSource, ShaderBinding, ShaderEnv,
};
use crate::state::{AttributesHandle, ShadingInterpolation};
use crate::texture::TextureSystem;

/// Services the shading pipeline needs from the renderer.
pub struct ShadeContext<'a> {
    pub textures: &'a TextureSystem,
    pub lights: &'a SlotMap<LightKey, LightSource>,
    pub camera_to_world: Mat4,
    pub world_to_camera: Mat4,
    /// Seed stream keyed by the owning bucket so output is reproducible
    /// regardless of worker scheduling.
    pub seed: u64,
}

/// A grid of shaded vertices, `u_dim × v_dim`, row-major over v.
pub struct MicroGrid {
    pub u_dim: usize,
    pub v_dim: usize,
    /// Motion key times; a single entry means a static grid.
    pub times: SmallVec<[f32; 2]>,
    /// Positions per motion key, camera space until projection.
    pub positions: SmallVec<[Vec<Vec3>; 2]>,
    /// Shading normals in camera space.
    pub normals: Vec<Vec3>,
    pub s: Vec<f32>,
    pub t: Vec<f32>,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
    /// Color and opacity; shading replaces these with Ci and Oi.
    pub color: Vec<Color>,
    pub opacity: Vec<Color>,
    pub attributes: AttributesHandle,
    pub csg: Option<CsgNodeId>,
    projected: bool,
}

impl MicroGrid {
    #[must_use]
    pub fn new(u_dim: usize, v_dim: usize, attributes: AttributesHandle) -> Self {
        let n = u_dim * v_dim;
        let base_color = attributes.shading.color;
        let base_opacity = attributes.shading.opacity;
        Self {
            u_dim,
            v_dim,
            times: SmallVec::from_slice(&[0.0]),
            positions: SmallVec::from_elem(vec![Vec3::ZERO; n], 1),
            normals: vec![Vec3::Z; n],
            s: vec![0.0; n],
            t: vec![0.0; n],
            u: vec![0.0; n],
            v: vec![0.0; n],
            color: vec![base_color; n],
            opacity: vec![base_opacity; n],
            attributes,
            csg: None,
            projected: false,
        }
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.u_dim * self.v_dim
    }

    #[must_use]
    pub fn index(&self, iu: usize, iv: usize) -> usize {
        iv * self.u_dim + iu
    }

    /// Camera-space bound over every motion key. Valid before projection.
    #[must_use]
    pub fn bound(&self) -> Bound {
        let mut b = Bound::EMPTY;
        for key in &self.positions {
            for p in key {
                b.encapsulate(*p);
            }
        }
        b
    }

    /// Finite-difference geometric normals from the key-0 positions,
    /// flipped per the attribute orientation.
    pub fn compute_normals(&mut self) {
        let flip = self.attributes.geometric.orientation
            != self.attributes.geometric.coordsys_orientation;
        let p = &self.positions[0];
        let mut normals = vec![Vec3::Z; p.len()];
        for iv in 0..self.v_dim {
            for iu in 0..self.u_dim {
                let idx = self.index(iu, iv);
                let du = if iu + 1 < self.u_dim {
                    p[self.index(iu + 1, iv)] - p[idx]
                } else {
                    p[idx] - p[self.index(iu - 1, iv)]
                };
                let dv = if iv + 1 < self.v_dim {
                    p[self.index(iu, iv + 1)] - p[idx]
                } else {
                    p[idx] - p[self.index(iu, iv - 1)]
                };
                let mut n = du.cross(dv).normalize_or_zero();
                if flip {
                    n = -n;
                }
                normals[idx] = n;
            }
        }
        self.normals = normals;
    }

    fn run_binding(
        &mut self,
        env: &mut ShaderEnv,
        binding: &ShaderBinding,
        ctx: &ShadeContext<'_>,
        rng: &mut StdRng,
    ) -> Result<()> {
        let mut eval = EvalContext {
            textures: ctx.textures,
            rng,
            params: &binding.params,
            camera_to_world: ctx.camera_to_world,
            world_to_camera: ctx.world_to_camera,
            shader_to_world: binding.object_to_world,
        };
        binding.shader.evaluate(env, &mut eval)
    }

    /// Runs the shading pipeline: displacement, per-light evaluation,
    /// surface, atmosphere. Results land in `color` and `opacity`.
    pub fn shade(&mut self, ctx: &ShadeContext<'_>) -> Result<()> {
        let mut env = ShaderEnv::new(self.u_dim, self.v_dim);
        env.p.copy_from_slice(&self.positions[0]);
        env.n.copy_from_slice(&self.normals);
        env.ng.copy_from_slice(&self.normals);
        for (i, p) in self.positions[0].iter().enumerate() {
            env.i[i] = *p;
        }
        env.s.copy_from_slice(&self.s);
        env.t.copy_from_slice(&self.t);
        env.u.copy_from_slice(&self.u);
        env.v.copy_from_slice(&self.v);
        env.cs.copy_from_slice(&self.color);
        env.os.copy_from_slice(&self.opacity);
        env.ci.copy_from_slice(&self.color);
        env.oi.copy_from_slice(&self.opacity);

        let attrs = self.attributes.clone();
        let mut rng = StdRng::seed_from_u64(ctx.seed);

        if let Some(displacement) = &attrs.geometric.displacement {
            self.run_binding(&mut env, displacement, ctx, &mut rng)?;
            self.positions[0].copy_from_slice(&env.p);
            self.compute_normals();
            env.n.copy_from_slice(&self.normals);
            env.ng.copy_from_slice(&self.normals);
        }

        // Evaluate each active light across the grid once.
        for key in &attrs.shading.lights {
            let Some(light) = ctx.lights.get(*key) else {
                continue;
            };
            env.l.fill(Vec3::ZERO);
            env.cl.fill(Color::BLACK);
            self.run_binding(&mut env, &light.binding, ctx, &mut rng)?;
            env.lights.push(LightContribution {
                ambient: light.ambient,
                l: env.l.clone(),
                cl: env.cl.clone(),
            });
        }

        if let Some(surface) = &attrs.shading.surface {
            self.run_binding(&mut env, surface, ctx, &mut rng)?;
        } else {
            // No surface shader: flat attribute color.
            for idx in 0..env.len() {
                env.ci[idx] = env.cs[idx] * env.os[idx];
                env.oi[idx] = env.os[idx];
            }
        }

        if let Some(atmosphere) = &attrs.shading.atmosphere {
            self.run_binding(&mut env, atmosphere, ctx, &mut rng)?;
        }

        self.color.copy_from_slice(&env.ci);
        self.opacity.copy_from_slice(&env.oi);
        Ok(())
    }

    /// Projects every motion key to raster space, keeping camera z.
    pub fn project(&mut self, camera_to_raster: &Mat4) {
        for key in &mut self.positions {
            for p in key.iter_mut() {
                let z = p.z;
                let r = transform_point(camera_to_raster, *p);
                *p = Vec3::new(r.x, r.y, z);
            }
        }
        self.projected = true;
    }

    #[must_use]
    pub fn is_projected(&self) -> bool {
        self.projected
    }

    /// Splits the projected grid into micropolygons, one per cell.
    /// `z_threshold` is the opacity level at which a micropolygon counts
    /// as an occluder.
    pub fn split(&self, z_threshold: Color, sink: &mut Vec<MicroPolygon>) {
        debug_assert!(self.projected);
        let smooth = self.attributes.shading.interpolation == ShadingInterpolation::Smooth;
        let matte = self.attributes.shading.matte;
        for iv in 0..self.v_dim - 1 {
            for iu in 0..self.u_dim - 1 {
                let idx = [
                    self.index(iu, iv),
                    self.index(iu + 1, iv),
                    self.index(iu + 1, iv + 1),
                    self.index(iu, iv + 1),
                ];
                let (color, opacity) = if smooth {
                    (
                        (self.color[idx[0]]
                            + self.color[idx[1]]
                            + self.color[idx[2]]
                            + self.color[idx[3]])
                            / 4.0,
                        (self.opacity[idx[0]]
                            + self.opacity[idx[1]]
                            + self.opacity[idx[2]]
                            + self.opacity[idx[3]])
                            / 4.0,
                    )
                } else {
                    (self.color[idx[0]], self.opacity[idx[0]])
                };
                let mut keys: SmallVec<[[Vec3; 4]; 1]> = SmallVec::new();
                for key in &self.positions {
                    keys.push([key[idx[0]], key[idx[1]], key[idx[2]], key[idx[3]]]);
                }
                let mut bound = Bound::EMPTY;
                for key in &keys {
                    for p in key {
                        bound.encapsulate(*p);
                    }
                }
                sink.push(MicroPolygon {
                    color,
                    opacity,
                    matte,
                    occludes: opacity.any_channel_reaches(z_threshold),
                    csg: self.csg,
                    times: self.times.clone(),
                    keys,
                    bound,
                });
            }
        }
    }
}

/// One micropolygon: four raster-space corners (with camera z), possibly
/// keyframed for motion blur, plus the shaded color shared with its grid.
pub struct MicroPolygon {
    pub color: Color,
    pub opacity: Color,
    pub matte: bool,
    /// Fully opaque, so it can drive the occlusion hierarchy.
    pub occludes: bool,
    pub csg: Option<CsgNodeId>,
    pub times: SmallVec<[f32; 2]>,
    pub keys: SmallVec<[[Vec3; 4]; 1]>,
    pub bound: Bound,
}

impl MicroPolygon {
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.keys.len() > 1
    }

    /// Corners interpolated to `time`.
    #[must_use]
    pub fn corners_at(&self, time: f32) -> [Vec3; 4] {
        if !self.is_moving() {
            return self.keys[0];
        }
        let times = &self.times;
        if time <= times[0] {
            return self.keys[0];
        }
        let last = times.len() - 1;
        if time >= times[last] {
            return self.keys[last];
        }
        let hi = times.partition_point(|t| *t <= time);
        let t0 = times[hi - 1];
        let t1 = times[hi];
        let f = if t1 - t0 <= f32::EPSILON {
            0.0
        } else {
            (time - t0) / (t1 - t0)
        };
        let a = &self.keys[hi - 1];
        let b = &self.keys[hi];
        [
            a[0].lerp(b[0], f),
            a[1].lerp(b[1], f),
            a[2].lerp(b[2], f),
            a[3].lerp(b[3], f),
        ]
    }

    /// The 2D containment test at `time`, with corners optionally shifted
    /// by `offset` (depth of field). Returns the interpolated camera z of
    /// the hit.
    #[must_use]
    pub fn sample(&self, point: Vec2, time: f32, offset: Vec2) -> Option<f32> {
        let mut corners = self.corners_at(time);
        if offset != Vec2::ZERO {
            for c in &mut corners {
                c.x += offset.x;
                c.y += offset.y;
            }
        }
        if !contains_quad(&corners, point) {
            return None;
        }
        Some(interpolate_z(&corners, point))
    }
}

/// Point-in-quad accepting either winding, so both orientations and
/// back-facing geometry test correctly.
fn contains_quad(corners: &[Vec3; 4], p: Vec2) -> bool {
    let mut positive = 0;
    let mut negative = 0;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let edge = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if edge >= 0.0 {
            positive += 1;
        }
        if edge <= 0.0 {
            negative += 1;
        }
    }
    positive == 4 || negative == 4
}

/// Depth at `p` from the plane of the first three corners, falling back
/// to the corner mean for degenerate quads.
fn interpolate_z(corners: &[Vec3; 4], p: Vec2) -> f32 {
    let a = corners[0];
    let b = corners[1];
    let c = corners[3];
    let e1 = b - a;
    let e2 = c - a;
    let det = e1.x * e2.y - e1.y * e2.x;
    if det.abs() < 1e-12 {
        return (corners[0].z + corners[1].z + corners[2].z + corners[3].z) * 0.25;
    }
    let dx = p.x - a.x;
    let dy = p.y - a.y;
    let wu = (dx * e2.y - dy * e2.x) / det;
    let wv = (dy * e1.x - dx * e1.y) / det;
    a.z + wu * e1.z + wv * e2.z
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Attributes;
    use std::sync::Arc;

    fn unit_quad_mpg(z: f32) -> MicroPolygon {
        MicroPolygon {
            color: Color::WHITE,
            opacity: Color::WHITE,
            matte: false,
            occludes: true,
            csg: None,
            times: SmallVec::from_slice(&[0.0]),
            keys: SmallVec::from_elem(
                [
                    Vec3::new(0.0, 0.0, z),
                    Vec3::new(1.0, 0.0, z),
                    Vec3::new(1.0, 1.0, z),
                    Vec3::new(0.0, 1.0, z),
                ],
                1,
            ),
            bound: Bound::new(Vec3::new(0.0, 0.0, z), Vec3::new(1.0, 1.0, z)),
        }
    }

    #[test]
    fn sample_inside_and_outside() {
        let mpg = unit_quad_mpg(2.0);
        assert_eq!(mpg.sample(Vec2::new(0.5, 0.5), 0.0, Vec2::ZERO), Some(2.0));
        assert_eq!(mpg.sample(Vec2::new(1.5, 0.5), 0.0, Vec2::ZERO), None);
    }

    #[test]
    fn reversed_winding_still_hits() {
        let mut mpg = unit_quad_mpg(1.0);
        mpg.keys[0].reverse();
        assert!(mpg.sample(Vec2::new(0.5, 0.5), 0.0, Vec2::ZERO).is_some());
    }

    #[test]
    fn sloped_quad_interpolates_depth() {
        let mut mpg = unit_quad_mpg(0.0);
        // z rises along x from 0 to 1.
        mpg.keys[0][1].z = 1.0;
        mpg.keys[0][2].z = 1.0;
        let z = mpg.sample(Vec2::new(0.25, 0.5), 0.0, Vec2::ZERO).unwrap();
        assert!((z - 0.25).abs() < 1e-5);
    }

    #[test]
    fn moving_mpg_interpolates_corners() {
        let mut mpg = unit_quad_mpg(1.0);
        mpg.times = SmallVec::from_slice(&[0.0, 1.0]);
        let mut shifted = mpg.keys[0];
        for c in &mut shifted {
            c.x += 10.0;
        }
        mpg.keys.push(shifted);
        // At t=0 the sample at x=0.5 hits; at t=1 it misses.
        assert!(mpg.sample(Vec2::new(0.5, 0.5), 0.0, Vec2::ZERO).is_some());
        assert!(mpg.sample(Vec2::new(0.5, 0.5), 1.0, Vec2::ZERO).is_none());
        // Halfway, the quad spans x in [5, 6].
        assert!(mpg.sample(Vec2::new(5.5, 0.5), 0.5, Vec2::ZERO).is_some());
    }

    #[test]
    fn grid_split_produces_cell_count() {
        let attrs = Arc::new(Attributes::default());
        let mut grid = MicroGrid::new(3, 3, attrs);
        for iv in 0..3 {
            for iu in 0..3 {
                let idx = grid.index(iu, iv);
                grid.positions[0][idx] = Vec3::new(iu as f32, iv as f32, 1.0);
            }
        }
        grid.projected = true;
        let mut mpgs = Vec::new();
        grid.split(Color::WHITE, &mut mpgs);
        assert_eq!(mpgs.len(), 4);
    }
}
