//! Blobby Implicit Surfaces
//!
//! A compact VM over a stack of implicit field primitives (constant,
//! ellipsoid, segment, plane) combined by arithmetic and min/max
//! operators. The iso-surface is polygonised by marching tetrahedra at a
//! resolution derived from the bound's largest raster extent and the
//! shading rate, then rendered as bilinear patches.

use glam::{Mat4, Vec3};

use crate::errors::{RenderError, Result};
use crate::math::Bound;
use crate::micropoly::MicroGrid;
use crate::params::ParamList;

use super::patch::bilinear_patch;
use super::{DiceContext, PrimBase, Primitive};

/// Field level of the rendered iso-surface: the falloff kernel at half
/// its support radius.
const THRESHOLD: f32 = 0.421_875;

/// Polygonisation grid bounds.
const MIN_RESOLUTION: u32 = 8;
const MAX_RESOLUTION: u32 = 48;

/// One instruction of the blobby VM. Operands index earlier
/// instructions.
#[derive(Debug, Clone)]
enum Instr {
    Constant(f32),
    /// Inverse of the ellipsoid's unit-sphere-to-object matrix.
    Ellipsoid(Mat4),
    Segment {
        a: Vec3,
        b: Vec3,
        radius: f32,
    },
    Plane {
        normal: Vec3,
        distance: f32,
    },
    Add(Vec<usize>),
    Multiply(Vec<usize>),
    Min(Vec<usize>),
    Max(Vec<usize>),
    Subtract(usize, usize),
    Divide(usize, usize),
    Negate(usize),
}

/// The kernel: 1 at the centre, 0 at the support radius.
fn falloff(r2: f32) -> f32 {
    if r2 >= 1.0 {
        0.0
    } else {
        let t = 1.0 - r2;
        t * t * t
    }
}

fn point_segment_distance_sq(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let t = (p - a).dot(ab) / ab.length_squared().max(1e-12);
    let closest = a + ab * t.clamp(0.0, 1.0);
    (p - closest).length_squared()
}

pub struct Blobby {
    base: PrimBase,
    instrs: Vec<Instr>,
    object_bound: Bound,
}

impl Blobby {
    /// Decodes the interface's (code, floats) program.
    pub fn build(
        base: PrimBase,
        nleaf: usize,
        code: &[i32],
        floats: &[f32],
        _strings: &[String],
        _params: &ParamList,
    ) -> Result<Self> {
        let mut instrs = Vec::new();
        let mut bound = Bound::EMPTY;
        let mut pc = 0usize;
        let fetch_floats = |at: usize, n: usize| -> Result<&[f32]> {
            floats.get(at..at + n).ok_or_else(|| {
                RenderError::InvalidData("blobby float operands out of range".to_string())
            })
        };
        while pc < code.len() {
            let op = code[pc];
            pc += 1;
            match op {
                1000 => {
                    let at = code
                        .get(pc)
                        .copied()
                        .ok_or_else(|| RenderError::InvalidData("blobby truncated".into()))?
                        as usize;
                    pc += 1;
                    instrs.push(Instr::Constant(fetch_floats(at, 1)?[0]));
                }
                1001 => {
                    let at = code
                        .get(pc)
                        .copied()
                        .ok_or_else(|| RenderError::InvalidData("blobby truncated".into()))?
                        as usize;
                    pc += 1;
                    let m = fetch_floats(at, 16)?;
                    let mut a = [0.0f32; 16];
                    a.copy_from_slice(m);
                    let to_object = Mat4::from_cols_array(&a).transpose();
                    bound = bound.union(
                        &Bound::new(Vec3::splat(-1.0), Vec3::ONE).transform(&to_object),
                    );
                    instrs.push(Instr::Ellipsoid(to_object.inverse()));
                }
                1002 => {
                    let at = code
                        .get(pc)
                        .copied()
                        .ok_or_else(|| RenderError::InvalidData("blobby truncated".into()))?
                        as usize;
                    pc += 1;
                    let f = fetch_floats(at, 23)?;
                    let mut a = [0.0f32; 16];
                    a.copy_from_slice(&f[..16]);
                    let m = Mat4::from_cols_array(&a).transpose();
                    let pa = crate::math::transform_point(&m, Vec3::new(f[16], f[17], f[18]));
                    let pb = crate::math::transform_point(&m, Vec3::new(f[19], f[20], f[21]));
                    let radius = f[22].abs();
                    bound = bound
                        .union(&Bound::from_points([pa, pb]).inflate(radius));
                    instrs.push(Instr::Segment {
                        a: pa,
                        b: pb,
                        radius: radius.max(1e-6),
                    });
                }
                1003 => {
                    let at = code
                        .get(pc)
                        .copied()
                        .ok_or_else(|| RenderError::InvalidData("blobby truncated".into()))?
                        as usize;
                    pc += 1;
                    let f = fetch_floats(at, 4)?;
                    instrs.push(Instr::Plane {
                        normal: Vec3::new(f[0], f[1], f[2]).normalize_or_zero(),
                        distance: f[3],
                    });
                }
                0..=3 => {
                    let count = code
                        .get(pc)
                        .copied()
                        .ok_or_else(|| RenderError::InvalidData("blobby truncated".into()))?
                        as usize;
                    pc += 1;
                    let operands: Vec<usize> = code
                        .get(pc..pc + count)
                        .ok_or_else(|| RenderError::InvalidData("blobby truncated".into()))?
                        .iter()
                        .map(|&i| i as usize)
                        .collect();
                    pc += count;
                    if operands.iter().any(|&i| i >= instrs.len()) {
                        return Err(RenderError::InvalidData(
                            "blobby operand references a later instruction".into(),
                        ));
                    }
                    instrs.push(match op {
                        0 => Instr::Add(operands),
                        1 => Instr::Multiply(operands),
                        2 => Instr::Max(operands),
                        _ => Instr::Min(operands),
                    });
                }
                4 | 5 => {
                    let a = code.get(pc).copied().unwrap_or(-1);
                    let b = code.get(pc + 1).copied().unwrap_or(-1);
                    pc += 2;
                    if a < 0 || b < 0 || a as usize >= instrs.len() || b as usize >= instrs.len() {
                        return Err(RenderError::InvalidData("blobby operand invalid".into()));
                    }
                    instrs.push(if op == 4 {
                        Instr::Subtract(a as usize, b as usize)
                    } else {
                        Instr::Divide(a as usize, b as usize)
                    });
                }
                6 => {
                    let a = code.get(pc).copied().unwrap_or(-1);
                    pc += 1;
                    if a < 0 || a as usize >= instrs.len() {
                        return Err(RenderError::InvalidData("blobby operand invalid".into()));
                    }
                    instrs.push(Instr::Negate(a as usize));
                }
                other => {
                    return Err(RenderError::InvalidData(format!(
                        "unknown blobby opcode {other}"
                    )));
                }
            }
        }
        if instrs.is_empty() {
            return Err(RenderError::InvalidData("empty blobby program".into()));
        }
        let leaves = instrs
            .iter()
            .filter(|i| {
                matches!(
                    i,
                    Instr::Constant(_) | Instr::Ellipsoid(_) | Instr::Segment { .. } | Instr::Plane { .. }
                )
            })
            .count();
        if leaves != nleaf {
            return Err(RenderError::InvalidData(format!(
                "blobby declares {nleaf} leaves but its code holds {leaves}"
            )));
        }
        if bound.is_empty() {
            bound = Bound::new(Vec3::splat(-1.0), Vec3::ONE);
        }
        Ok(Self {
            base,
            instrs,
            object_bound: bound,
        })
    }

    /// Evaluates the field at an object-space point.
    fn field(&self, p: Vec3) -> f32 {
        let mut values = Vec::with_capacity(self.instrs.len());
        for instr in &self.instrs {
            let v = match instr {
                Instr::Constant(c) => *c,
                Instr::Ellipsoid(inv) => {
                    falloff(crate::math::transform_point(inv, p).length_squared())
                }
                Instr::Segment { a, b, radius } => {
                    falloff(point_segment_distance_sq(p, *a, *b) / (radius * radius))
                }
                Instr::Plane { normal, distance } => {
                    // Repelling half-space ramp.
                    let d = normal.dot(p) - distance;
                    (1.0 - d.max(0.0)).clamp(0.0, 1.0)
                }
                Instr::Add(ops) => ops.iter().map(|&i| values[i]).sum(),
                Instr::Multiply(ops) => ops.iter().map(|&i| values[i]).product(),
                Instr::Min(ops) => ops.iter().map(|&i| values[i]).fold(f32::INFINITY, f32::min),
                Instr::Max(ops) => ops
                    .iter()
                    .map(|&i| values[i])
                    .fold(f32::NEG_INFINITY, f32::max),
                Instr::Subtract(a, b) => values[*a] - values[*b],
                Instr::Divide(a, b) => {
                    let d: f32 = values[*b];
                    if d.abs() <= f32::EPSILON { 0.0 } else { values[*a] / d }
                }
                Instr::Negate(a) => -values[*a],
            };
            values.push(v);
        }
        values.last().copied().unwrap_or(0.0)
    }

    fn resolution(&self, ctx: &DiceContext) -> u32 {
        let raster = self
            .base
            .camera_bound(&self.object_bound)
            .transform(&ctx.camera_to_raster);
        let extent = raster.size().truncate().max_element().max(1.0);
        let cells = extent / self.base.shading_rate().sqrt();
        (cells.ceil() as u32).clamp(MIN_RESOLUTION, MAX_RESOLUTION)
    }

    /// Marching tetrahedra over the bound. Returns iso-surface triangles
    /// in object space.
    fn polygonise(&self, resolution: u32) -> Vec<[Vec3; 3]> {
        // Six tetrahedra per cell, by cube corner index.
        const TETS: [[usize; 4]; 6] = [
            [0, 5, 1, 6],
            [0, 1, 2, 6],
            [0, 2, 3, 6],
            [0, 3, 7, 6],
            [0, 7, 4, 6],
            [0, 4, 5, 6],
        ];
        let b = self.object_bound.inflate(self.object_bound.size().max_element() * 0.05);
        let n = resolution as usize;
        let size = b.size();
        let cell = size / n as f32;
        let corner_offset = |i: usize| {
            Vec3::new(
                (i & 1) as f32,
                ((i >> 1) & 1) as f32,
                ((i >> 2) & 1) as f32,
            )
        };

        let mut triangles = Vec::new();
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let origin = b.min
                        + Vec3::new(i as f32 * cell.x, j as f32 * cell.y, k as f32 * cell.z);
                    let corners: Vec<(Vec3, f32)> = (0..8)
                        .map(|c| {
                            let p = origin + corner_offset(c) * cell;
                            (p, self.field(p) - THRESHOLD)
                        })
                        .collect();
                    for tet in &TETS {
                        marching_tet(
                            [
                                corners[tet[0]],
                                corners[tet[1]],
                                corners[tet[2]],
                                corners[tet[3]],
                            ],
                            &mut triangles,
                        );
                    }
                }
            }
        }
        triangles
    }
}

/// Emits the iso-surface triangles of one tetrahedron.
fn marching_tet(corners: [(Vec3, f32); 4], out: &mut Vec<[Vec3; 3]>) {
    let inside: Vec<usize> = (0..4).filter(|&i| corners[i].1 > 0.0).collect();
    let outside: Vec<usize> = (0..4).filter(|&i| corners[i].1 <= 0.0).collect();
    let cross = |a: usize, b: usize| -> Vec3 {
        let (pa, fa) = corners[a];
        let (pb, fb) = corners[b];
        let t = fa / (fa - fb);
        pa + (pb - pa) * t.clamp(0.0, 1.0)
    };
    match inside.len() {
        1 => {
            let v = inside[0];
            out.push([
                cross(v, outside[0]),
                cross(v, outside[1]),
                cross(v, outside[2]),
            ]);
        }
        3 => {
            let v = outside[0];
            out.push([
                cross(inside[0], v),
                cross(inside[1], v),
                cross(inside[2], v),
            ]);
        }
        2 => {
            // Quad between the two crossing pairs, as two triangles.
            let a = cross(inside[0], outside[0]);
            let b = cross(inside[0], outside[1]);
            let c = cross(inside[1], outside[1]);
            let d = cross(inside[1], outside[0]);
            out.push([a, b, c]);
            out.push([a, c, d]);
        }
        _ => {}
    }
}

impl Primitive for Blobby {
    fn type_name(&self) -> &'static str {
        "blobby"
    }

    fn base(&self) -> &PrimBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrimBase {
        &mut self.base
    }

    fn bound(&self) -> Bound {
        self.base.camera_bound(&self.object_bound)
    }

    fn diceable(&self, _ctx: &DiceContext) -> bool {
        false
    }

    fn dice(&self, _ctx: &DiceContext) -> Result<MicroGrid> {
        Err(RenderError::InternalBug(
            "blobby asked to dice; it polygonises on split".into(),
        ))
    }

    fn split(&self, ctx: &DiceContext) -> Result<Vec<Box<dyn Primitive>>> {
        let triangles = self.polygonise(self.resolution(ctx));
        Ok(triangles
            .into_iter()
            .map(|t| {
                Box::new(bilinear_patch(
                    self.base.clone(),
                    [t[0], t[1], t[2], t[2]],
                    None,
                    None,
                )) as Box<dyn Primitive>
            })
            .collect())
    }

    fn clone_boxed(&self) -> Box<dyn Primitive> {
        Box::new(Self {
            base: self.base.clone(),
            instrs: self.instrs.clone(),
            object_bound: self.object_bound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Attributes, Transform};
    use std::sync::Arc;

    fn base() -> PrimBase {
        PrimBase::new(
            Arc::new(Attributes::default()),
            Arc::new(Transform::identity()),
        )
    }

    /// One unit ellipsoid at the origin.
    fn single_ellipsoid() -> Blobby {
        let identity: Vec<f32> = Mat4::IDENTITY.transpose().to_cols_array().to_vec();
        Blobby::build(base(), 1, &[1001, 0], &identity, &[], &ParamList::new()).unwrap()
    }

    #[test]
    fn field_peaks_at_centre() {
        let b = single_ellipsoid();
        assert!((b.field(Vec3::ZERO) - 1.0).abs() < 1e-5);
        assert!(b.field(Vec3::new(2.0, 0.0, 0.0)).abs() < 1e-6);
        assert!(b.field(Vec3::ZERO) > b.field(Vec3::new(0.5, 0.0, 0.0)));
    }

    #[test]
    fn add_combines_fields() {
        let identity: Vec<f32> = Mat4::IDENTITY.transpose().to_cols_array().to_vec();
        let mut floats = identity.clone();
        floats.extend(&identity);
        // Two coincident ellipsoids added: field doubles.
        let code = [1001, 0, 1001, 16, 0, 2, 0, 1];
        let b = Blobby::build(base(), 2, &code, &floats, &[], &ParamList::new()).unwrap();
        assert!((b.field(Vec3::ZERO) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn polygonise_produces_closed_surface() {
        let b = single_ellipsoid();
        let triangles = b.polygonise(12);
        assert!(!triangles.is_empty());
        // Every iso-vertex sits near the r = 1/2 shell of the kernel.
        for t in triangles.iter().take(32) {
            for v in t {
                let r = v.length();
                assert!((0.3..0.7).contains(&r), "iso vertex at radius {r}");
            }
        }
    }

    #[test]
    fn bad_programs_reject() {
        assert!(Blobby::build(base(), 1, &[9999], &[], &[], &ParamList::new()).is_err());
        assert!(Blobby::build(base(), 2, &[1000, 0], &[1.0], &[], &ParamList::new()).is_err());
        // Operand referencing a later instruction.
        assert!(Blobby::build(base(), 1, &[0, 1, 5, 1000, 0], &[1.0], &[], &ParamList::new()).is_err());
    }

    #[test]
    fn split_yields_patches() {
        let b = single_ellipsoid();
        let ctx = DiceContext {
            camera_to_raster: Mat4::from_scale(Vec3::splat(32.0)),
            grid_limit: 256,
        };
        let prims = b.split(&ctx).unwrap();
        assert!(!prims.is_empty());
        assert!(prims.iter().all(|p| p.type_name() == "patch"));
    }
}
