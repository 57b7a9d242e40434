//! Curves
//!
//! Linear and cubic curve primitives with per-vertex or constant width
//! and optional periodic wrap. Each curve dices into a thin camera-facing
//! ribbon: two vertices across, sampled along the parameter.

use glam::{Mat4, Vec3};
use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::math::{Bound, spline::Basis};
use crate::micropoly::MicroGrid;
use crate::params::ParamList;

use super::{DiceContext, PrimBase, Primitive};

#[derive(Clone, Copy, PartialEq, Eq)]
enum CurveKind {
    Linear,
    Cubic,
}

#[derive(Clone)]
enum CurveWidth {
    Constant(f32),
    PerSpan(Vec<f32>),
}

/// One curve of a `curves` call.
pub struct Curve {
    base: PrimBase,
    kind: CurveKind,
    periodic: bool,
    points: Vec<Vec3>,
    width: CurveWidth,
    v_basis: Basis,
    /// Parameter subrange of the whole curve, for splitting.
    range: (f32, f32),
}

impl Curve {
    fn segment_count(&self) -> usize {
        let n = self.points.len();
        match (self.kind, self.periodic) {
            (CurveKind::Linear, false) => n - 1,
            (CurveKind::Linear, true) => n,
            (CurveKind::Cubic, false) => (n - 4) / self.v_basis.step + 1,
            (CurveKind::Cubic, true) => n / self.v_basis.step,
        }
    }

    fn control(&self, i: usize) -> Vec3 {
        self.points[i % self.points.len()]
    }

    /// Object-space position at global parameter `t` in [0, 1].
    fn eval(&self, t: f32) -> Vec3 {
        let nsegs = self.segment_count();
        let scaled = (t.clamp(0.0, 1.0) * nsegs as f32).min(nsegs as f32 - 1e-4);
        let seg = scaled.floor() as usize;
        let local = scaled - seg as f32;
        match self.kind {
            CurveKind::Linear => {
                let a = self.control(seg);
                let b = self.control(seg + 1);
                a.lerp(b, local)
            }
            CurveKind::Cubic => {
                let start = seg * self.v_basis.step;
                let w = self.v_basis.weights(local);
                self.control(start) * w.x
                    + self.control(start + 1) * w.y
                    + self.control(start + 2) * w.z
                    + self.control(start + 3) * w.w
            }
        }
    }

    /// Width at global parameter `t`, interpolated across spans.
    fn width_at(&self, t: f32) -> f32 {
        match &self.width {
            CurveWidth::Constant(w) => *w,
            CurveWidth::PerSpan(widths) => {
                if widths.len() < 2 {
                    return widths.first().copied().unwrap_or(1.0);
                }
                let scaled = t.clamp(0.0, 1.0) * (widths.len() - 1) as f32;
                let i = (scaled.floor() as usize).min(widths.len() - 2);
                let f = scaled - i as f32;
                widths[i] * (1.0 - f) + widths[i + 1] * f
            }
        }
    }

    fn range_t(&self, local: f32) -> f32 {
        self.range.0 + local * (self.range.1 - self.range.0)
    }

    /// Estimated raster length of the current range.
    fn raster_length(&self, ctx: &DiceContext) -> f32 {
        let m = ctx.camera_to_raster * self.base.transform.matrix_at(0.0);
        let mut len = 0.0;
        let mut prev = crate::math::transform_point(&m, self.eval(self.range_t(0.0)));
        for i in 1..=8 {
            let p = crate::math::transform_point(&m, self.eval(self.range_t(i as f32 / 8.0)));
            len += (p - prev).truncate().length();
            prev = p;
        }
        len
    }

    fn object_scale(&self) -> f32 {
        let m = self.base.transform.matrix_at(0.0);
        m.x_axis
            .truncate()
            .length()
            .max(m.y_axis.truncate().length())
            .max(m.z_axis.truncate().length())
            .max(1e-6)
    }
}

impl Primitive for Curve {
    fn type_name(&self) -> &'static str {
        "curves"
    }

    fn base(&self) -> &PrimBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrimBase {
        &mut self.base
    }

    fn bound(&self) -> Bound {
        let mut b = Bound::from_points(self.points.iter().copied());
        let max_width = match &self.width {
            CurveWidth::Constant(w) => *w,
            CurveWidth::PerSpan(ws) => ws.iter().copied().fold(0.0, f32::max),
        };
        b = b.inflate(max_width * 0.5);
        self.base.camera_bound(&b)
    }

    fn diceable(&self, ctx: &DiceContext) -> bool {
        let n = (self.raster_length(ctx) / self.base.shading_rate().sqrt()).ceil() as u32 + 1;
        2 * (n + 1) <= ctx.grid_limit.max(8)
    }

    fn dice(&self, ctx: &DiceContext) -> Result<MicroGrid> {
        let n = ((self.raster_length(ctx) / self.base.shading_rate().sqrt()).ceil() as usize)
            .clamp(1, 255);
        let v_dim = n + 1;
        let mut grid = MicroGrid::new(2, v_dim, self.base.attributes.clone());
        grid.csg = self.base.csg;

        let times: SmallVec<[f32; 2]> = self.base.transform.times().collect();
        grid.times = times.clone();
        grid.positions.clear();
        let scale = self.object_scale();
        for &time in &times {
            let m: Mat4 = self.base.transform.matrix_at(time);
            let mut key = vec![Vec3::ZERO; 2 * v_dim];
            for jv in 0..v_dim {
                let local = jv as f32 / n as f32;
                let t = self.range_t(local);
                let centre = crate::math::transform_point(&m, self.eval(t));
                // Tangent from a small parameter step, in camera space.
                let t2 = self.range_t((local + 1.0 / n as f32).min(1.0));
                let t1 = self.range_t((local - 1.0 / n as f32).max(0.0));
                let tangent = (crate::math::transform_point(&m, self.eval(t2))
                    - crate::math::transform_point(&m, self.eval(t1)))
                .normalize_or_zero();
                // Ribbon side faces the camera (camera at the origin).
                let view = centre.normalize_or_zero();
                let mut side = tangent.cross(view).normalize_or_zero();
                if side.length_squared() < 1e-8 {
                    side = Vec3::X;
                }
                let half = self.width_at(t) * 0.5 * scale;
                key[jv * 2] = centre - side * half;
                key[jv * 2 + 1] = centre + side * half;
            }
            grid.positions.push(key);
        }

        for jv in 0..v_dim {
            let local = jv as f32 / n as f32;
            for iu in 0..2 {
                let idx = grid.index(iu, jv);
                grid.u[idx] = iu as f32;
                grid.v[idx] = self.range_t(local);
                grid.s[idx] = iu as f32;
                grid.t[idx] = self.range_t(local);
            }
        }
        grid.compute_normals();
        Ok(grid)
    }

    fn split(&self, _ctx: &DiceContext) -> Result<Vec<Box<dyn Primitive>>> {
        let (t0, t1) = self.range;
        let mid = (t0 + t1) * 0.5;
        let make = |range: (f32, f32)| -> Box<dyn Primitive> {
            Box::new(Self {
                base: self.base.clone(),
                kind: self.kind,
                periodic: self.periodic,
                points: self.points.clone(),
                width: self.width.clone(),
                v_basis: self.v_basis,
                range,
            })
        };
        Ok(vec![make((t0, mid)), make((mid, t1))])
    }

    fn clone_boxed(&self) -> Box<dyn Primitive> {
        Box::new(Self {
            base: self.base.clone(),
            kind: self.kind,
            periodic: self.periodic,
            points: self.points.clone(),
            width: self.width.clone(),
            v_basis: self.v_basis,
            range: self.range,
        })
    }
}

/// Builds one curve primitive per curve in a `curves` call.
pub fn curves(
    base: &PrimBase,
    curve_type: &str,
    nvertices: &[i32],
    wrap: &str,
    params: &ParamList,
) -> Result<Vec<Box<dyn Primitive>>> {
    let kind = match curve_type {
        "linear" => CurveKind::Linear,
        "cubic" => CurveKind::Cubic,
        other => {
            return Err(RenderError::InvalidData(format!(
                "unknown curve type \"{other}\""
            )));
        }
    };
    let periodic = match wrap {
        "periodic" => true,
        "nonperiodic" => false,
        other => {
            return Err(RenderError::InvalidData(format!(
                "unknown curve wrap \"{other}\""
            )));
        }
    };
    let positions = params
        .positions()
        .ok_or_else(|| RenderError::InvalidData("curves without \"P\"".to_string()))?;
    let total: usize = nvertices.iter().map(|&n| n.max(0) as usize).sum();
    if total != positions.len() {
        return Err(RenderError::InvalidData(format!(
            "curves carry {} vertices but counts sum to {total}",
            positions.len()
        )));
    }
    let v_basis = base.attributes.geometric.v_basis;
    for &count in nvertices {
        let count = count as usize;
        let ok = match (kind, periodic) {
            (CurveKind::Linear, _) => count >= 2,
            (CurveKind::Cubic, false) => count >= 4 && (count - 4) % v_basis.step == 0,
            (CurveKind::Cubic, true) => count >= 4 && count % v_basis.step == 0,
        };
        if !ok {
            return Err(RenderError::InvalidData(format!(
                "curve vertex count {count} does not fit a {curve_type} curve"
            )));
        }
    }

    let constant_width = params.float("constantwidth");
    let widths = params.floats("width");

    let mut out: Vec<Box<dyn Primitive>> = Vec::with_capacity(nvertices.len());
    let mut cursor = 0usize;
    let mut width_cursor = 0usize;
    for &count in nvertices {
        let count = count as usize;
        let points = positions[cursor..cursor + count].to_vec();
        cursor += count;

        let curve_stub = Curve {
            base: base.clone(),
            kind,
            periodic,
            points,
            width: CurveWidth::Constant(1.0),
            v_basis,
            range: (0.0, 1.0),
        };
        let nspans = curve_stub.segment_count() + usize::from(!periodic);
        let width = if let Some(w) = constant_width {
            CurveWidth::Constant(w)
        } else if let Some(all) = widths {
            let span = all
                .get(width_cursor..width_cursor + nspans)
                .ok_or_else(|| {
                    RenderError::InvalidData("curve widths underrun their counts".to_string())
                })?
                .to_vec();
            width_cursor += nspans;
            CurveWidth::PerSpan(span)
        } else {
            CurveWidth::Constant(1.0)
        };
        out.push(Box::new(Curve { width, ..curve_stub }));
    }
    Ok(out)
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

    fn ctx() -> DiceContext {
        DiceContext {
            camera_to_raster: Mat4::from_scale(Vec3::splat(8.0)),
            grid_limit: 256,
        }
    }

    fn line_params() -> ParamList {
        ParamList::new()
            .with_floats("vertex point P", &[0.0, 0.0, 1.0, 1.0, 0.0, 1.0])
            .with_floats("constant float constantwidth", &[0.1])
    }

    #[test]
    fn linear_curve_builds() {
        let prims = curves(&base(), "linear", &[2], "nonperiodic", &line_params()).unwrap();
        assert_eq!(prims.len(), 1);
    }

    #[test]
    fn bad_type_and_counts_reject() {
        assert!(curves(&base(), "quintic", &[2], "nonperiodic", &line_params()).is_err());
        assert!(curves(&base(), "cubic", &[3], "nonperiodic", &line_params()).is_err());
    }

    #[test]
    fn ribbon_grid_spans_width() {
        let prims = curves(&base(), "linear", &[2], "nonperiodic", &line_params()).unwrap();
        let grid = prims[0].dice(&ctx()).unwrap();
        assert_eq!(grid.u_dim, 2);
        // Across the ribbon the two rails are one width apart.
        let a = grid.positions[0][0];
        let b = grid.positions[0][1];
        assert!(((a - b).length() - 0.1).abs() < 1e-4);
    }

    #[test]
    fn split_halves_parameter_range() {
        let prims = curves(&base(), "linear", &[2], "nonperiodic", &line_params()).unwrap();
        let halves = prims[0].split(&ctx()).unwrap();
        assert_eq!(halves.len(), 2);
        let b0 = halves[0].bound();
        let b1 = halves[1].bound();
        assert!(b0.max.x <= b1.max.x + 0.1);
    }

    #[test]
    fn varying_width_interpolates() {
        let params = ParamList::new()
            .with_floats("vertex point P", &[0.0, 0.0, 1.0, 1.0, 0.0, 1.0])
            .with_floats("varying float width", &[0.1, 0.3]);
        let prims = curves(&base(), "linear", &[2], "nonperiodic", &params).unwrap();
        let grid = prims[0].dice(&ctx()).unwrap();
        let last = grid.v_dim - 1;
        let a = grid.positions[0][grid.index(0, last)];
        let b = grid.positions[0][grid.index(1, last)];
        assert!(((a - b).length() - 0.3).abs() < 1e-4);
    }
}
