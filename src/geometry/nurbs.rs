//! Non-Uniform Rational B-Spline Patches
//!
//! NURBS surfaces evaluated by Cox-de Boor basis recursion over rational
//! (homogeneous) control points. The knot-vector length must equal
//! `n + order` on each axis; the parametric domain is the knot range
//! `[knot[order-1], knot[n]]`.

use glam::{Vec3, Vec4};

use crate::errors::{RenderError, Result};
use crate::math::project_hpoint;

use super::{ParamSurface, ParametricPrim, PrimBase};

#[derive(Clone, Debug)]
pub struct NuPatchSurface {
    pub nu: usize,
    pub u_order: usize,
    pub u_knots: Vec<f32>,
    pub nv: usize,
    pub v_order: usize,
    pub v_knots: Vec<f32>,
    /// Homogeneous control points, u varying fastest.
    pub points: Vec<Vec4>,
    u_range: (f32, f32),
    v_range: (f32, f32),
}

/// Cox-de Boor basis functions of one axis at parameter `t`: returns the
/// `order` non-vanishing basis values and the first affected control
/// index.
fn basis_functions(t: f32, order: usize, n: usize, knots: &[f32]) -> (usize, Vec<f32>) {
    // Find the knot span containing t, clamped to the valid domain.
    let lo = order - 1;
    let hi = n; // one past the last valid span start
    let t = t.clamp(knots[lo], knots[hi]);
    let mut span = lo;
    while span + 1 < hi && t >= knots[span + 1] {
        span += 1;
    }

    let mut basis = vec![0.0f32; order];
    basis[0] = 1.0;
    for degree in 1..order {
        let mut saved = 0.0f32;
        for j in 0..degree {
            let left_idx = span - degree + 1 + j;
            let denom = knots[left_idx + degree] - knots[left_idx];
            let term = if denom.abs() <= f32::EPSILON {
                0.0
            } else {
                basis[j] / denom
            };
            let new = saved + (knots[left_idx + degree] - t) * term;
            saved = (t - knots[left_idx]) * term;
            basis[j] = new;
        }
        basis[degree] = saved;
    }
    (span + 1 - order, basis)
}

impl NuPatchSurface {
    pub fn new(
        nu: usize,
        u_order: usize,
        u_knots: Vec<f32>,
        nv: usize,
        v_order: usize,
        v_knots: Vec<f32>,
        points: Vec<Vec4>,
    ) -> Result<Self> {
        if u_order == 0 || v_order == 0 || nu < u_order || nv < v_order {
            return Err(RenderError::InvalidData(format!(
                "nupatch orders ({u_order}, {v_order}) exceed control counts ({nu}, {nv})"
            )));
        }
        if u_knots.len() != nu + u_order {
            return Err(RenderError::InvalidData(format!(
                "u knot vector holds {} values, expected {}",
                u_knots.len(),
                nu + u_order
            )));
        }
        if v_knots.len() != nv + v_order {
            return Err(RenderError::InvalidData(format!(
                "v knot vector holds {} values, expected {}",
                v_knots.len(),
                nv + v_order
            )));
        }
        if points.len() != nu * nv {
            return Err(RenderError::InvalidData(format!(
                "nupatch carries {} control points, expected {}",
                points.len(),
                nu * nv
            )));
        }
        if u_knots.windows(2).any(|w| w[1] < w[0])
            || v_knots.windows(2).any(|w| w[1] < w[0])
        {
            return Err(RenderError::InvalidData(
                "nupatch knot vectors must be non-decreasing".to_string(),
            ));
        }
        let u_range = (u_knots[u_order - 1], u_knots[nu]);
        let v_range = (v_knots[v_order - 1], v_knots[nv]);
        Ok(Self {
            nu,
            u_order,
            u_knots,
            nv,
            v_order,
            v_knots,
            points,
            u_range,
            v_range,
        })
    }
}

impl ParamSurface for NuPatchSurface {
    fn type_name(&self) -> &'static str {
        "nupatch"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        // Map the unit dice domain onto the knot domain.
        let tu = self.u_range.0 + u * (self.u_range.1 - self.u_range.0);
        let tv = self.v_range.0 + v * (self.v_range.1 - self.v_range.0);
        let (u_first, u_basis) = basis_functions(tu, self.u_order, self.nu, &self.u_knots);
        let (v_first, v_basis) = basis_functions(tv, self.v_order, self.nv, &self.v_knots);

        let mut sum = Vec4::ZERO;
        for (j, bv) in v_basis.iter().enumerate() {
            let row = (v_first + j) * self.nu;
            for (i, bu) in u_basis.iter().enumerate() {
                sum += self.points[row + u_first + i] * (bu * bv);
            }
        }
        project_hpoint(sum)
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

/// Builds a NURBS patch primitive.
pub fn nu_patch(base: PrimBase, surface: NuPatchSurface) -> ParametricPrim {
    ParametricPrim::new(base, Box::new(surface))
}
