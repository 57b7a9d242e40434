//! Patches and Patch Meshes
//!
//! Bilinear patches (4 control points), bicubic patches (16 control
//! points evaluated with the attribute's u/v basis), and patch meshes
//! that unroll into individual patches honouring the basis steps and
//! periodic wrap.

use glam::{Vec3, Vec4};

use crate::errors::{RenderError, Result};
use crate::math::{Color, spline::Basis};

use super::{ParamSurface, ParametricPrim, PrimBase};

#[derive(Clone)]
pub struct BilinearPatch {
    pub corners: [Vec3; 4],
}

impl ParamSurface for BilinearPatch {
    fn type_name(&self) -> &'static str {
        "patch"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let top = self.corners[0].lerp(self.corners[1], u);
        let bottom = self.corners[2].lerp(self.corners[3], u);
        top.lerp(bottom, v)
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct BicubicPatch {
    /// Row-major over v: `points[v * 4 + u]`.
    pub points: [Vec3; 16],
    pub u_basis: Basis,
    pub v_basis: Basis,
}

impl ParamSurface for BicubicPatch {
    fn type_name(&self) -> &'static str {
        "patch"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let wu: Vec4 = self.u_basis.weights(u);
        let wv: Vec4 = self.v_basis.weights(v);
        let mut out = Vec3::ZERO;
        for row in 0..4 {
            let base = row * 4;
            let along_u = self.points[base] * wu.x
                + self.points[base + 1] * wu.y
                + self.points[base + 2] * wu.z
                + self.points[base + 3] * wu.w;
            out += along_u * wv[row];
        }
        out
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

/// Builds a single bilinear patch primitive. Optional per-corner color
/// and opacity come from varying parameters.
pub fn bilinear_patch(
    base: PrimBase,
    corners: [Vec3; 4],
    cs: Option<[Color; 4]>,
    os: Option<[Color; 4]>,
) -> ParametricPrim {
    let mut prim = ParametricPrim::new(base, Box::new(BilinearPatch { corners }));
    prim.varyings.cs = cs;
    prim.varyings.os = os;
    prim
}

/// Builds a single bicubic patch primitive from 16 control points.
pub fn bicubic_patch(
    base: PrimBase,
    points: &[Vec3],
    u_basis: Basis,
    v_basis: Basis,
) -> Result<ParametricPrim> {
    if points.len() != 16 {
        return Err(RenderError::InvalidData(format!(
            "bicubic patch needs 16 control points, got {}",
            points.len()
        )));
    }
    let mut fixed = [Vec3::ZERO; 16];
    fixed.copy_from_slice(points);
    Ok(ParametricPrim::new(
        base,
        Box::new(BicubicPatch {
            points: fixed,
            u_basis,
            v_basis,
        }),
    ))
}

/// Patch counts of a mesh given the wrap mode and basis step.
fn patch_count(nverts: usize, periodic: bool, step: usize, cubic: bool) -> Result<usize> {
    if cubic {
        if periodic {
            if nverts < 4 || nverts % step != 0 {
                return Err(RenderError::InvalidData(format!(
                    "periodic cubic mesh needs a multiple of the step, got {nverts}"
                )));
            }
            Ok(nverts / step)
        } else {
            if nverts < 4 || (nverts - 4) % step != 0 {
                return Err(RenderError::InvalidData(format!(
                    "cubic mesh vertex count {nverts} does not fit the basis step {step}"
                )));
            }
            Ok((nverts - 4) / step + 1)
        }
    } else if periodic {
        Ok(nverts)
    } else {
        if nverts < 2 {
            return Err(RenderError::InvalidData(
                "bilinear mesh needs at least 2 vertices per axis".to_string(),
            ));
        }
        Ok(nverts - 1)
    }
}

/// Unrolls a patch mesh into individual patch primitives. `points` is
/// `nu * nv` vertices, u varying fastest.
pub fn patch_mesh(
    base: &PrimBase,
    cubic: bool,
    nu: usize,
    u_periodic: bool,
    nv: usize,
    v_periodic: bool,
    points: &[Vec3],
    u_basis: Basis,
    v_basis: Basis,
) -> Result<Vec<ParametricPrim>> {
    if points.len() != nu * nv {
        return Err(RenderError::InvalidData(format!(
            "patch mesh carries {} vertices, expected {}",
            points.len(),
            nu * nv
        )));
    }
    let npu = patch_count(nu, u_periodic, u_basis.step, cubic)?;
    let npv = patch_count(nv, v_periodic, v_basis.step, cubic)?;

    let vertex = |iu: usize, iv: usize| points[(iv % nv) * nu + (iu % nu)];
    let mut patches = Vec::with_capacity(npu * npv);
    for pv in 0..npv {
        for pu in 0..npu {
            if cubic {
                let u0 = pu * u_basis.step;
                let v0 = pv * v_basis.step;
                let mut ctrl = [Vec3::ZERO; 16];
                for (j, row) in ctrl.chunks_exact_mut(4).enumerate() {
                    for (i, p) in row.iter_mut().enumerate() {
                        *p = vertex(u0 + i, v0 + j);
                    }
                }
                patches.push(ParametricPrim::new(
                    base.clone(),
                    Box::new(BicubicPatch {
                        points: ctrl,
                        u_basis,
                        v_basis,
                    }),
                ));
            } else {
                let corners = [
                    vertex(pu, pv),
                    vertex(pu + 1, pv),
                    vertex(pu, pv + 1),
                    vertex(pu + 1, pv + 1),
                ];
                patches.push(ParametricPrim::new(
                    base.clone(),
                    Box::new(BilinearPatch { corners }),
                ));
            }
        }
    }
    Ok(patches)
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

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn bilinear_corners_interpolate() {
        let p = BilinearPatch {
            corners: [
                Vec3::ZERO,
                Vec3::X,
                Vec3::Y,
                Vec3::new(1.0, 1.0, 0.0),
            ],
        };
        assert!(approx(p.eval(0.0, 0.0), Vec3::ZERO));
        assert!(approx(p.eval(1.0, 1.0), Vec3::new(1.0, 1.0, 0.0)));
        assert!(approx(p.eval(0.5, 0.5), Vec3::new(0.5, 0.5, 0.0)));
    }

    #[test]
    fn bicubic_bezier_interpolates_corner_points() {
        let mut points = [Vec3::ZERO; 16];
        for (i, p) in points.iter_mut().enumerate() {
            let u = (i % 4) as f32 / 3.0;
            let v = (i / 4) as f32 / 3.0;
            *p = Vec3::new(u, v, 0.0);
        }
        let patch = BicubicPatch {
            points,
            u_basis: Basis::bezier(),
            v_basis: Basis::bezier(),
        };
        assert!(approx(patch.eval(0.0, 0.0), Vec3::ZERO));
        assert!(approx(patch.eval(1.0, 1.0), Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn bicubic_patch_rejects_wrong_count() {
        assert!(bicubic_patch(base(), &[Vec3::ZERO; 12], Basis::bezier(), Basis::bezier()).is_err());
    }

    #[test]
    fn bilinear_mesh_patch_count() {
        let points: Vec<Vec3> = (0..12)
            .map(|i| Vec3::new((i % 4) as f32, (i / 4) as f32, 0.0))
            .collect();
        let patches = patch_mesh(
            &base(),
            false,
            4,
            false,
            3,
            false,
            &points,
            Basis::bezier(),
            Basis::bezier(),
        )
        .unwrap();
        assert_eq!(patches.len(), 6);
    }

    #[test]
    fn periodic_mesh_wraps() {
        let points: Vec<Vec3> = (0..8)
            .map(|i| Vec3::new((i % 4) as f32, (i / 4) as f32, 0.0))
            .collect();
        let patches = patch_mesh(
            &base(),
            false,
            4,
            true,
            2,
            false,
            &points,
            Basis::bezier(),
            Basis::bezier(),
        )
        .unwrap();
        // Periodic in u: 4 patches per row instead of 3.
        assert_eq!(patches.len(), 4);
    }

    #[test]
    fn cubic_mesh_count_honours_step() {
        // 7 vertices with bezier step 3: two patches.
        let points: Vec<Vec3> = (0..28)
            .map(|i| Vec3::new((i % 7) as f32, (i / 7) as f32, 0.0))
            .collect();
        let patches = patch_mesh(
            &base(),
            true,
            7,
            false,
            4,
            false,
            &points,
            Basis::bezier(),
            Basis::bezier(),
        )
        .unwrap();
        assert_eq!(patches.len(), 2);
    }
}
