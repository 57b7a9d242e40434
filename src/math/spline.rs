//! Cubic Spline Bases
//!
//! The named 4×4 basis matrices of the interface (`bezier`, `b-spline`,
//! `catmull-rom`, `hermite`, `power`), their step values, and a generic
//! cubic segment evaluator over any lerp-able control value.

use glam::{Mat4, Vec3, Vec4};

use super::mat4_from_rows;
use crate::errors::{RenderError, Result};

/// A cubic basis: the matrix in the interface's row convention, and the
/// number of control values to advance per segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub matrix: Mat4,
    pub step: usize,
}

impl Basis {
    #[must_use]
    pub fn bezier() -> Self {
        Self {
            matrix: mat4_from_rows([
                [-1.0, 3.0, -3.0, 1.0],
                [3.0, -6.0, 3.0, 0.0],
                [-3.0, 3.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
            ]),
            step: 3,
        }
    }

    #[must_use]
    pub fn b_spline() -> Self {
        Self {
            matrix: mat4_from_rows([
                [-1.0 / 6.0, 3.0 / 6.0, -3.0 / 6.0, 1.0 / 6.0],
                [3.0 / 6.0, -6.0 / 6.0, 3.0 / 6.0, 0.0],
                [-3.0 / 6.0, 0.0, 3.0 / 6.0, 0.0],
                [1.0 / 6.0, 4.0 / 6.0, 1.0 / 6.0, 0.0],
            ]),
            step: 1,
        }
    }

    #[must_use]
    pub fn catmull_rom() -> Self {
        Self {
            matrix: mat4_from_rows([
                [-0.5, 1.5, -1.5, 0.5],
                [1.0, -2.5, 2.0, -0.5],
                [-0.5, 0.0, 0.5, 0.0],
                [0.0, 1.0, 0.0, 0.0],
            ]),
            step: 1,
        }
    }

    #[must_use]
    pub fn hermite() -> Self {
        Self {
            matrix: mat4_from_rows([
                [2.0, 1.0, -2.0, 1.0],
                [-3.0, -2.0, 3.0, -1.0],
                [0.0, 1.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
            ]),
            step: 2,
        }
    }

    #[must_use]
    pub fn power() -> Self {
        Self {
            matrix: Mat4::IDENTITY,
            step: 4,
        }
    }

    /// Resolves a basis by its interface name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "bezier" => Ok(Self::bezier()),
            "b-spline" => Ok(Self::b_spline()),
            "catmull-rom" => Ok(Self::catmull_rom()),
            "hermite" => Ok(Self::hermite()),
            "power" => Ok(Self::power()),
            other => Err(RenderError::UnknownSymbol(format!("basis \"{other}\""))),
        }
    }

    /// Blend weights of the four control values at parameter `u`.
    #[must_use]
    pub fn weights(&self, u: f32) -> Vec4 {
        self.matrix.transpose() * Vec4::new(u * u * u, u * u, u, 1.0)
    }
}

impl Default for Basis {
    fn default() -> Self {
        Self::bezier()
    }
}

/// A single cubic segment over four control points.
#[derive(Debug, Clone, Copy)]
pub struct CubicCurve {
    pub basis: Basis,
    pub control: [Vec3; 4],
}

impl CubicCurve {
    #[must_use]
    pub fn new(basis: Basis, control: [Vec3; 4]) -> Self {
        Self { basis, control }
    }

    #[must_use]
    pub fn evaluate(&self, u: f32) -> Vec3 {
        let w = self.basis.weights(u);
        self.control[0] * w.x + self.control[1] * w.y + self.control[2] * w.z + self.control[3] * w.w
    }

    /// Blends four scalar control values with the same weights.
    #[must_use]
    pub fn evaluate_scalar(basis: &Basis, control: [f32; 4], u: f32) -> f32 {
        let w = basis.weights(u);
        control[0] * w.x + control[1] * w.y + control[2] * w.z + control[3] * w.w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn named_steps() {
        assert_eq!(Basis::bezier().step, 3);
        assert_eq!(Basis::b_spline().step, 1);
        assert_eq!(Basis::catmull_rom().step, 1);
        assert_eq!(Basis::hermite().step, 2);
        assert_eq!(Basis::power().step, 4);
    }

    #[test]
    fn bezier_interpolates_endpoints() {
        let c = CubicCurve::new(
            Basis::bezier(),
            [
                Vec3::ZERO,
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::ONE,
            ],
        );
        assert!(approx(c.evaluate(0.0), Vec3::ZERO));
        assert!(approx(c.evaluate(1.0), Vec3::ONE));
    }

    #[test]
    fn catmull_rom_passes_through_inner_points() {
        let c = CubicCurve::new(
            Basis::catmull_rom(),
            [
                Vec3::new(-1.0, 0.0, 0.0),
                Vec3::ZERO,
                Vec3::new(1.0, 2.0, 0.0),
                Vec3::new(2.0, 0.0, 0.0),
            ],
        );
        assert!(approx(c.evaluate(0.0), Vec3::ZERO));
        assert!(approx(c.evaluate(1.0), Vec3::new(1.0, 2.0, 0.0)));
    }

    #[test]
    fn weights_sum_to_one_for_interpolating_bases() {
        for basis in [Basis::bezier(), Basis::b_spline(), Basis::catmull_rom()] {
            let w = basis.weights(0.37);
            let sum = w.x + w.y + w.z + w.w;
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn unknown_basis_name() {
        assert!(Basis::by_name("bogus").is_err());
    }
}
