//! Value Model
//!
//! Core arithmetic types shared by every stage of the pipeline: RGB color
//! with color-space conversions, axis-aligned bounds, and the cubic spline
//! bases used by bicubic patches and curves. Vectors and matrices are
//! `glam` types used directly.

pub mod bound;
pub mod color;
pub mod spline;

pub use bound::Bound;
pub use color::Color;
pub use spline::{Basis, CubicCurve};

use glam::{Mat4, Vec3, Vec4};

/// Builds a matrix from row-major notation (the convention used by the
/// interface's basis and transform calls).
#[must_use]
pub fn mat4_from_rows(rows: [[f32; 4]; 4]) -> Mat4 {
    Mat4::from_cols_array_2d(&rows).transpose()
}

/// Projects a homogeneous point to 3-space. Points with a vanishing weight
/// are returned unprojected to avoid infinities downstream.
#[must_use]
pub fn project_hpoint(p: Vec4) -> Vec3 {
    if p.w.abs() <= f32::EPSILON {
        p.truncate()
    } else {
        p.truncate() / p.w
    }
}

/// Transforms a point, performing the homogeneous divide. Used wherever a
/// perspective projection matrix is applied to geometry.
#[must_use]
pub fn transform_point(m: &Mat4, p: Vec3) -> Vec3 {
    project_hpoint(*m * p.extend(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_round_trip() {
        let m = mat4_from_rows([
            [1.0, 2.0, 3.0, 4.0],
            [5.0, 6.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, 16.0],
        ]);
        // Row 0 of the notation is the x-coefficients of each output axis.
        assert_eq!(m.row(0), Vec4::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn hpoint_projection() {
        let p = Vec4::new(2.0, 4.0, 6.0, 2.0);
        assert_eq!(project_hpoint(p), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn perspective_divide_through_matrix() {
        let persp = mat4_from_rows([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ]);
        let p = transform_point(&persp, Vec3::new(2.0, 2.0, 2.0));
        assert!((p.x - 1.0).abs() < 1e-6 && (p.y - 1.0).abs() < 1e-6);
    }
}
