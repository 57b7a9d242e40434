//! Points
//!
//! Point clouds rendered as screen-oriented disks with per-point width.
//! A multi-point primitive splits spatially until single points remain;
//! a single point dices into one camera-facing quad sized to its width.

use glam::Vec3;
use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::math::Bound;
use crate::micropoly::MicroGrid;
use crate::params::ParamList;

use super::{DiceContext, PrimBase, Primitive};

pub struct Points {
    base: PrimBase,
    positions: Vec<Vec3>,
    widths: Vec<f32>,
}

impl Points {
    /// Builds the primitive from a `points` call.
    pub fn build(base: PrimBase, params: &ParamList) -> Result<Self> {
        let positions = params
            .positions()
            .ok_or_else(|| RenderError::InvalidData("points without \"P\"".to_string()))?;
        if positions.is_empty() {
            return Err(RenderError::InvalidData("points call with no points".to_string()));
        }
        let widths = if let Some(w) = params.float("constantwidth") {
            vec![w; positions.len()]
        } else if let Some(per_point) = params.floats("width") {
            if per_point.len() != positions.len() {
                return Err(RenderError::InvalidData(format!(
                    "points carry {} widths for {} points",
                    per_point.len(),
                    positions.len()
                )));
            }
            per_point.to_vec()
        } else {
            vec![1.0; positions.len()]
        };
        Ok(Self {
            base,
            positions,
            widths,
        })
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

impl Primitive for Points {
    fn type_name(&self) -> &'static str {
        "points"
    }

    fn base(&self) -> &PrimBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrimBase {
        &mut self.base
    }

    fn bound(&self) -> Bound {
        let max_width = self.widths.iter().copied().fold(0.0, f32::max);
        let b = Bound::from_points(self.positions.iter().copied()).inflate(max_width * 0.5);
        self.base.camera_bound(&b)
    }

    fn diceable(&self, _ctx: &DiceContext) -> bool {
        self.positions.len() == 1
    }

    fn dice(&self, _ctx: &DiceContext) -> Result<MicroGrid> {
        let mut grid = MicroGrid::new(2, 2, self.base.attributes.clone());
        grid.csg = self.base.csg;
        let times: SmallVec<[f32; 2]> = self.base.transform.times().collect();
        grid.times = times.clone();
        grid.positions.clear();
        let scale = self.object_scale();
        let half = self.widths[0] * 0.5 * scale;
        for &time in &times {
            let m = self.base.transform.matrix_at(time);
            let centre = crate::math::transform_point(&m, self.positions[0]);
            // Screen-oriented: the quad lies in the camera xy plane.
            grid.positions.push(vec![
                centre + Vec3::new(-half, -half, 0.0),
                centre + Vec3::new(half, -half, 0.0),
                centre + Vec3::new(-half, half, 0.0),
                centre + Vec3::new(half, half, 0.0),
            ]);
        }
        for idx in 0..4 {
            grid.u[idx] = (idx % 2) as f32;
            grid.v[idx] = (idx / 2) as f32;
            grid.s[idx] = grid.u[idx];
            grid.t[idx] = grid.v[idx];
        }
        grid.normals.fill(Vec3::NEG_Z);
        Ok(grid)
    }

    fn split(&self, _ctx: &DiceContext) -> Result<Vec<Box<dyn Primitive>>> {
        if self.positions.len() <= 1 {
            return Ok(Vec::new());
        }
        // Partition across the median of the longest bound axis.
        let b = Bound::from_points(self.positions.iter().copied());
        let size = b.size();
        let axis = if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        };
        let mut order: Vec<usize> = (0..self.positions.len()).collect();
        order.sort_by(|&a, &b| self.positions[a][axis].total_cmp(&self.positions[b][axis]));
        let mid = order.len() / 2;
        let collect = |indices: &[usize]| -> Box<dyn Primitive> {
            Box::new(Self {
                base: self.base.clone(),
                positions: indices.iter().map(|&i| self.positions[i]).collect(),
                widths: indices.iter().map(|&i| self.widths[i]).collect(),
            })
        };
        Ok(vec![collect(&order[..mid]), collect(&order[mid..])])
    }

    fn clone_boxed(&self) -> Box<dyn Primitive> {
        Box::new(Self {
            base: self.base.clone(),
            positions: self.positions.clone(),
            widths: self.widths.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Attributes, Transform};
    use glam::Mat4;
    use std::sync::Arc;

    fn base() -> PrimBase {
        PrimBase::new(
            Arc::new(Attributes::default()),
            Arc::new(Transform::identity()),
        )
    }

    fn ctx() -> DiceContext {
        DiceContext {
            camera_to_raster: Mat4::IDENTITY,
            grid_limit: 256,
        }
    }

    fn cloud(n: usize) -> Points {
        let mut coords = Vec::new();
        for i in 0..n {
            coords.extend_from_slice(&[i as f32, 0.0, 1.0]);
        }
        let params = ParamList::new()
            .with_floats("vertex point P", &coords)
            .with_floats("constant float constantwidth", &[0.5]);
        Points::build(base(), &params).unwrap()
    }

    #[test]
    fn splits_down_to_single_points() {
        let pts = cloud(4);
        assert!(!pts.diceable(&ctx()));
        let halves = pts.split(&ctx()).unwrap();
        assert_eq!(halves.len(), 2);
        let mut leaves = 0;
        let mut stack = halves;
        while let Some(p) = stack.pop() {
            if p.diceable(&ctx()) {
                leaves += 1;
            } else {
                stack.extend(p.split(&ctx()).unwrap());
            }
        }
        assert_eq!(leaves, 4);
    }

    #[test]
    fn single_point_dices_to_quad() {
        let pts = cloud(1);
        let grid = pts.dice(&ctx()).unwrap();
        assert_eq!(grid.vertex_count(), 4);
        let b = grid.bound();
        assert!((b.size().x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn width_count_mismatch_rejected() {
        let params = ParamList::new()
            .with_floats("vertex point P", &[0.0, 0.0, 1.0, 1.0, 1.0, 1.0])
            .with_floats("varying float width", &[0.5]);
        assert!(Points::build(base(), &params).is_err());
    }
}
