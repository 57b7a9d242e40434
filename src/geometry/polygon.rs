//! Polygons
//!
//! Planar polygons and the indexed polygon meshes, all converted to
//! triangles and diced as bilinear patches with a duplicated corner.
//! Convex polygons fan-triangulate; general polygons are ear-clipped in
//! the plane of their Newell normal, with hole loops bridged into the
//! outer boundary first. Bad vertex counts reject with `InvalidData`.

use glam::{Vec2, Vec3};

use crate::errors::{RenderError, Result};
use crate::math::Color;
use crate::params::{ParamList, StorageClass};

use super::patch::bilinear_patch;
use super::{ParametricPrim, PrimBase};

/// Per-vertex varyings gathered from a polygon's parameter list.
#[derive(Debug, Clone, Default)]
pub struct PolyVaryings {
    pub cs: Option<Vec<Color>>,
    pub os: Option<Vec<Color>>,
}

impl PolyVaryings {
    /// Extracts color and opacity when supplied per vertex.
    #[must_use]
    pub fn from_params(params: &ParamList) -> Self {
        let per_vertex = |name: &str| -> Option<Vec<Color>> {
            let p = params.find(name)?;
            match p.decl.class {
                StorageClass::Varying | StorageClass::Vertex | StorageClass::FaceVarying => {
                    params.colors(name)
                }
                _ => None,
            }
        };
        Self {
            cs: per_vertex("Cs"),
            os: per_vertex("Os"),
        }
    }

    fn corner(&self, source: &Option<Vec<Color>>, idx: [usize; 3]) -> Option<[Color; 4]> {
        let values = source.as_ref()?;
        let fetch = |i: usize| values.get(i).copied();
        Some([fetch(idx[0])?, fetch(idx[1])?, fetch(idx[2])?, fetch(idx[2])?])
    }
}

/// Builds one bilinear patch per triangle, duplicating the last corner.
fn triangle_patches(
    base: &PrimBase,
    positions: &[Vec3],
    triangles: &[[usize; 3]],
    varyings: &PolyVaryings,
) -> Vec<ParametricPrim> {
    triangles
        .iter()
        .map(|tri| {
            let corners = [
                positions[tri[0]],
                positions[tri[1]],
                positions[tri[2]],
                positions[tri[2]],
            ];
            bilinear_patch(
                base.clone(),
                corners,
                varyings.corner(&varyings.cs, *tri),
                varyings.corner(&varyings.os, *tri),
            )
        })
        .collect()
}

/// Newell normal of a loop.
fn newell_normal(points: &[Vec3]) -> Vec3 {
    let mut n = Vec3::ZERO;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        n.x += (a.y - b.y) * (a.z + b.z);
        n.y += (a.z - b.z) * (a.x + b.x);
        n.z += (a.x - b.x) * (a.y + b.y);
    }
    n
}

/// Projects onto the plane facing the dominant normal axis.
fn project_2d(points: &[Vec3], normal: Vec3) -> Vec<Vec2> {
    let ax = normal.x.abs();
    let ay = normal.y.abs();
    let az = normal.z.abs();
    points
        .iter()
        .map(|p| {
            if ax >= ay && ax >= az {
                Vec2::new(p.y, p.z)
            } else if ay >= ax && ay >= az {
                Vec2::new(p.x, p.z)
            } else {
                Vec2::new(p.x, p.y)
            }
        })
        .collect()
}

fn signed_area(points: &[Vec2]) -> f32 {
    let mut area = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        area += a.x * b.y - b.x * a.y;
    }
    area * 0.5
}

fn point_in_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    let sign = |p1: Vec2, p2: Vec2, p3: Vec2| {
        (p1.x - p3.x) * (p2.y - p3.y) - (p2.x - p3.x) * (p1.y - p3.y)
    };
    let d1 = sign(p, a, b);
    let d2 = sign(p, b, c);
    let d3 = sign(p, c, a);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Ear-clipping over projected indices. Returns triangles as indices
/// into the input loop.
fn ear_clip(projected: &[Vec2]) -> Result<Vec<[usize; 3]>> {
    let n = projected.len();
    if n < 3 {
        return Err(RenderError::InvalidData(format!(
            "polygon loop has {n} vertices"
        )));
    }
    let ccw = signed_area(projected) >= 0.0;
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);

    let convex = |a: Vec2, b: Vec2, c: Vec2| {
        let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        if ccw { cross > 0.0 } else { cross < 0.0 }
    };

    let mut guard = 0usize;
    while remaining.len() > 3 {
        let len = remaining.len();
        let mut clipped = false;
        for i in 0..len {
            let ia = remaining[(i + len - 1) % len];
            let ib = remaining[i];
            let ic = remaining[(i + 1) % len];
            let (a, b, c) = (projected[ia], projected[ib], projected[ic]);
            if !convex(a, b, c) {
                continue;
            }
            let blocked = remaining
                .iter()
                .filter(|&&other| other != ia && other != ib && other != ic)
                .any(|&other| point_in_triangle(projected[other], a, b, c));
            if blocked {
                continue;
            }
            triangles.push([ia, ib, ic]);
            remaining.remove(i);
            clipped = true;
            break;
        }
        guard += 1;
        if !clipped || guard > 4 * n {
            // Degenerate loop: fall back to a fan so rendering continues.
            for i in 1..remaining.len() - 1 {
                triangles.push([remaining[0], remaining[i], remaining[i + 1]]);
            }
            return Ok(triangles);
        }
    }
    triangles.push([remaining[0], remaining[1], remaining[2]]);
    Ok(triangles)
}

/// Bridges hole loops into the outer loop by connecting each hole's
/// first vertex to its nearest outer vertex.
fn bridge_holes(loops: &[Vec<usize>], projected: &[Vec2]) -> Vec<usize> {
    let mut merged: Vec<usize> = loops[0].clone();
    for hole in &loops[1..] {
        if hole.is_empty() {
            continue;
        }
        // Hole vertex closest to the current boundary.
        let (hole_at, outer_at) = {
            let mut best = (0usize, 0usize, f32::INFINITY);
            for (hi, &hidx) in hole.iter().enumerate() {
                for (oi, &oidx) in merged.iter().enumerate() {
                    let d = projected[hidx].distance_squared(projected[oidx]);
                    if d < best.2 {
                        best = (hi, oi, d);
                    }
                }
            }
            (best.0, best.1)
        };
        // Splice: outer[..=o], hole rotated to start at hole_at, back to
        // hole start, then outer vertex again.
        let mut next: Vec<usize> = Vec::with_capacity(merged.len() + hole.len() + 2);
        next.extend_from_slice(&merged[..=outer_at]);
        for k in 0..=hole.len() {
            next.push(hole[(hole_at + k) % hole.len()]);
        }
        next.extend_from_slice(&merged[outer_at..]);
        merged = next;
    }
    merged
}

/// A single (convex) polygon: fan triangulation.
pub fn polygon(
    base: &PrimBase,
    params: &ParamList,
) -> Result<Vec<ParametricPrim>> {
    let positions = params
        .positions()
        .ok_or_else(|| RenderError::InvalidData("polygon without \"P\"".to_string()))?;
    if positions.len() < 3 {
        return Err(RenderError::InvalidData(format!(
            "polygon has {} vertices",
            positions.len()
        )));
    }
    let varyings = PolyVaryings::from_params(params);
    let triangles: Vec<[usize; 3]> = (1..positions.len() - 1).map(|i| [0, i, i + 1]).collect();
    Ok(triangle_patches(base, &positions, &triangles, &varyings))
}

/// A general polygon: outer loop plus hole loops, ear-clipped.
pub fn general_polygon(
    base: &PrimBase,
    nverts: &[i32],
    params: &ParamList,
) -> Result<Vec<ParametricPrim>> {
    let positions = params
        .positions()
        .ok_or_else(|| RenderError::InvalidData("polygon without \"P\"".to_string()))?;
    let total: usize = nverts.iter().map(|&n| n.max(0) as usize).sum();
    if nverts.is_empty() || total != positions.len() || nverts.iter().any(|&n| n < 3) {
        return Err(RenderError::InvalidData(format!(
            "general polygon loop counts {nverts:?} do not fit {} vertices",
            positions.len()
        )));
    }
    let varyings = PolyVaryings::from_params(params);

    let mut loops: Vec<Vec<usize>> = Vec::with_capacity(nverts.len());
    let mut cursor = 0usize;
    for &count in nverts {
        let count = count as usize;
        loops.push((cursor..cursor + count).collect());
        cursor += count;
    }

    let normal = newell_normal(&positions[..loops[0].len()]);
    let projected = project_2d(&positions, normal);
    let merged = bridge_holes(&loops, &projected);
    let merged_2d: Vec<Vec2> = merged.iter().map(|&i| projected[i]).collect();
    let local_tris = ear_clip(&merged_2d)?;
    let triangles: Vec<[usize; 3]> = local_tris
        .iter()
        .map(|t| [merged[t[0]], merged[t[1]], merged[t[2]]])
        .collect();
    Ok(triangle_patches(base, &positions, &triangles, &varyings))
}

/// Indexed convex polygon mesh.
pub fn points_polygons(
    base: &PrimBase,
    nverts: &[i32],
    verts: &[i32],
    params: &ParamList,
) -> Result<Vec<ParametricPrim>> {
    let positions = params
        .positions()
        .ok_or_else(|| RenderError::InvalidData("polygon mesh without \"P\"".to_string()))?;
    let total: usize = nverts.iter().map(|&n| n.max(0) as usize).sum();
    if total != verts.len() || nverts.iter().any(|&n| n < 3) {
        return Err(RenderError::InvalidData(format!(
            "polygon mesh face counts sum to {total} but {} indices given",
            verts.len()
        )));
    }
    let max_index = verts.iter().copied().max().unwrap_or(0);
    if max_index < 0 || max_index as usize >= positions.len() {
        return Err(RenderError::InvalidData(format!(
            "polygon mesh index {max_index} out of range"
        )));
    }
    let varyings = PolyVaryings::from_params(params);

    let mut patches = Vec::new();
    let mut cursor = 0usize;
    for &count in nverts {
        let count = count as usize;
        let face = &verts[cursor..cursor + count];
        let triangles: Vec<[usize; 3]> = (1..count - 1)
            .map(|i| {
                [
                    face[0] as usize,
                    face[i] as usize,
                    face[i + 1] as usize,
                ]
            })
            .collect();
        patches.extend(triangle_patches(base, &positions, &triangles, &varyings));
        cursor += count;
    }
    Ok(patches)
}

/// Indexed general polygon mesh with hole loops per face.
pub fn points_general_polygons(
    base: &PrimBase,
    nloops: &[i32],
    nverts: &[i32],
    verts: &[i32],
    params: &ParamList,
) -> Result<Vec<ParametricPrim>> {
    let positions = params
        .positions()
        .ok_or_else(|| RenderError::InvalidData("polygon mesh without \"P\"".to_string()))?;
    let total_loops: usize = nloops.iter().map(|&n| n.max(0) as usize).sum();
    if total_loops != nverts.len() {
        return Err(RenderError::InvalidData(format!(
            "general polygon mesh declares {total_loops} loops but {} loop sizes",
            nverts.len()
        )));
    }
    let varyings = PolyVaryings::from_params(params);

    let mut patches = Vec::new();
    let mut loop_cursor = 0usize;
    let mut vert_cursor = 0usize;
    for &loop_count in nloops {
        let loop_count = loop_count as usize;
        let mut loops: Vec<Vec<usize>> = Vec::with_capacity(loop_count);
        for &count in &nverts[loop_cursor..loop_cursor + loop_count] {
            let count = count.max(0) as usize;
            if count < 3 || vert_cursor + count > verts.len() {
                return Err(RenderError::InvalidData(
                    "general polygon mesh loop underruns its indices".to_string(),
                ));
            }
            loops.push(
                verts[vert_cursor..vert_cursor + count]
                    .iter()
                    .map(|&i| i as usize)
                    .collect(),
            );
            vert_cursor += count;
        }
        loop_cursor += loop_count;

        let outer: Vec<Vec3> = loops[0].iter().map(|&i| positions[i]).collect();
        let normal = newell_normal(&outer);
        let projected = project_2d(&positions, normal);
        let merged = bridge_holes(&loops, &projected);
        let merged_2d: Vec<Vec2> = merged.iter().map(|&i| projected[i]).collect();
        let local = ear_clip(&merged_2d)?;
        let triangles: Vec<[usize; 3]> = local
            .iter()
            .map(|t| [merged[t[0]], merged[t[1]], merged[t[2]]])
            .collect();
        patches.extend(triangle_patches(base, &positions, &triangles, &varyings));
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

    fn quad_params() -> ParamList {
        ParamList::new().with_floats(
            "vertex point P",
            &[
                0.0, 0.0, 1.0, //
                1.0, 0.0, 1.0, //
                1.0, 1.0, 1.0, //
                0.0, 1.0, 1.0,
            ],
        )
    }

    #[test]
    fn quad_fans_into_two_patches() {
        let patches = polygon(&base(), &quad_params()).unwrap();
        assert_eq!(patches.len(), 2);
    }

    #[test]
    fn degenerate_polygon_rejected() {
        let params = ParamList::new().with_floats("vertex point P", &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let err = match polygon(&base(), &params) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidData);
    }

    #[test]
    fn concave_polygon_ear_clips() {
        // An L-shape: 6 vertices, 4 triangles.
        let params = ParamList::new().with_floats(
            "vertex point P",
            &[
                0.0, 0.0, 0.0, //
                2.0, 0.0, 0.0, //
                2.0, 1.0, 0.0, //
                1.0, 1.0, 0.0, //
                1.0, 2.0, 0.0, //
                0.0, 2.0, 0.0,
            ],
        );
        let patches = general_polygon(&base(), &[6], &params).unwrap();
        assert_eq!(patches.len(), 4);
    }

    #[test]
    fn points_polygons_counts_must_match() {
        let params = quad_params();
        assert!(points_polygons(&base(), &[4], &[0, 1, 2], &params).is_err());
        let ok = points_polygons(&base(), &[4], &[0, 1, 2, 3], &params).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn out_of_range_index_rejected() {
        let params = quad_params();
        assert!(points_polygons(&base(), &[3], &[0, 1, 9], &params).is_err());
    }

    #[test]
    fn per_vertex_color_reaches_patches() {
        let params = quad_params().with_floats(
            "varying color Cs",
            &[
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 1.0, //
                1.0, 1.0, 1.0,
            ],
        );
        let patches = polygon(&base(), &params).unwrap();
        let cs = patches[0].varyings.cs.unwrap();
        assert_eq!(cs[0], Color::new(1.0, 0.0, 0.0));
    }
}
