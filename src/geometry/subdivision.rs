//! Subdivision Meshes
//!
//! Catmull-Clark subdivision surfaces with crease, corner, hole and
//! interpolate-boundary tags. The primitive refines itself one level per
//! split until its faces are raster-small, then emits one bilinear patch
//! per quad face; after the first subdivision every face is a quad.
//! Edges shared by more than two faces reject with
//! `NonManifoldSubdivision`.

use glam::Vec3;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{RenderError, Result};
use crate::math::Bound;
use crate::micropoly::MicroGrid;
use crate::params::ParamList;

use super::patch::bilinear_patch;
use super::{DiceContext, PrimBase, Primitive};

/// Subdivision levels after which refinement stops regardless of size.
const MAX_LEVELS: u32 = 6;

/// Raster edge length under which faces become patches.
const FINE_ENOUGH: f32 = 8.0;

#[derive(Debug, Clone, Default)]
pub struct SubdivTags {
    /// (vertex a, vertex b, sharpness) per crease edge.
    pub creases: Vec<(usize, usize, f32)>,
    /// (vertex, sharpness) per corner.
    pub corners: Vec<(usize, f32)>,
    /// Face indices excluded from the surface.
    pub holes: Vec<usize>,
    pub interpolate_boundary: bool,
}

impl SubdivTags {
    /// Splits the interface's tag arrays (names, per-tag int/float
    /// ranges) into structured tags.
    pub fn parse(
        tags: &[String],
        nargs: &[i32],
        intargs: &[i32],
        floatargs: &[f32],
    ) -> Result<Self> {
        if nargs.len() != tags.len() * 2 {
            return Err(RenderError::InvalidData(format!(
                "subdivision tags carry {} arg counts for {} tags",
                nargs.len(),
                tags.len()
            )));
        }
        let mut out = Self::default();
        let mut int_cursor = 0usize;
        let mut float_cursor = 0usize;
        for (i, tag) in tags.iter().enumerate() {
            let n_int = nargs[i * 2].max(0) as usize;
            let n_float = nargs[i * 2 + 1].max(0) as usize;
            let ints = intargs
                .get(int_cursor..int_cursor + n_int)
                .ok_or_else(|| RenderError::InvalidData("subdivision tag ints underrun".into()))?;
            let floats = floatargs
                .get(float_cursor..float_cursor + n_float)
                .ok_or_else(|| {
                    RenderError::InvalidData("subdivision tag floats underrun".into())
                })?;
            int_cursor += n_int;
            float_cursor += n_float;
            match tag.as_str() {
                "crease" => {
                    let sharp = floats.first().copied().unwrap_or(1.0);
                    for pair in ints.windows(2) {
                        out.creases
                            .push((pair[0] as usize, pair[1] as usize, sharp));
                    }
                }
                "corner" => {
                    let sharp = floats.first().copied().unwrap_or(1.0);
                    for &v in ints {
                        out.corners.push((v as usize, sharp));
                    }
                }
                "hole" => {
                    out.holes.extend(ints.iter().map(|&f| f as usize));
                }
                "interpolateboundary" => out.interpolate_boundary = true,
                _ => {}
            }
        }
        Ok(out)
    }
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

struct EdgeInfo {
    faces: SmallVec<[usize; 2]>,
    midpoint_accum: Vec3,
    sharpness: f32,
}

#[derive(Debug)]
pub struct SubdivisionMesh {
    base: PrimBase,
    faces: Vec<Vec<usize>>,
    vertices: Vec<Vec3>,
    tags: SubdivTags,
    level: u32,
}

impl SubdivisionMesh {
    /// Builds the primitive, validating manifoldness and the scheme.
    pub fn build(
        base: PrimBase,
        scheme: &str,
        nverts: &[i32],
        verts: &[i32],
        tags: SubdivTags,
        params: &ParamList,
    ) -> Result<Self> {
        if scheme != "catmull-clark" {
            return Err(RenderError::Unimplemented(format!(
                "subdivision scheme \"{scheme}\""
            )));
        }
        let vertices = params
            .positions()
            .ok_or_else(|| RenderError::InvalidData("subdivision mesh without \"P\"".into()))?;
        let total: usize = nverts.iter().map(|&n| n.max(0) as usize).sum();
        if total != verts.len() || nverts.iter().any(|&n| n < 3) {
            return Err(RenderError::InvalidData(
                "subdivision mesh face counts do not match its indices".into(),
            ));
        }
        let mut faces = Vec::with_capacity(nverts.len());
        let mut cursor = 0usize;
        for &count in nverts {
            let count = count as usize;
            let face: Vec<usize> = verts[cursor..cursor + count]
                .iter()
                .map(|&i| i as usize)
                .collect();
            if face.iter().any(|&i| i >= vertices.len()) {
                return Err(RenderError::InvalidData(
                    "subdivision mesh index out of range".into(),
                ));
            }
            faces.push(face);
            cursor += count;
        }

        let mesh = Self {
            base,
            faces,
            vertices,
            tags,
            level: 0,
        };
        // Manifold check up front so the error points at the input mesh.
        mesh.collect_edges()?;
        Ok(mesh)
    }

    fn collect_edges(&self) -> Result<FxHashMap<(usize, usize), EdgeInfo>> {
        let mut edges: FxHashMap<(usize, usize), EdgeInfo> = FxHashMap::default();
        for (fi, face) in self.faces.iter().enumerate() {
            for i in 0..face.len() {
                let a = face[i];
                let b = face[(i + 1) % face.len()];
                let info = edges.entry(edge_key(a, b)).or_insert_with(|| EdgeInfo {
                    faces: SmallVec::new(),
                    midpoint_accum: (self.vertices[a] + self.vertices[b]) * 0.5,
                    sharpness: 0.0,
                });
                if info.faces.len() >= 2 {
                    return Err(RenderError::NonManifoldSubdivision(format!(
                        "edge ({a}, {b}) borders more than two faces"
                    )));
                }
                info.faces.push(fi);
            }
        }
        for &(a, b, sharp) in &self.tags.creases {
            if let Some(info) = edges.get_mut(&edge_key(a, b)) {
                info.sharpness = info.sharpness.max(sharp);
            }
        }
        Ok(edges)
    }

    /// One Catmull-Clark refinement step.
    fn subdivide(&self) -> Result<Self> {
        let edges = self.collect_edges()?;
        let nv = self.vertices.len();

        // Face points.
        let face_points: Vec<Vec3> = self
            .faces
            .iter()
            .map(|f| f.iter().map(|&i| self.vertices[i]).sum::<Vec3>() / f.len() as f32)
            .collect();

        // Edge points, indexed by edge key.
        let mut edge_points: FxHashMap<(usize, usize), usize> = FxHashMap::default();
        let mut new_vertices = Vec::with_capacity(nv + edges.len() + self.faces.len());

        // Adjacency for vertex rule.
        let mut vertex_faces: Vec<SmallVec<[usize; 8]>> = vec![SmallVec::new(); nv];
        for (fi, face) in self.faces.iter().enumerate() {
            for &v in face {
                vertex_faces[v].push(fi);
            }
        }
        let mut vertex_edges: Vec<SmallVec<[(usize, usize); 8]>> = vec![SmallVec::new(); nv];
        for key in edges.keys() {
            vertex_edges[key.0].push(*key);
            vertex_edges[key.1].push(*key);
        }

        let corner_sharpness = |v: usize| -> f32 {
            self.tags
                .corners
                .iter()
                .filter(|(cv, _)| *cv == v)
                .map(|(_, s)| *s)
                .fold(0.0, f32::max)
        };

        // Repositioned original vertices.
        for v in 0..nv {
            let point = self.vertices[v];
            let boundary_edges: SmallVec<[(usize, usize); 4]> = vertex_edges[v]
                .iter()
                .filter(|k| edges[*k].faces.len() < 2)
                .copied()
                .collect();
            let crease_edges: SmallVec<[(usize, usize); 4]> = vertex_edges[v]
                .iter()
                .filter(|k| edges[*k].sharpness >= 1.0 || edges[*k].faces.len() < 2)
                .copied()
                .collect();

            let smooth = {
                let n = vertex_faces[v].len().max(1) as f32;
                let q: Vec3 = vertex_faces[v]
                    .iter()
                    .map(|&f| face_points[f])
                    .sum::<Vec3>()
                    / n;
                let r: Vec3 = vertex_edges[v]
                    .iter()
                    .map(|k| edges[k].midpoint_accum)
                    .sum::<Vec3>()
                    / vertex_edges[v].len().max(1) as f32;
                (q + r * 2.0 + point * (n - 3.0)) / n
            };

            let repositioned = if corner_sharpness(v) >= 1.0 || crease_edges.len() > 2 {
                point
            } else if crease_edges.len() == 2 {
                // Crease rule along the two sharp edges.
                let other = |k: &(usize, usize)| if k.0 == v { k.1 } else { k.0 };
                (self.vertices[other(&crease_edges[0])]
                    + self.vertices[other(&crease_edges[1])]
                    + point * 6.0)
                    / 8.0
            } else if !boundary_edges.is_empty() && self.tags.interpolate_boundary {
                point
            } else {
                smooth
            };
            new_vertices.push(repositioned);
        }

        for (key, info) in &edges {
            let midpoint = info.midpoint_accum;
            // Interior rule: average of endpoints and adjacent face
            // points; boundary edges keep their midpoint.
            let smooth = if info.faces.len() == 2 {
                (self.vertices[key.0]
                    + self.vertices[key.1]
                    + face_points[info.faces[0]]
                    + face_points[info.faces[1]])
                    / 4.0
            } else {
                midpoint
            };
            let sharp = info.sharpness.clamp(0.0, 1.0);
            let position = midpoint * sharp + smooth * (1.0 - sharp);
            edge_points.insert(*key, new_vertices.len());
            new_vertices.push(position);
        }

        let mut face_point_index = Vec::with_capacity(self.faces.len());
        for fp in &face_points {
            face_point_index.push(new_vertices.len());
            new_vertices.push(*fp);
        }

        // Quads: one per original face corner.
        let holes: std::collections::HashSet<usize> = self.tags.holes.iter().copied().collect();
        let mut new_faces = Vec::new();
        for (fi, face) in self.faces.iter().enumerate() {
            if holes.contains(&fi) {
                continue;
            }
            let len = face.len();
            for i in 0..len {
                let prev = face[(i + len - 1) % len];
                let v = face[i];
                let next = face[(i + 1) % len];
                let e_prev = edge_points[&edge_key(prev, v)];
                let e_next = edge_points[&edge_key(v, next)];
                new_faces.push(vec![v, e_next, face_point_index[fi], e_prev]);
            }
        }

        // Sharpness decays by one level; holes are consumed.
        let tags = SubdivTags {
            creases: self
                .tags
                .creases
                .iter()
                .filter_map(|&(a, b, s)| {
                    let e = edge_points.get(&edge_key(a, b))?;
                    let decayed = (s - 1.0).max(0.0);
                    if decayed <= 0.0 {
                        None
                    } else {
                        // The crease continues across both child edges.
                        Some([(a, *e, decayed), (*e, b, decayed)])
                    }
                })
                .flatten()
                .collect(),
            corners: self
                .tags
                .corners
                .iter()
                .filter_map(|&(v, s)| {
                    let decayed = (s - 1.0).max(0.0);
                    if decayed <= 0.0 { None } else { Some((v, decayed)) }
                })
                .collect(),
            holes: Vec::new(),
            interpolate_boundary: self.tags.interpolate_boundary,
        };

        Ok(Self {
            base: self.base.clone(),
            faces: new_faces,
            vertices: new_vertices,
            tags,
            level: self.level + 1,
        })
    }

    /// Longest raster-space edge across the mesh.
    fn max_raster_edge(&self, ctx: &DiceContext) -> f32 {
        let m = ctx.camera_to_raster * self.base.transform.matrix_at(0.0);
        let mut max_len = 0.0f32;
        for face in &self.faces {
            for i in 0..face.len() {
                let a = crate::math::transform_point(&m, self.vertices[face[i]]);
                let b =
                    crate::math::transform_point(&m, self.vertices[face[(i + 1) % face.len()]]);
                max_len = max_len.max((a - b).truncate().length());
            }
        }
        max_len
    }

    fn fine_enough(&self, ctx: &DiceContext) -> bool {
        self.level >= MAX_LEVELS || self.max_raster_edge(ctx) <= FINE_ENOUGH
    }
}

impl Primitive for SubdivisionMesh {
    fn type_name(&self) -> &'static str {
        "subdivision-mesh"
    }

    fn base(&self) -> &PrimBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrimBase {
        &mut self.base
    }

    fn bound(&self) -> Bound {
        // The limit surface lies within the control hull.
        self.base
            .camera_bound(&Bound::from_points(self.vertices.iter().copied()))
    }

    fn diceable(&self, _ctx: &DiceContext) -> bool {
        // Refinement happens through split; patches do the dicing.
        false
    }

    fn dice(&self, _ctx: &DiceContext) -> Result<MicroGrid> {
        Err(RenderError::InternalBug(
            "subdivision mesh asked to dice before splitting".into(),
        ))
    }

    fn split(&self, ctx: &DiceContext) -> Result<Vec<Box<dyn Primitive>>> {
        if !self.fine_enough(ctx) || self.level == 0 {
            return Ok(vec![Box::new(self.subdivide()?)]);
        }
        // All faces are quads now; emit bilinear patches.
        let mut out: Vec<Box<dyn Primitive>> = Vec::with_capacity(self.faces.len());
        for face in &self.faces {
            if face.len() != 4 {
                continue;
            }
            let corners = [
                self.vertices[face[0]],
                self.vertices[face[1]],
                self.vertices[face[3]],
                self.vertices[face[2]],
            ];
            out.push(Box::new(bilinear_patch(
                self.base.clone(),
                corners,
                None,
                None,
            )));
        }
        Ok(out)
    }

    fn clone_boxed(&self) -> Box<dyn Primitive> {
        Box::new(Self {
            base: self.base.clone(),
            faces: self.faces.clone(),
            vertices: self.vertices.clone(),
            tags: self.tags.clone(),
            level: self.level,
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

    fn unit_cube() -> (Vec<i32>, Vec<i32>, ParamList) {
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        let flat: Vec<f32> = positions.iter().flatten().copied().collect();
        let nverts = vec![4; 6];
        let verts = vec![
            0, 3, 2, 1, //
            4, 5, 6, 7, //
            0, 1, 5, 4, //
            1, 2, 6, 5, //
            2, 3, 7, 6, //
            3, 0, 4, 7,
        ];
        (
            nverts,
            verts,
            ParamList::new().with_floats("vertex point P", &flat),
        )
    }

    #[test]
    fn cube_subdivides_toward_sphere() {
        let (nverts, verts, params) = unit_cube();
        let mesh = SubdivisionMesh::build(
            base(),
            "catmull-clark",
            &nverts,
            &verts,
            SubdivTags::default(),
            &params,
        )
        .unwrap();
        let refined = mesh.subdivide().unwrap();
        // 6 quad faces * 4 corners = 24 child quads.
        assert_eq!(refined.faces.len(), 24);
        // Smoothing pulls corner vertices inward.
        let corner = refined.vertices[0];
        let centre = Vec3::splat(0.5);
        assert!(corner.distance(centre) < Vec3::ZERO.distance(centre));
    }

    #[test]
    fn non_manifold_rejected() {
        // Three faces sharing edge (0, 1).
        let params = ParamList::new().with_floats(
            "vertex point P",
            &[
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, -1.0, 0.0, //
                0.0, 0.0, 1.0,
            ],
        );
        let err = SubdivisionMesh::build(
            base(),
            "catmull-clark",
            &[3, 3, 3],
            &[0, 1, 2, 0, 1, 3, 0, 1, 4],
            SubdivTags::default(),
            &params,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NonManifoldSubdivision);
    }

    #[test]
    fn crease_holds_edge() {
        let (nverts, verts, params) = unit_cube();
        let tags = SubdivTags {
            creases: vec![(0, 1, 10.0)],
            ..SubdivTags::default()
        };
        let mesh =
            SubdivisionMesh::build(base(), "catmull-clark", &nverts, &verts, tags, &params)
                .unwrap();
        let refined = mesh.subdivide().unwrap();
        // The creased edge's midpoint stays on the original edge.
        let edge_mid = refined
            .vertices
            .iter()
            .find(|v| (v.y - 0.0).abs() < 1e-5 && (v.z - 0.0).abs() < 1e-5 && (v.x - 0.5).abs() < 1e-5);
        assert!(edge_mid.is_some());
    }

    #[test]
    fn tag_parsing_splits_ranges() {
        let tags = SubdivTags::parse(
            &["crease".to_string(), "interpolateboundary".to_string()],
            &[3, 1, 0, 0],
            &[0, 1, 2],
            &[2.5],
        )
        .unwrap();
        assert_eq!(tags.creases.len(), 2);
        assert!(tags.interpolate_boundary);
        assert!((tags.creases[0].2 - 2.5).abs() < 1e-6);
    }

    #[test]
    fn unknown_scheme_unimplemented() {
        let (nverts, verts, params) = unit_cube();
        let err = SubdivisionMesh::build(
            base(),
            "loop",
            &nverts,
            &verts,
            SubdivTags::default(),
            &params,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Unimplemented);
    }

    #[test]
    fn splits_eventually_produce_patches() {
        let (nverts, verts, params) = unit_cube();
        let mesh = SubdivisionMesh::build(
            base(),
            "catmull-clark",
            &nverts,
            &verts,
            SubdivTags::default(),
            &params,
        )
        .unwrap();
        let mut prims: Vec<Box<dyn Primitive>> = vec![Box::new(mesh)];
        for _ in 0..(MAX_LEVELS + 2) {
            let mut next = Vec::new();
            let mut done = true;
            for p in prims {
                if p.type_name() == "subdivision-mesh" {
                    done = false;
                    next.extend(p.split(&ctx()).unwrap());
                } else {
                    next.push(p);
                }
            }
            prims = next;
            if done {
                break;
            }
        }
        assert!(prims.iter().all(|p| p.type_name() == "patch"));
        assert!(!prims.is_empty());
    }
}
