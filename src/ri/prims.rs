//! Primitive Emitters
//!
//! The interface calls that create geometry. Each builds its primitive
//! from the current attributes and object-to-camera transform and posts
//! it to the world (or the open object definition). Malformed data drops
//! the call with `InvalidData`; rendering continues.

use std::sync::Arc;

use glam::{Vec3, Vec4};

use crate::errors::{RenderError, Result};
use crate::geometry::blobby::Blobby;
use crate::geometry::curves::curves;
use crate::geometry::nurbs::{NuPatchSurface, nu_patch};
use crate::geometry::patch::{bicubic_patch, bilinear_patch, patch_mesh};
use crate::geometry::points::Points;
use crate::geometry::polygon::{
    PolyVaryings, general_polygon, points_general_polygons, points_polygons, polygon,
};
use crate::geometry::procedural::{DelayedReadArchive, Procedural, RunProgram};
use crate::geometry::quadric::{Cone, Cylinder, Disk, Hyperboloid, Paraboloid, Sphere, Torus};
use crate::geometry::subdivision::{SubdivTags, SubdivisionMesh};
use crate::geometry::{ParamSurface, ParametricPrim, Primitive};
use crate::math::Bound;
use crate::params::ParamList;

use super::Renderer;

/// The three procedural generator kinds of the interface.
#[derive(Debug, Clone)]
pub enum ProceduralRequest {
    DelayedReadArchive { filename: String },
    RunProgram { program: String, args: String },
    DynamicLoad { name: String },
}

impl Renderer {
    fn emit_parametric(&mut self, prims: Vec<ParametricPrim>) -> Result<()> {
        self.emit_all(
            prims
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn Primitive>)
                .collect(),
        )
    }

    fn emit_quadric(&mut self, surface: Box<dyn ParamSurface>) -> Result<()> {
        let base = self.current_prim_base()?;
        self.emit_parametric(vec![ParametricPrim::new(base, surface)])
    }

    // ------------------------------------------------------------------
    // Polygons
    // ------------------------------------------------------------------

    pub fn polygon(&mut self, params: &ParamList) -> Result<()> {
        let base = self.current_prim_base()?;
        let prims = polygon(&base, params)?;
        self.emit_parametric(prims)
    }

    pub fn general_polygon(&mut self, nverts: &[i32], params: &ParamList) -> Result<()> {
        let base = self.current_prim_base()?;
        let prims = general_polygon(&base, nverts, params)?;
        self.emit_parametric(prims)
    }

    pub fn points_polygons(&mut self, nverts: &[i32], verts: &[i32], params: &ParamList) -> Result<()> {
        let base = self.current_prim_base()?;
        let prims = points_polygons(&base, nverts, verts, params)?;
        self.emit_parametric(prims)
    }

    pub fn points_general_polygons(
        &mut self,
        nloops: &[i32],
        nverts: &[i32],
        verts: &[i32],
        params: &ParamList,
    ) -> Result<()> {
        let base = self.current_prim_base()?;
        let prims = points_general_polygons(&base, nloops, nverts, verts, params)?;
        self.emit_parametric(prims)
    }

    // ------------------------------------------------------------------
    // Patches
    // ------------------------------------------------------------------

    pub fn patch(&mut self, patch_type: &str, params: &ParamList) -> Result<()> {
        let base = self.current_prim_base()?;
        let positions = params
            .positions()
            .ok_or_else(|| RenderError::InvalidData("patch without \"P\"".to_string()))?;
        match patch_type {
            "bilinear" => {
                if positions.len() != 4 {
                    return Err(RenderError::InvalidData(format!(
                        "bilinear patch carries {} vertices",
                        positions.len()
                    )));
                }
                let varyings = PolyVaryings::from_params(params);
                let cs = varyings.cs.as_ref().and_then(|v| {
                    (v.len() == 4).then(|| [v[0], v[1], v[2], v[3]])
                });
                let os = varyings.os.as_ref().and_then(|v| {
                    (v.len() == 4).then(|| [v[0], v[1], v[2], v[3]])
                });
                let corners = [positions[0], positions[1], positions[2], positions[3]];
                let prim = bilinear_patch(base, corners, cs, os);
                self.emit_parametric(vec![prim])
            }
            "bicubic" => {
                let geo = &base.attributes.geometric;
                let prim = bicubic_patch(
                    base.clone(),
                    &positions,
                    geo.u_basis,
                    geo.v_basis,
                )?;
                self.emit_parametric(vec![prim])
            }
            other => Err(RenderError::InvalidType(format!(
                "patch type \"{other}\""
            ))),
        }
    }

    pub fn patch_mesh(
        &mut self,
        patch_type: &str,
        nu: usize,
        u_wrap: &str,
        nv: usize,
        v_wrap: &str,
        params: &ParamList,
    ) -> Result<()> {
        let cubic = match patch_type {
            "bilinear" => false,
            "bicubic" => true,
            other => {
                return Err(RenderError::InvalidType(format!(
                    "patch mesh type \"{other}\""
                )));
            }
        };
        let wrap = |w: &str| -> Result<bool> {
            match w {
                "periodic" => Ok(true),
                "nonperiodic" => Ok(false),
                other => Err(RenderError::InvalidType(format!(
                    "patch mesh wrap \"{other}\""
                ))),
            }
        };
        let positions = params
            .positions()
            .ok_or_else(|| RenderError::InvalidData("patch mesh without \"P\"".to_string()))?;
        let base = self.current_prim_base()?;
        let geo = base.attributes.geometric.clone();
        let prims = patch_mesh(
            &base,
            cubic,
            nu,
            wrap(u_wrap)?,
            nv,
            wrap(v_wrap)?,
            &positions,
            geo.u_basis,
            geo.v_basis,
        )?;
        self.emit_parametric(prims)
    }

    pub fn nu_patch(
        &mut self,
        nu: usize,
        u_order: usize,
        u_knots: &[f32],
        nv: usize,
        v_order: usize,
        v_knots: &[f32],
        params: &ParamList,
    ) -> Result<()> {
        let points: Vec<Vec4> = if let Some(pw) = params.hpoints("Pw") {
            pw
        } else if let Some(p) = params.points("P") {
            p.into_iter().map(|v| v.extend(1.0)).collect()
        } else {
            return Err(RenderError::InvalidData("nupatch without \"P\"".to_string()));
        };
        let surface = NuPatchSurface::new(
            nu,
            u_order,
            u_knots.to_vec(),
            nv,
            v_order,
            v_knots.to_vec(),
            points,
        )?;
        let base = self.current_prim_base()?;
        self.emit_parametric(vec![nu_patch(base, surface)])
    }

    /// Trim curves on the following NURBS surfaces are recorded with the
    /// attribute state; trimming itself is not applied.
    pub fn trim_curve(&mut self, params: &ParamList) -> Result<()> {
        self.context.attributes_mut()?.set_user("trimcurve", params);
        let err = RenderError::Unimplemented("trim curves are recorded but not applied".into());
        self.diagnostics
            .report_once(crate::errors::Severity::Warning, 0, &err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Quadrics
    // ------------------------------------------------------------------

    pub fn sphere(&mut self, radius: f32, zmin: f32, zmax: f32, thetamax: f32) -> Result<()> {
        if radius <= 0.0 || zmin > zmax {
            return Err(RenderError::InvalidData(format!(
                "sphere({radius}, {zmin}, {zmax})"
            )));
        }
        self.emit_quadric(Box::new(Sphere {
            radius,
            zmin,
            zmax,
            thetamax,
        }))
    }

    pub fn cone(&mut self, height: f32, radius: f32, thetamax: f32) -> Result<()> {
        self.emit_quadric(Box::new(Cone {
            height,
            radius,
            thetamax,
        }))
    }

    pub fn cylinder(&mut self, radius: f32, zmin: f32, zmax: f32, thetamax: f32) -> Result<()> {
        self.emit_quadric(Box::new(Cylinder {
            radius,
            zmin,
            zmax,
            thetamax,
        }))
    }

    pub fn hyperboloid(&mut self, point1: Vec3, point2: Vec3, thetamax: f32) -> Result<()> {
        self.emit_quadric(Box::new(Hyperboloid {
            point1,
            point2,
            thetamax,
        }))
    }

    pub fn paraboloid(&mut self, rmax: f32, zmin: f32, zmax: f32, thetamax: f32) -> Result<()> {
        self.emit_quadric(Box::new(Paraboloid {
            rmax,
            zmin,
            zmax,
            thetamax,
        }))
    }

    pub fn disk(&mut self, height: f32, radius: f32, thetamax: f32) -> Result<()> {
        self.emit_quadric(Box::new(Disk {
            height,
            radius,
            thetamax,
        }))
    }

    pub fn torus(
        &mut self,
        major_radius: f32,
        minor_radius: f32,
        phimin: f32,
        phimax: f32,
        thetamax: f32,
    ) -> Result<()> {
        self.emit_quadric(Box::new(Torus {
            major_radius,
            minor_radius,
            phimin,
            phimax,
            thetamax,
        }))
    }

    // ------------------------------------------------------------------
    // Points, curves and the structured surfaces
    // ------------------------------------------------------------------

    pub fn points(&mut self, params: &ParamList) -> Result<()> {
        let base = self.current_prim_base()?;
        let prim = Points::build(base, params)?;
        self.emit_all(vec![Box::new(prim)])
    }

    pub fn curves(
        &mut self,
        curve_type: &str,
        nvertices: &[i32],
        wrap: &str,
        params: &ParamList,
    ) -> Result<()> {
        let base = self.current_prim_base()?;
        let prims = curves(&base, curve_type, nvertices, wrap, params)?;
        self.emit_all(prims)
    }

    pub fn blobby(
        &mut self,
        nleaf: usize,
        code: &[i32],
        floats: &[f32],
        strings: &[String],
        params: &ParamList,
    ) -> Result<()> {
        let base = self.current_prim_base()?;
        let prim = Blobby::build(base, nleaf, code, floats, strings, params)?;
        self.emit_all(vec![Box::new(prim)])
    }

    pub fn subdivision_mesh(
        &mut self,
        scheme: &str,
        nverts: &[i32],
        verts: &[i32],
        tags: &[String],
        nargs: &[i32],
        intargs: &[i32],
        floatargs: &[f32],
        params: &ParamList,
    ) -> Result<()> {
        let parsed = SubdivTags::parse(tags, nargs, intargs, floatargs)?;
        let base = self.current_prim_base()?;
        let prim = SubdivisionMesh::build(base, scheme, nverts, verts, parsed, params)?;
        self.emit_all(vec![Box::new(prim)])
    }

    /// A deferred procedural with its declared object-space bound
    /// `(xmin, xmax, ymin, ymax, zmin, zmax)`.
    pub fn procedural(&mut self, request: ProceduralRequest, bound: [f32; 6]) -> Result<()> {
        let object_bound = Bound::new(
            Vec3::new(bound[0], bound[2], bound[4]),
            Vec3::new(bound[1], bound[3], bound[5]),
        );
        let generator: Arc<dyn crate::geometry::ProceduralGenerator> = match request {
            ProceduralRequest::DelayedReadArchive { filename } => {
                let handler = self.rib_handler.clone().ok_or_else(|| {
                    RenderError::Unimplemented("no archive handler installed".to_string())
                })?;
                Arc::new(DelayedReadArchive {
                    filename,
                    handler,
                    search_paths: self.options.search_path("archive"),
                })
            }
            ProceduralRequest::RunProgram { program, args } => {
                let handler = self.rib_handler.clone().ok_or_else(|| {
                    RenderError::Unimplemented("no archive handler installed".to_string())
                })?;
                Arc::new(RunProgram {
                    program,
                    args,
                    handler,
                })
            }
            ProceduralRequest::DynamicLoad { name } => self
                .procedurals
                .get(&name)
                .cloned()
                .ok_or_else(|| {
                    RenderError::UnknownSymbol(format!("procedural \"{name}\""))
                })?,
        };
        let base = self.current_prim_base()?;
        let prim = Procedural::new(base, object_bound, generator);
        self.emit_all(vec![Box::new(prim)])
    }
}
