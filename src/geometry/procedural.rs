//! Procedural Primitives
//!
//! Deferred generators with a declared bound. Splitting a procedural
//! runs its generator once, emitting the real primitives. Archive-backed
//! generators (`DelayedReadArchive`, `RunProgram`) produce RIB text; the
//! scene-description parser is an external collaborator, so that text is
//! handed to an injected handler which returns the primitives it parsed.
//! `DynamicLoad` resolves against a host-registered generator table
//! instead of loading native plug-ins.

use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::errors::{RenderError, Result};
use crate::math::Bound;
use crate::micropoly::MicroGrid;

use super::{DiceContext, PrimBase, Primitive};

/// Turns RIB text into primitives. Installed by the front end that owns
/// the parser.
pub type RibHandler =
    dyn Fn(&str, &PrimBase) -> Result<Vec<Box<dyn Primitive>>> + Send + Sync;

/// A deferred geometry generator.
pub trait ProceduralGenerator: Send + Sync {
    /// Produces the primitives, given the level of detail (the raster
    /// area of the declared bound).
    fn generate(&self, detail: f32, base: &PrimBase) -> Result<Vec<Box<dyn Primitive>>>;
}

/// Re-runs the parser over a named archive file.
pub struct DelayedReadArchive {
    pub filename: String,
    pub handler: Arc<RibHandler>,
    pub search_paths: Vec<String>,
}

impl ProceduralGenerator for DelayedReadArchive {
    fn generate(&self, _detail: f32, base: &PrimBase) -> Result<Vec<Box<dyn Primitive>>> {
        let path = crate::texture::locate(&self.filename, &self.search_paths)
            .ok_or_else(|| RenderError::FileNotFound(self.filename.clone()))?;
        let text = std::fs::read_to_string(path)?;
        (self.handler)(&text, base)
    }
}

/// Spawns a child process, sends `detail args`, reads RIB from stdout.
pub struct RunProgram {
    pub program: String,
    pub args: String,
    pub handler: Arc<RibHandler>,
}

impl ProceduralGenerator for RunProgram {
    fn generate(&self, detail: f32, base: &PrimBase) -> Result<Vec<Box<dyn Primitive>>> {
        use std::io::Write;
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RenderError::FileNotFound(format!("procedural \"{}\": {e}", self.program))
            })?;
        if let Some(stdin) = child.stdin.as_mut() {
            writeln!(stdin, "{detail} {}", self.args)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(RenderError::InvalidData(format!(
                "procedural \"{}\" exited with {}",
                self.program, output.status
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        (self.handler)(&text, base)
    }
}

/// The procedural primitive: bound plus generator.
pub struct Procedural {
    base: PrimBase,
    object_bound: Bound,
    generator: Arc<dyn ProceduralGenerator>,
}

impl Procedural {
    #[must_use]
    pub fn new(base: PrimBase, object_bound: Bound, generator: Arc<dyn ProceduralGenerator>) -> Self {
        Self {
            base,
            object_bound,
            generator,
        }
    }
}

impl Primitive for Procedural {
    fn type_name(&self) -> &'static str {
        "procedural"
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
            "procedural asked to dice; it expands on split".into(),
        ))
    }

    fn split(&self, ctx: &DiceContext) -> Result<Vec<Box<dyn Primitive>>> {
        // Level of detail: the raster area the bound covers.
        let raster = self.bound().transform(&ctx.camera_to_raster);
        let size = raster.size();
        let detail = (size.x * size.y).max(0.0);
        self.generator.generate(detail, &self.base)
    }

    fn clone_boxed(&self) -> Box<dyn Primitive> {
        Box::new(Self {
            base: self.base.clone(),
            object_bound: self.object_bound,
            generator: Arc::clone(&self.generator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamList;
    use crate::state::{Attributes, Transform};
    use glam::{Mat4, Vec3};

    fn base() -> PrimBase {
        PrimBase::new(
            Arc::new(Attributes::default()),
            Arc::new(Transform::identity()),
        )
    }

    fn ctx() -> DiceContext {
        DiceContext {
            camera_to_raster: Mat4::from_scale(Vec3::splat(10.0)),
            grid_limit: 256,
        }
    }

    struct OneQuad;

    impl ProceduralGenerator for OneQuad {
        fn generate(&self, detail: f32, base: &PrimBase) -> Result<Vec<Box<dyn Primitive>>> {
            assert!(detail > 0.0);
            let params = ParamList::new().with_floats(
                "vertex point P",
                &[0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0],
            );
            crate::geometry::polygon::polygon(base, &params).map(|v| {
                v.into_iter()
                    .map(|p| Box::new(p) as Box<dyn Primitive>)
                    .collect()
            })
        }
    }

    #[test]
    fn split_runs_generator_with_detail() {
        let prim = Procedural::new(
            base(),
            Bound::new(Vec3::ZERO, Vec3::ONE),
            Arc::new(OneQuad),
        );
        assert!(!prim.diceable(&ctx()));
        let children = prim.split(&ctx()).unwrap();
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn missing_program_reports_not_found() {
        let handler: Arc<RibHandler> = Arc::new(|_, _| Ok(Vec::new()));
        let generator = RunProgram {
            program: "/nonexistent/generator".to_string(),
            args: String::new(),
            handler,
        };
        let err = match generator.generate(1.0, &base()) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(err.kind(), crate::errors::ErrorKind::FileNotFound);
    }

    #[test]
    fn archive_reads_through_handler() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("reyes-proc-{}.rib", std::process::id()));
        std::fs::write(&path, "Sphere 1 -1 1 360\n").unwrap();
        let handler: Arc<RibHandler> = Arc::new(|text, _| {
            assert!(text.contains("Sphere"));
            Ok(Vec::new())
        });
        let generator = DelayedReadArchive {
            filename: path.to_str().unwrap().to_string(),
            handler,
            search_paths: vec![],
        };
        assert!(generator.generate(1.0, &base()).unwrap().is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
