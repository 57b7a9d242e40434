//! The Interface Boundary
//!
//! [`Renderer`] is the stateful procedural interface: scope controls,
//! option/attribute/transform mutators, shader declarations and
//! primitive emitters, all validated against the context stack. It owns
//! every piece of runtime state — no globals — and drives the bucket
//! engine when the world closes.
//!
//! Parameter lists arrive as (token, values) pairs; tokens are either
//! dictionary names or inline declarations, resolved identically.

mod prims;
mod setters;

pub use prims::ProceduralRequest;

use std::sync::Arc;

use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::{Key as _, SlotMap};

use crate::csg::{CsgNodeId, CsgTree};
use crate::display::{DisplayDriver, DisplayManager, DisplaySetup, create_driver};
use crate::errors::{Diagnostics, ErrorHandler, RenderError, Result, Severity};
use crate::geometry::procedural::RibHandler;
use crate::geometry::{PrimBase, Primitive, ProceduralGenerator};
use crate::params::{Dictionary, Param, ParamList, ParamValue};
use crate::raster::{CameraMatrices, FrameConfig, ImageBuffer, RenderResources, build_camera_matrices};
use crate::shading::{LightKey, LightSource, ShaderRegistry};
use crate::state::{
    ContextStack, CoordSysRegistry, DisplayMode, MotionState, Options, ScopeData, ScopeKind,
    SolidOp, Transform,
};
use crate::stats::{Statistics, StatsVerbosity};
use crate::texture::TextureSystem;

slotmap::new_key_type! {
    /// Handle of a recorded object definition.
    pub struct ObjectKey;
}

/// Values side of a (token, values) parameter pair.
#[derive(Debug, Clone, Copy)]
pub enum TokenData<'a> {
    Floats(&'a [f32]),
    Ints(&'a [i32]),
    Strings(&'a [&'a str]),
}

/// The renderer runtime. One instance per output target; its methods are
/// the interface surface.
pub struct Renderer {
    context: ContextStack,
    options: Options,
    screen_window_set: bool,
    dictionary: Dictionary,
    coordsys: CoordSysRegistry,
    shaders: ShaderRegistry,
    lights: SlotMap<LightKey, LightSource>,
    objects: SlotMap<ObjectKey, Vec<Box<dyn Primitive>>>,
    csg: CsgTree,
    csg_stack: Vec<CsgNodeId>,
    world_prims: Vec<Box<dyn Primitive>>,
    world_to_camera: Mat4,
    textures: Arc<TextureSystem>,
    stats: Arc<Statistics>,
    diagnostics: Arc<Diagnostics>,
    display_override: Option<Box<dyn DisplayDriver>>,
    rib_handler: Option<Arc<RibHandler>>,
    procedurals: FxHashMap<String, Arc<dyn ProceduralGenerator>>,
    open_object: Option<ObjectKey>,
    worker_count: usize,
    /// Warned-once marker for deformation motion blur.
    motion_prim_emitted: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    #[must_use]
    pub fn new() -> Self {
        let stats = Arc::new(Statistics::new());
        let options = Options::default();
        let textures = Arc::new(TextureSystem::new(
            u64::from(options.texture_memory_kb()),
            Arc::clone(&stats),
        ));
        Self {
            context: ContextStack::new(),
            options,
            screen_window_set: false,
            dictionary: Dictionary::new(),
            coordsys: CoordSysRegistry::new(),
            shaders: ShaderRegistry::new(),
            lights: SlotMap::with_key(),
            objects: SlotMap::with_key(),
            csg: CsgTree::new(),
            csg_stack: Vec::new(),
            world_prims: Vec::new(),
            world_to_camera: Mat4::IDENTITY,
            textures,
            stats,
            diagnostics: Arc::new(Diagnostics::new()),
            display_override: None,
            rib_handler: None,
            procedurals: FxHashMap::default(),
            open_object: None,
            worker_count: std::thread::available_parallelism().map_or(1, |n| n.get()),
            motion_prim_emitted: false,
        }
    }

    // ------------------------------------------------------------------
    // Host hooks
    // ------------------------------------------------------------------

    /// Installs the archive parser used by procedurals.
    pub fn set_archive_handler(&mut self, handler: Arc<RibHandler>) {
        self.rib_handler = Some(handler);
    }

    /// Registers a generator for `Procedural "DynamicLoad"`.
    pub fn register_procedural(&mut self, name: &str, generator: Arc<dyn ProceduralGenerator>) {
        self.procedurals.insert(name.to_string(), generator);
    }

    /// Registers an externally compiled shader.
    pub fn register_shader(&mut self, shader: Arc<dyn crate::shading::Shader>) {
        self.shaders.register(shader);
    }

    /// Replaces the display driver for the next frame, bypassing the
    /// display-type lookup.
    pub fn set_display_driver(&mut self, driver: Box<dyn DisplayDriver>) {
        self.display_override = Some(driver);
    }

    pub fn set_worker_count(&mut self, workers: usize) {
        self.worker_count = workers.max(1);
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    #[must_use]
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.stats
    }

    #[must_use]
    pub fn textures(&self) -> &Arc<TextureSystem> {
        &self.textures
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Read access to the current attribute state.
    pub fn current_attributes(&self) -> Result<&crate::state::AttributesHandle> {
        self.context.attributes()
    }

    /// The current transformation matrix at `time`.
    pub fn current_transform_matrix(&self, time: f32) -> Result<Mat4> {
        Ok(self.context.transform()?.matrix_at(time))
    }

    // ------------------------------------------------------------------
    // Parameter plumbing
    // ------------------------------------------------------------------

    /// Resolves (token, values) pairs through the dictionary and inline
    /// declarations.
    pub fn build_params(&self, pairs: &[(&str, TokenData<'_>)]) -> Result<ParamList> {
        let mut list = ParamList::new();
        for (token, data) in pairs {
            let decl = self.dictionary.resolve(token)?;
            let value = match data {
                TokenData::Floats(v) => ParamValue::Floats(v.to_vec()),
                TokenData::Ints(v) => ParamValue::Ints(v.to_vec()),
                TokenData::Strings(v) => {
                    ParamValue::Strings(v.iter().map(|s| (*s).to_string()).collect())
                }
            };
            list.push(Param::new(decl, value));
        }
        Ok(list)
    }

    /// Registers a token declaration, returning its canonical form.
    pub fn declare(&mut self, name: &str, declaration: &str) -> Result<String> {
        self.dictionary.declare(name, declaration)
    }

    /// Selects the error handler by name.
    pub fn error_handler(&mut self, name: &str) -> Result<()> {
        let handler = ErrorHandler::by_name(name)?;
        self.diagnostics.set_handler(handler);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scope controls
    // ------------------------------------------------------------------

    /// Opens the main context. A non-empty name selects the default
    /// display output.
    pub fn begin(&mut self, name: &str) -> Result<()> {
        self.context.push(ScopeData::Main)?;
        self.options = Options::default();
        self.screen_window_set = false;
        if !name.is_empty() {
            self.options.display_name = name.to_string();
        }
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.context.pop(ScopeKind::Main)?;
        if self.context.is_active() {
            return Err(RenderError::InvalidNesting(
                "end with scopes still open".to_string(),
            ));
        }
        Ok(())
    }

    pub fn frame_begin(&mut self, _frame: i32) -> Result<()> {
        self.context.push(ScopeData::Frame {
            saved_options: Box::new(self.options.clone()),
        })
    }

    pub fn frame_end(&mut self) -> Result<()> {
        let popped = self.context.pop(ScopeKind::Frame)?;
        if let ScopeData::Frame { saved_options } = popped.data {
            self.options = *saved_options;
        }
        Ok(())
    }

    /// Freezes the camera and options, then opens the world.
    pub fn world_begin(&mut self) -> Result<()> {
        // The transform at world begin maps world space to camera space.
        self.world_to_camera = self.context.transform()?.matrix_at(0.0);
        self.context.push(ScopeData::World)?;
        // Inside the world the current transform is object-to-world.
        self.context
            .replace_transform(Arc::new(Transform::identity()))?;

        let camera_to_world = self.world_to_camera.inverse();
        let matrices = build_camera_matrices(&self.options);
        self.coordsys
            .set_builtin("world", Mat4::IDENTITY, Mat4::IDENTITY);
        self.coordsys
            .set_builtin("camera", camera_to_world, self.world_to_camera);
        self.coordsys.set_builtin(
            "screen",
            camera_to_world * matrices.camera_to_screen.inverse(),
            matrices.camera_to_screen * self.world_to_camera,
        );
        self.coordsys.set_builtin(
            "NDC",
            camera_to_world * matrices.camera_to_ndc.inverse(),
            matrices.camera_to_ndc * self.world_to_camera,
        );
        self.coordsys.set_builtin(
            "raster",
            camera_to_world * matrices.camera_to_raster.inverse(),
            matrices.camera_to_raster * self.world_to_camera,
        );

        self.textures
            .set_search_paths(self.options.search_path("texture"));
        self.textures
            .cache
            .set_limit_kb(u64::from(self.options.texture_memory_kb()));
        Ok(())
    }

    /// Closes the world and renders the frame.
    pub fn world_end(&mut self) -> Result<()> {
        self.context.pop(ScopeKind::World)?;
        let result = self.render_frame();
        self.world_prims.clear();
        self.csg = CsgTree::new();
        self.csg_stack.clear();
        self.motion_prim_emitted = false;
        result
    }

    pub fn attribute_begin(&mut self) -> Result<()> {
        self.context.push(ScopeData::Attribute)
    }

    pub fn attribute_end(&mut self) -> Result<()> {
        self.context.pop(ScopeKind::Attribute).map(|_| ())
    }

    pub fn transform_begin(&mut self) -> Result<()> {
        self.context.push(ScopeData::Transform)
    }

    pub fn transform_end(&mut self) -> Result<()> {
        self.context.pop(ScopeKind::Transform).map(|_| ())
    }

    pub fn solid_begin(&mut self, operation: &str) -> Result<()> {
        let op = SolidOp::by_name(operation)?;
        self.context.push(ScopeData::Solid { op })?;
        let parent = self.csg_stack.last().copied();
        let node = self.csg.add(op, parent);
        self.csg_stack.push(node);
        Ok(())
    }

    pub fn solid_end(&mut self) -> Result<()> {
        self.context.pop(ScopeKind::Solid)?;
        self.csg_stack.pop();
        Ok(())
    }

    pub fn object_begin(&mut self) -> Result<ObjectKey> {
        let key = self.objects.insert(Vec::new());
        let handle = key.data().as_ffi() as u32;
        self.context.push(ScopeData::Object { handle })?;
        // Recorded primitives are relative to the object definition.
        self.context
            .replace_transform(Arc::new(Transform::identity()))?;
        self.open_object = Some(key);
        Ok(key)
    }

    pub fn object_end(&mut self) -> Result<()> {
        self.context.pop(ScopeKind::Object)?;
        self.open_object = None;
        Ok(())
    }

    /// Replays a recorded object under the current attributes and
    /// transform.
    pub fn object_instance(&mut self, handle: ObjectKey) -> Result<()> {
        let Some(recorded) = self.objects.get(handle) else {
            return Err(RenderError::UnknownSymbol("object handle".to_string()));
        };
        let ctm = self.context.transform()?.matrix_at(0.0);
        let instanced: Vec<Box<dyn Primitive>> = recorded
            .iter()
            .map(|p| {
                let mut clone = p.clone_boxed();
                clone.pre_transform(&(self.world_to_camera * ctm));
                clone
            })
            .collect();
        for prim in instanced {
            self.emit_boxed_raw(prim)?;
        }
        Ok(())
    }

    pub fn motion_begin(&mut self, times: &[f32]) -> Result<()> {
        if times.is_empty() {
            return Err(RenderError::InvalidData(
                "motion block with no times".to_string(),
            ));
        }
        self.context.push(ScopeData::Motion(MotionState {
            times: times.to_vec(),
            index: 0,
        }))
    }

    pub fn motion_end(&mut self) -> Result<()> {
        if let Some(motion) = self.context.motion()
            && motion.index != motion.times.len()
        {
            let err = RenderError::InvalidData(format!(
                "motion block consumed {} of {} times",
                motion.index,
                motion.times.len()
            ));
            self.diagnostics.report(Severity::Warning, &err)?;
        }
        self.context.pop(ScopeKind::Motion)?;
        self.motion_prim_emitted = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Frame rendering
    // ------------------------------------------------------------------

    fn render_frame(&mut self) -> Result<()> {
        let mut options = self.options.clone();
        if options.hider == "shadow" {
            options.display_mode = DisplayMode::Z;
            if options.display_type != "zfile" {
                options.display_type = "shadow".to_string();
            }
            options.filter_name = "box".to_string();
            options.filter_x_width = 1.0;
            options.filter_y_width = 1.0;
        }

        let matrices: CameraMatrices = build_camera_matrices(&options);
        let csg = std::mem::take(&mut self.csg);
        let camera_to_world = self.world_to_camera.inverse();
        let config = FrameConfig::new(&options, &matrices, camera_to_world, csg)?;
        let total_buckets = config.bucket_count();

        let driver = match self.display_override.take() {
            Some(driver) => driver,
            None => create_driver(&options.display_type, &self.textures)?,
        };
        let setup = DisplaySetup {
            name: options.display_name.clone(),
            width: options.x_resolution,
            height: options.y_resolution,
            mode: options.display_mode,
            color_quantize: options.color_quantize,
            depth_quantize: options.depth_quantize,
            world_to_camera: self.world_to_camera,
            world_to_screen: matrices.camera_to_screen * self.world_to_camera,
        };
        let display = DisplayManager::new(driver, setup, total_buckets)?;

        let mut image = ImageBuffer::new(config);
        let res = RenderResources {
            textures: &self.textures,
            lights: &self.lights,
            stats: &self.stats,
            diagnostics: &self.diagnostics,
        };
        for prim in std::mem::take(&mut self.world_prims) {
            image.post_primitive(prim, 0, &res)?;
        }
        let outcome = image.render(&res, &display, self.worker_count);
        display.finish()?;

        let verbosity = self
            .options
            .user_int("statistics", "endofframe")
            .map_or(StatsVerbosity::None, StatsVerbosity::from_level);
        self.stats.report(verbosity);
        outcome
    }

    // ------------------------------------------------------------------
    // Emission plumbing shared with the primitive methods
    // ------------------------------------------------------------------

    /// The attribute/transform base every emitted primitive carries.
    /// The transform is rebased to object-to-camera; primitives recorded
    /// into an object definition stay relative and are rebased when
    /// instanced.
    fn current_prim_base(&self) -> Result<PrimBase> {
        let attributes = Arc::clone(self.context.attributes()?);
        let mut transform = (**self.context.transform()?).clone();
        if self.open_object.is_none() {
            transform.pre_concat_all(self.world_to_camera);
        }
        let mut base = PrimBase::new(attributes, Arc::new(transform));
        // Tag with the innermost `primitive` solid leaf, if any.
        if self.context.open_solid() == Some(SolidOp::Primitive) {
            base.csg = self.csg_stack.last().copied();
        }
        Ok(base)
    }

    /// Routes a constructed primitive to the open object definition or
    /// the world.
    fn emit_boxed_raw(&mut self, prim: Box<dyn Primitive>) -> Result<()> {
        if let Some(key) = self.open_object {
            if let Some(recorded) = self.objects.get_mut(key) {
                recorded.push(prim);
            }
            return Ok(());
        }
        if !self.context.in_world() {
            return Err(RenderError::InvalidNesting(
                "primitive outside the world".to_string(),
            ));
        }
        self.world_prims.push(prim);
        Ok(())
    }

    /// Emission entry for the primitive methods: handles motion-block
    /// bookkeeping, then routes each primitive.
    fn emit_all(&mut self, prims: Vec<Box<dyn Primitive>>) -> Result<()> {
        if self.context.motion().is_some() {
            self.context.advance_motion()?;
            if self.motion_prim_emitted {
                // Deformation blur consolidates to the first sample; the
                // motion-sampled transform still blurs it.
                let err = RenderError::Unimplemented(
                    "deformation motion blur; first motion sample used".to_string(),
                );
                self.diagnostics.report(Severity::Warning, &err)?;
                return Ok(());
            }
            self.motion_prim_emitted = true;
        }
        for prim in prims {
            self.emit_boxed_raw(prim)?;
        }
        Ok(())
    }
}
