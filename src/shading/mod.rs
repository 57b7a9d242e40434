//! Shader Interface
//!
//! The engine's view of shaders is a pure capability: load by name, bind
//! parameters, evaluate in place on a grid-shaped execution environment
//! of varying variables, and report whether the shader is an ambient
//! light. The shader VM proper is an external collaborator; the built-in
//! shader set registered here provides the standard surfaces, lights,
//! volumes and the displacement used by scenes that name them.

pub mod builtin;

use std::fmt;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use slotmap::new_key_type;

use crate::errors::{RenderError, Result};
use crate::math::Color;
use crate::params::ParamList;
use crate::texture::TextureSystem;

new_key_type! {
    /// Handle of a declared light source.
    pub struct LightKey;
}

/// The SIMD-shaped execution environment a shader evaluates over: one
/// entry per grid vertex, laid out row-major over (u, v).
pub struct ShaderEnv {
    pub u_dim: usize,
    pub v_dim: usize,
    /// Camera-space positions.
    pub p: Vec<Vec3>,
    /// Shading normals.
    pub n: Vec<Vec3>,
    /// Geometric normals.
    pub ng: Vec<Vec3>,
    /// Incident directions, eye to surface.
    pub i: Vec<Vec3>,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
    pub s: Vec<f32>,
    pub t: Vec<f32>,
    /// Surface input color and opacity.
    pub cs: Vec<Color>,
    pub os: Vec<Color>,
    /// Shaded output color and opacity.
    pub ci: Vec<Color>,
    pub oi: Vec<Color>,
    /// Scratch written by light shaders: direction to the light and its
    /// unoccluded color at each point.
    pub l: Vec<Vec3>,
    pub cl: Vec<Color>,
    /// Evaluated light contributions consumed by the surface shader's
    /// illuminance accumulation.
    pub lights: Vec<LightContribution>,
    /// Vertices outside the image that shading may skip.
    pub culled: Vec<bool>,
}

/// One light's evaluated contribution across the grid.
pub struct LightContribution {
    pub ambient: bool,
    pub l: Vec<Vec3>,
    pub cl: Vec<Color>,
}

impl ShaderEnv {
    #[must_use]
    pub fn new(u_dim: usize, v_dim: usize) -> Self {
        let n = u_dim * v_dim;
        Self {
            u_dim,
            v_dim,
            p: vec![Vec3::ZERO; n],
            n: vec![Vec3::Z; n],
            ng: vec![Vec3::Z; n],
            i: vec![Vec3::Z; n],
            u: vec![0.0; n],
            v: vec![0.0; n],
            s: vec![0.0; n],
            t: vec![0.0; n],
            cs: vec![Color::WHITE; n],
            os: vec![Color::WHITE; n],
            ci: vec![Color::BLACK; n],
            oi: vec![Color::WHITE; n],
            l: vec![Vec3::ZERO; n],
            cl: vec![Color::BLACK; n],
            lights: Vec::new(),
            culled: vec![false; n],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.p.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }
}

/// Per-evaluation services handed to a shader.
pub struct EvalContext<'a> {
    pub textures: &'a TextureSystem,
    pub rng: &'a mut StdRng,
    /// The evaluating binding's parameter list.
    pub params: &'a ParamList,
    /// Render camera to world, for shadow and environment lookups that
    /// work in world space.
    pub camera_to_world: Mat4,
    pub world_to_camera: Mat4,
    /// The evaluating shader's binding space to world.
    pub shader_to_world: Mat4,
}

/// A shader object: evaluated in place on a [`ShaderEnv`].
pub trait Shader: Send + Sync {
    fn name(&self) -> &str;

    /// True for ambient light shaders; the illuminance loop treats their
    /// contribution as directionless.
    fn is_ambient(&self) -> bool {
        false
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()>;
}

/// A shader bound to its parameters and declaration-time transform.
#[derive(Clone)]
pub struct ShaderBinding {
    pub shader: Arc<dyn Shader>,
    pub params: ParamList,
    pub object_to_world: Mat4,
}

impl ShaderBinding {
    #[must_use]
    pub fn new(shader: Arc<dyn Shader>, params: ParamList, object_to_world: Mat4) -> Self {
        Self {
            shader,
            params,
            object_to_world,
        }
    }
}

impl fmt::Debug for ShaderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderBinding")
            .field("shader", &self.shader.name())
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

/// A declared light source: its shader binding plus the on/off handle
/// state lives in the attribute's active set.
#[derive(Debug, Clone)]
pub struct LightSource {
    pub binding: ShaderBinding,
    pub ambient: bool,
    pub area: bool,
}

/// Shader factory: built-ins plus anything the host registers.
pub struct ShaderRegistry {
    shaders: RwLock<FxHashMap<String, Arc<dyn Shader>>>,
}

impl Default for ShaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderRegistry {
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            shaders: RwLock::new(FxHashMap::default()),
        };
        builtin::register_all(&registry);
        registry
    }

    /// Registers a shader under its name, replacing any previous entry.
    pub fn register(&self, shader: Arc<dyn Shader>) {
        self.shaders
            .write()
            .insert(shader.name().to_string(), shader);
    }

    /// Loads a shader by name. The search path argument exists for
    /// external shader objects; the built-in table is consulted first.
    pub fn load(&self, name: &str, _search_paths: &[String]) -> Result<Arc<dyn Shader>> {
        self.shaders
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::UnknownSymbol(format!("shader \"{name}\"")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_standard_shaders() {
        let reg = ShaderRegistry::new();
        for name in [
            "constant",
            "matte",
            "metal",
            "plastic",
            "paintedplastic",
            "shinymetal",
            "ambientlight",
            "distantlight",
            "pointlight",
            "spotlight",
            "depthcue",
            "fog",
            "displacement",
            "background",
        ] {
            assert!(reg.load(name, &[]).is_ok(), "missing builtin {name}");
        }
        assert!(reg.load("unobtanium", &[]).is_err());
    }

    #[test]
    fn env_dimensions() {
        let env = ShaderEnv::new(3, 4);
        assert_eq!(env.len(), 12);
        assert_eq!(env.u_dim, 3);
    }
}
