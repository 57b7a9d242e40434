//! Named Coordinate Systems
//!
//! The registry of named spaces. Each entry stores the space-to-world
//! matrix; world-to-space is derived. Composed space-to-space lookups are
//! cached. Built-in names (`world`, `camera`, `screen`, `NDC`, `raster`,
//! and the contextual `current`, `object`, `shader`) can never be aliased
//! by user registrations.

use glam::Mat4;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{RenderError, Result};

const BUILTIN_NAMES: &[&str] = &[
    "world", "camera", "screen", "NDC", "raster", "current", "object", "shader",
];

/// The registry. `current`, `object` and `shader` are contextual: lookups
/// of those names go through the matrix supplied per call.
pub struct CoordSysRegistry {
    /// Per name: (space-to-world, world-to-space). Projective built-ins
    /// install both halves explicitly since their matrices may not
    /// invert.
    spaces: FxHashMap<String, (Mat4, Mat4)>,
    cache: Mutex<FxHashMap<(String, String), Mat4>>,
}

impl Default for CoordSysRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordSysRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut spaces = FxHashMap::default();
        for name in ["world", "camera", "screen", "NDC", "raster"] {
            spaces.insert(name.to_string(), (Mat4::IDENTITY, Mat4::IDENTITY));
        }
        Self {
            spaces,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Installs a built-in space's matrix pair. Used by the renderer
    /// when the camera is frozen at world begin.
    pub fn set_builtin(&mut self, name: &str, to_world: Mat4, from_world: Mat4) {
        self.spaces
            .insert(name.to_string(), (to_world, from_world));
        self.cache.lock().clear();
    }

    /// Registers a user coordinate system, as `coordinate_system()` does.
    pub fn register(&mut self, name: &str, to_world: Mat4) -> Result<()> {
        if BUILTIN_NAMES.contains(&name) {
            return Err(RenderError::InvalidData(format!(
                "coordinate system \"{name}\" is built in"
            )));
        }
        self.spaces
            .insert(name.to_string(), (to_world, to_world.inverse()));
        self.cache.lock().clear();
        Ok(())
    }

    /// Space-to-world matrix of a named space. `current`, `object` and
    /// `shader` resolve to the supplied contextual matrix.
    pub fn to_world(&self, name: &str, contextual: Option<&Mat4>) -> Result<Mat4> {
        match name {
            "current" | "object" | "shader" => contextual.copied().ok_or_else(|| {
                RenderError::UnknownSymbol(format!(
                    "contextual space \"{name}\" used without a transform"
                ))
            }),
            _ => self
                .spaces
                .get(name)
                .map(|(to_world, _)| *to_world)
                .ok_or_else(|| RenderError::UnknownSymbol(format!("coordinate system \"{name}\""))),
        }
    }

    /// World-to-space matrix of a named space.
    pub fn from_world(&self, name: &str, contextual: Option<&Mat4>) -> Result<Mat4> {
        match name {
            "current" | "object" | "shader" => contextual.map(Mat4::inverse).ok_or_else(|| {
                RenderError::UnknownSymbol(format!(
                    "contextual space \"{name}\" used without a transform"
                ))
            }),
            _ => self
                .spaces
                .get(name)
                .map(|(_, from_world)| *from_world)
                .ok_or_else(|| RenderError::UnknownSymbol(format!("coordinate system \"{name}\""))),
        }
    }

    /// Composed matrix taking points of `from` space into `to` space.
    /// Cached for named-to-named pairs.
    pub fn space_to_space(
        &self,
        from: &str,
        to: &str,
        contextual: Option<&Mat4>,
    ) -> Result<Mat4> {
        let contextual_pair = matches!(from, "current" | "object" | "shader")
            || matches!(to, "current" | "object" | "shader");
        if !contextual_pair
            && let Some(cached) = self.cache.lock().get(&(from.to_string(), to.to_string()))
        {
            return Ok(*cached);
        }
        let composed = self.from_world(to, contextual)? * self.to_world(from, contextual)?;
        if !contextual_pair {
            self.cache
                .lock()
                .insert((from.to_string(), to.to_string()), composed);
        }
        Ok(composed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    #[test]
    fn world_to_world_is_identity() {
        let reg = CoordSysRegistry::new();
        assert_eq!(
            reg.space_to_space("world", "world", None).unwrap(),
            Mat4::IDENTITY
        );
    }

    #[test]
    fn user_space_round_trips_through_world() {
        let mut reg = CoordSysRegistry::new();
        reg.register("lamp", Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)))
            .unwrap();
        let m = reg.space_to_space("lamp", "world", None).unwrap();
        let p = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!(p.truncate(), Vec3::new(0.0, 5.0, 0.0));
        let back = reg.space_to_space("world", "lamp", None).unwrap();
        let q = back * p;
        assert_eq!(q.truncate(), Vec3::ZERO);
    }

    #[test]
    fn builtins_cannot_be_aliased() {
        let mut reg = CoordSysRegistry::new();
        assert!(reg.register("camera", Mat4::IDENTITY).is_err());
        assert!(reg.register("current", Mat4::IDENTITY).is_err());
    }

    #[test]
    fn contextual_space_needs_matrix() {
        let reg = CoordSysRegistry::new();
        assert!(reg.space_to_space("object", "world", None).is_err());
        let m = Mat4::from_translation(Vec3::X);
        let composed = reg.space_to_space("object", "world", Some(&m)).unwrap();
        assert_eq!(composed, m);
    }

    #[test]
    fn unknown_space_is_reported() {
        let reg = CoordSysRegistry::new();
        let err = reg.space_to_space("nowhere", "world", None).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::UnknownSymbol);
    }
}
