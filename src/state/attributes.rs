//! Graphics State Attributes
//!
//! The stackable attribute bundle: a shading half (color, opacity, shader
//! bindings, active lights) and a geometric half (bound, bases,
//! orientation, sides, displacement). Handles are reference-counted and
//! copy-on-write: a scope that mutates a shared state clones it first, so
//! changes inside an inner scope never leak outward.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec2;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::math::{Bound, Color, spline::Basis};
use crate::params::ParamList;
use crate::shading::{LightKey, ShaderBinding};

/// Shared handle to an attribute state.
pub type AttributesHandle = Arc<Attributes>;

static NEXT_ATTRIBUTES_ID: AtomicU64 = AtomicU64::new(1);

/// How shaded grid values are spread across micropolygons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadingInterpolation {
    #[default]
    Constant,
    Smooth,
}

/// Handedness of primitive description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    LeftHanded,
    RightHanded,
}

impl Orientation {
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::LeftHanded => Self::RightHanded,
            Self::RightHanded => Self::LeftHanded,
        }
    }
}

/// The shading half of the attribute state.
#[derive(Debug, Clone)]
pub struct ShadingAttributes {
    pub color: Color,
    pub opacity: Color,
    /// Texture coordinates at the four parametric corners of a patch.
    pub texture_coordinates: [Vec2; 4],
    /// Upper bound on micropolygon raster extent, in pixels.
    pub shading_rate: f32,
    pub interpolation: ShadingInterpolation,
    pub matte: bool,
    pub surface: Option<ShaderBinding>,
    pub atmosphere: Option<ShaderBinding>,
    pub interior: Option<ShaderBinding>,
    pub exterior: Option<ShaderBinding>,
    pub area_light: Option<ShaderBinding>,
    /// Light sources currently switched on.
    pub lights: SmallVec<[LightKey; 8]>,
}

impl Default for ShadingAttributes {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            opacity: Color::WHITE,
            texture_coordinates: [
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
            ],
            shading_rate: 1.0,
            interpolation: ShadingInterpolation::default(),
            matte: false,
            surface: None,
            atmosphere: None,
            interior: None,
            exterior: None,
            area_light: None,
            lights: SmallVec::new(),
        }
    }
}

/// The geometric half of the attribute state.
#[derive(Debug, Clone)]
pub struct GeometricAttributes {
    /// Object-space bound declared through the interface, if any.
    pub bound: Option<Bound>,
    /// (min visible, lower transition, upper transition, max visible).
    pub detail_range: [f32; 4],
    pub u_basis: Basis,
    pub v_basis: Basis,
    pub orientation: Orientation,
    pub coordsys_orientation: Orientation,
    /// 1 or 2.
    pub sides: u32,
    pub displacement: Option<ShaderBinding>,
    /// Camera-space padding added to bounds when displacing.
    pub displacement_bound: f32,
    pub displacement_coordsys: String,
}

impl Default for GeometricAttributes {
    fn default() -> Self {
        Self {
            bound: None,
            detail_range: [f32::NEG_INFINITY, f32::NEG_INFINITY, f32::INFINITY, f32::INFINITY],
            u_basis: Basis::bezier(),
            v_basis: Basis::bezier(),
            orientation: Orientation::default(),
            coordsys_orientation: Orientation::default(),
            sides: 2,
            displacement: None,
            displacement_bound: 0.0,
            displacement_coordsys: "object".to_string(),
        }
    }
}

/// A full attribute state. Cheap to share, cloned on first write in each
/// scope.
#[derive(Debug, Clone)]
pub struct Attributes {
    /// Identity of this state, used to key once-per diagnostics.
    /// Regenerated whenever a copy-on-write clone happens.
    pub id: u64,
    pub shading: ShadingAttributes,
    pub geometric: GeometricAttributes,
    /// User attributes: category name to parameter list.
    pub user: FxHashMap<String, ParamList>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            id: NEXT_ATTRIBUTES_ID.fetch_add(1, Ordering::Relaxed),
            shading: ShadingAttributes::default(),
            geometric: GeometricAttributes::default(),
            user: FxHashMap::default(),
        }
    }
}

impl Attributes {
    /// Ensures the handle is uniquely owned and returns a mutable
    /// reference, cloning the state (with a fresh id) when it is shared.
    pub fn write(this: &mut AttributesHandle) -> &mut Self {
        if Arc::strong_count(this) > 1 {
            let mut clone = (**this).clone();
            clone.id = NEXT_ATTRIBUTES_ID.fetch_add(1, Ordering::Relaxed);
            *this = Arc::new(clone);
        }
        Arc::make_mut(this)
    }

    /// Merges a parameter list into a user attribute category.
    pub fn set_user(&mut self, category: &str, params: &ParamList) {
        let entry = self.user.entry(category.to_string()).or_default();
        for p in params.iter() {
            entry.push(p.clone());
        }
    }

    #[must_use]
    pub fn user_float(&self, category: &str, name: &str) -> Option<f32> {
        self.user.get(category)?.float(name)
    }

    #[must_use]
    pub fn user_string(&self, category: &str, name: &str) -> Option<&str> {
        self.user.get(category)?.string(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_on_shared_handle_clones() {
        let outer: AttributesHandle = Arc::new(Attributes::default());
        let outer_id = outer.id;
        let mut inner = Arc::clone(&outer);
        let state = Attributes::write(&mut inner);
        state.shading.color = Color::new(1.0, 0.0, 0.0);
        assert_ne!(inner.id, outer_id);
        assert_eq!(outer.shading.color, Color::WHITE);
        assert_eq!(inner.shading.color, Color::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn write_on_unique_handle_keeps_identity() {
        let mut handle: AttributesHandle = Arc::new(Attributes::default());
        let id = handle.id;
        Attributes::write(&mut handle).shading.matte = true;
        assert_eq!(handle.id, id);
    }

    #[test]
    fn user_attributes_merge_per_category() {
        let mut attrs = Attributes::default();
        attrs.set_user(
            "identifier",
            &ParamList::new().with_string("uniform string name", "teapot"),
        );
        attrs.set_user(
            "identifier",
            &ParamList::new().with_floats("uniform float version", &[2.0]),
        );
        assert_eq!(attrs.user_string("identifier", "name"), Some("teapot"));
        assert_eq!(attrs.user_float("identifier", "version"), Some(2.0));
    }

    #[test]
    fn orientation_flip() {
        assert_eq!(Orientation::LeftHanded.flipped(), Orientation::RightHanded);
    }
}
