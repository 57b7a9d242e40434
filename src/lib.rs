#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::similar_names)]

//! A RenderMan-style REYES renderer.
//!
//! Scenes are described through the stateful procedural interface on
//! [`Renderer`]: camera and display options, stackable attributes and
//! transforms, shader bindings, and geometric primitives. Closing the
//! world runs the bucketed hidden-surface pipeline — primitives are
//! split and diced into micropolygon grids, shaded, sampled against
//! stratified sub-pixel samples (with motion blur and depth of field),
//! composed with per-sample z ordering and optional CSG, filtered,
//! exposed, quantised and streamed to a display driver.

pub mod csg;
pub mod display;
pub mod errors;
pub mod filters;
pub mod geometry;
pub mod math;
pub mod micropoly;
pub mod params;
pub mod raster;
pub mod ri;
pub mod shading;
pub mod state;
pub mod stats;
pub mod texture;

pub use display::{DisplayDriver, DisplayManager};
pub use errors::{ErrorHandler, ErrorKind, RenderError, Result, Severity};
pub use math::{Basis, Bound, Color};
pub use params::{Declaration, ParamList};
pub use ri::{ObjectKey, ProceduralRequest, Renderer, TokenData};
pub use shading::{LightKey, Shader, ShaderEnv};
pub use state::{Options, Orientation, ShadingInterpolation};
pub use texture::{ShadowMap, TextureMap, TextureSystem};
