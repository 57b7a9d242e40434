//! Option, Attribute and Transform Mutators
//!
//! The interface calls that reshape the graphics state. Option calls are
//! rejected once the world is open; attribute mutations copy-on-write
//! the current state; transform calls inside a motion block edit the key
//! at the block's current time and advance it.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};

use crate::errors::{RenderError, Result, Severity};
use crate::math::{Color, mat4_from_rows, spline::Basis};
use crate::params::ParamList;
use crate::shading::{LightKey, LightSource, ShaderBinding};
use crate::state::{DisplayMode, Orientation, Projection, Quantize, ShadingInterpolation, Transform};

use super::Renderer;

impl Renderer {
    fn require_options_scope(&self, call: &str) -> Result<()> {
        if self.context.in_world() {
            return Err(RenderError::InvalidNesting(format!(
                "{call} after world begin"
            )));
        }
        if !self.context.is_active() {
            return Err(RenderError::InvalidNesting(format!(
                "{call} outside begin/end"
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    pub fn format(&mut self, width: u32, height: u32, pixel_aspect: f32) -> Result<()> {
        self.require_options_scope("format")?;
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidData(format!(
                "format {width}x{height}"
            )));
        }
        self.options.x_resolution = width;
        self.options.y_resolution = height;
        self.options.pixel_aspect_ratio = if pixel_aspect > 0.0 { pixel_aspect } else { 1.0 };
        if !self.screen_window_set {
            self.options.frame_aspect_ratio =
                (width as f32 * self.options.pixel_aspect_ratio) / height as f32;
            self.options.fit_screen_window_to_aspect();
        }
        Ok(())
    }

    pub fn frame_aspect_ratio(&mut self, aspect: f32) -> Result<()> {
        self.require_options_scope("frame aspect ratio")?;
        self.options.frame_aspect_ratio = aspect;
        if !self.screen_window_set {
            self.options.fit_screen_window_to_aspect();
        }
        Ok(())
    }

    pub fn screen_window(&mut self, left: f32, right: f32, bottom: f32, top: f32) -> Result<()> {
        self.require_options_scope("screen window")?;
        self.options.screen_window = [left, right, bottom, top];
        self.screen_window_set = true;
        Ok(())
    }

    pub fn crop_window(&mut self, xmin: f32, xmax: f32, ymin: f32, ymax: f32) -> Result<()> {
        self.require_options_scope("crop window")?;
        if !(0.0..=1.0).contains(&xmin) || xmax < xmin || ymax < ymin || ymax > 1.0 {
            return Err(RenderError::InvalidData(format!(
                "crop window ({xmin}, {xmax}, {ymin}, {ymax})"
            )));
        }
        self.options.crop_window = [xmin, xmax, ymin, ymax];
        Ok(())
    }

    pub fn projection(&mut self, name: &str, params: &ParamList) -> Result<()> {
        self.require_options_scope("projection")?;
        self.options.projection = match name {
            "orthographic" => Projection::Orthographic,
            "perspective" => Projection::Perspective,
            other => Projection::User(other.to_string()),
        };
        if let Some(fov) = params.float("fov") {
            self.options.field_of_view = fov;
        }
        // Projection resets the camera-to-current transform.
        self.context
            .replace_transform(Arc::new(Transform::identity()))?;
        Ok(())
    }

    pub fn clipping(&mut self, near: f32, far: f32) -> Result<()> {
        self.require_options_scope("clipping")?;
        if near <= 0.0 || far <= near {
            return Err(RenderError::InvalidData(format!(
                "clipping planes ({near}, {far})"
            )));
        }
        self.options.near_clip = near;
        self.options.far_clip = far;
        Ok(())
    }

    pub fn depth_of_field(&mut self, f_stop: f32, focal_length: f32, focal_distance: f32) -> Result<()> {
        self.require_options_scope("depth of field")?;
        self.options.f_stop = f_stop;
        self.options.focal_length = focal_length;
        self.options.focal_distance = focal_distance;
        if f_stop <= 0.0 || focal_distance <= self.options.near_clip {
            let err = RenderError::InvalidData(format!(
                "degenerate depth of field (f/{f_stop}, focal distance {focal_distance}); disabled"
            ));
            self.diagnostics.report(Severity::Warning, &err)?;
        }
        Ok(())
    }

    pub fn shutter(&mut self, open: f32, close: f32) -> Result<()> {
        self.require_options_scope("shutter")?;
        if close < open {
            return Err(RenderError::InvalidData(format!(
                "shutter ({open}, {close})"
            )));
        }
        self.options.shutter_open = open;
        self.options.shutter_close = close;
        Ok(())
    }

    pub fn pixel_samples(&mut self, x: f32, y: f32) -> Result<()> {
        self.require_options_scope("pixel samples")?;
        self.options.pixel_x_samples = (x.max(1.0)) as u32;
        self.options.pixel_y_samples = (y.max(1.0)) as u32;
        Ok(())
    }

    pub fn pixel_filter(&mut self, name: &str, xwidth: f32, ywidth: f32) -> Result<()> {
        self.require_options_scope("pixel filter")?;
        // Resolve now so a bad name fails at the call site.
        crate::filters::by_name(name)?;
        self.options.filter_name = name.to_string();
        self.options.filter_x_width = xwidth.max(1.0);
        self.options.filter_y_width = ywidth.max(1.0);
        Ok(())
    }

    pub fn exposure(&mut self, gain: f32, gamma: f32) -> Result<()> {
        self.require_options_scope("exposure")?;
        if gain <= 0.0 || gamma <= 0.0 {
            return Err(RenderError::InvalidData(format!(
                "exposure ({gain}, {gamma})"
            )));
        }
        self.options.exposure_gain = gain;
        self.options.exposure_gamma = gamma;
        Ok(())
    }

    pub fn imager(&mut self, name: &str, params: &ParamList) -> Result<()> {
        self.require_options_scope("imager")?;
        self.options.imager_name = name.to_string();
        self.options.set_user("imager", params);
        Ok(())
    }

    pub fn quantize(&mut self, kind: &str, one: i32, min: i32, max: i32, dither: f32) -> Result<()> {
        self.require_options_scope("quantize")?;
        let quant = Quantize {
            one,
            min,
            max,
            dither,
        };
        match kind {
            "rgba" => self.options.color_quantize = quant,
            "z" => self.options.depth_quantize = quant,
            other => {
                return Err(RenderError::InvalidType(format!(
                    "quantize kind \"{other}\""
                )));
            }
        }
        Ok(())
    }

    pub fn display(&mut self, name: &str, display_type: &str, mode: &str, _params: &ParamList) -> Result<()> {
        self.require_options_scope("display")?;
        let parsed = DisplayMode::from_mode_string(mode);
        if parsed.is_empty() {
            return Err(RenderError::InvalidType(format!(
                "display mode \"{mode}\""
            )));
        }
        self.options.display_name = name.trim_start_matches('+').to_string();
        self.options.display_type = display_type.to_string();
        self.options.display_mode = parsed;
        Ok(())
    }

    pub fn hider(&mut self, name: &str, params: &ParamList) -> Result<()> {
        self.require_options_scope("hider")?;
        self.options.hider = name.to_string();
        self.options.set_user("Hider", params);
        Ok(())
    }

    pub fn color_samples(&mut self, count: u32) -> Result<()> {
        self.require_options_scope("color samples")?;
        if count != 3 {
            let err = RenderError::Unimplemented(format!(
                "{count} color samples; rendering stays rgb"
            ));
            self.diagnostics.report(Severity::Warning, &err)?;
        }
        self.options.color_samples = count;
        Ok(())
    }

    pub fn relative_detail(&mut self, detail: f32) -> Result<()> {
        self.require_options_scope("relative detail")?;
        self.options.relative_detail = detail.max(0.0);
        Ok(())
    }

    /// The open-ended `option` call: merges into a user category.
    pub fn option(&mut self, category: &str, params: &ParamList) -> Result<()> {
        if !self.context.is_active() {
            return Err(RenderError::InvalidNesting("option outside begin".into()));
        }
        self.options.set_user(category, params);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn color(&mut self, color: Color) -> Result<()> {
        self.context.attributes_mut()?.shading.color = color;
        Ok(())
    }

    pub fn opacity(&mut self, opacity: Color) -> Result<()> {
        self.context.attributes_mut()?.shading.opacity = opacity;
        Ok(())
    }

    pub fn texture_coordinates(&mut self, corners: [Vec2; 4]) -> Result<()> {
        self.context.attributes_mut()?.shading.texture_coordinates = corners;
        Ok(())
    }

    pub fn shading_rate(&mut self, rate: f32) -> Result<()> {
        if rate <= 0.0 {
            return Err(RenderError::InvalidData(format!("shading rate {rate}")));
        }
        self.context.attributes_mut()?.shading.shading_rate = rate;
        Ok(())
    }

    pub fn shading_interpolation(&mut self, kind: &str) -> Result<()> {
        let parsed = match kind {
            "constant" => ShadingInterpolation::Constant,
            "smooth" => ShadingInterpolation::Smooth,
            other => {
                return Err(RenderError::InvalidType(format!(
                    "shading interpolation \"{other}\""
                )));
            }
        };
        self.context.attributes_mut()?.shading.interpolation = parsed;
        Ok(())
    }

    pub fn matte(&mut self, on: bool) -> Result<()> {
        self.context.attributes_mut()?.shading.matte = on;
        Ok(())
    }

    pub fn bound(&mut self, bound: crate::math::Bound) -> Result<()> {
        self.context.attributes_mut()?.geometric.bound = Some(bound);
        Ok(())
    }

    pub fn detail(&mut self, bound: crate::math::Bound) -> Result<()> {
        // Stored with the declared bound; detail selection uses the
        // detail range.
        self.context.attributes_mut()?.geometric.bound = Some(bound);
        Ok(())
    }

    pub fn detail_range(&mut self, range: [f32; 4]) -> Result<()> {
        if !(range[0] <= range[1] && range[1] <= range[2] && range[2] <= range[3]) {
            return Err(RenderError::InvalidData(format!(
                "detail range {range:?} is not ordered"
            )));
        }
        self.context.attributes_mut()?.geometric.detail_range = range;
        Ok(())
    }

    pub fn geometric_approximation(&mut self, kind: &str, value: f32) -> Result<()> {
        let params = ParamList::new().with_floats(&format!("uniform float {kind}"), &[value]);
        self.context
            .attributes_mut()?
            .set_user("geometricapproximation", &params);
        Ok(())
    }

    pub fn orientation(&mut self, orientation: &str) -> Result<()> {
        let attrs = self.context.attributes_mut()?;
        attrs.geometric.orientation = match orientation {
            "outside" => attrs.geometric.coordsys_orientation,
            "inside" => attrs.geometric.coordsys_orientation.flipped(),
            "lh" => Orientation::LeftHanded,
            "rh" => Orientation::RightHanded,
            other => {
                return Err(RenderError::InvalidType(format!(
                    "orientation \"{other}\""
                )));
            }
        };
        Ok(())
    }

    pub fn reverse_orientation(&mut self) -> Result<()> {
        let attrs = self.context.attributes_mut()?;
        attrs.geometric.orientation = attrs.geometric.orientation.flipped();
        Ok(())
    }

    pub fn sides(&mut self, sides: u32) -> Result<()> {
        if sides != 1 && sides != 2 {
            return Err(RenderError::InvalidData(format!("sides {sides}")));
        }
        self.context.attributes_mut()?.geometric.sides = sides;
        Ok(())
    }

    pub fn basis(&mut self, u_basis: Basis, v_basis: Basis) -> Result<()> {
        let attrs = self.context.attributes_mut()?;
        attrs.geometric.u_basis = u_basis;
        attrs.geometric.v_basis = v_basis;
        Ok(())
    }

    /// Named basis variant of `basis`.
    pub fn basis_by_name(&mut self, u_name: &str, u_step: usize, v_name: &str, v_step: usize) -> Result<()> {
        let mut u_basis = Basis::by_name(u_name)?;
        let mut v_basis = Basis::by_name(v_name)?;
        u_basis.step = u_step.max(1);
        v_basis.step = v_step.max(1);
        self.basis(u_basis, v_basis)
    }

    /// The open-ended `attribute` call. `displacementbound` feeds the
    /// typed displacement fields.
    pub fn attribute(&mut self, category: &str, params: &ParamList) -> Result<()> {
        let attrs = self.context.attributes_mut()?;
        if category == "displacementbound" {
            if let Some(sphere) = params.float("sphere") {
                attrs.geometric.displacement_bound = sphere;
            }
            if let Some(space) = params.string("coordinatesystem") {
                attrs.geometric.displacement_coordsys = space.to_string();
            }
        }
        attrs.set_user(category, params);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shaders and lights
    // ------------------------------------------------------------------

    fn bind_shader(&mut self, name: &str, params: &ParamList) -> Result<ShaderBinding> {
        let shader = self
            .shaders
            .load(name, &self.options.search_path("shader"))?;
        let object_to_world = self.context.transform()?.matrix_at(0.0);
        Ok(ShaderBinding::new(shader, params.clone(), object_to_world))
    }

    pub fn surface(&mut self, name: &str, params: &ParamList) -> Result<()> {
        let binding = self.bind_shader(name, params)?;
        self.context.attributes_mut()?.shading.surface = Some(binding);
        Ok(())
    }

    pub fn atmosphere(&mut self, name: &str, params: &ParamList) -> Result<()> {
        let binding = self.bind_shader(name, params)?;
        self.context.attributes_mut()?.shading.atmosphere = Some(binding);
        Ok(())
    }

    pub fn interior(&mut self, name: &str, params: &ParamList) -> Result<()> {
        let binding = self.bind_shader(name, params)?;
        self.context.attributes_mut()?.shading.interior = Some(binding);
        Ok(())
    }

    pub fn exterior(&mut self, name: &str, params: &ParamList) -> Result<()> {
        let binding = self.bind_shader(name, params)?;
        self.context.attributes_mut()?.shading.exterior = Some(binding);
        Ok(())
    }

    pub fn displacement(&mut self, name: &str, params: &ParamList) -> Result<()> {
        let binding = self.bind_shader(name, params)?;
        let attrs = self.context.attributes_mut()?;
        attrs.geometric.displacement = Some(binding);
        if attrs.geometric.displacement_bound == 0.0 {
            let scope = attrs.id;
            let err = RenderError::NoDisplacementBound;
            self.diagnostics.report_once(Severity::Warning, scope, &err)?;
        }
        Ok(())
    }

    /// Declares a light source; it starts switched on in the current
    /// attribute state.
    pub fn light_source(&mut self, name: &str, params: &ParamList) -> Result<LightKey> {
        let binding = self.bind_shader(name, params)?;
        let ambient = binding.shader.is_ambient();
        let key = self.lights.insert(LightSource {
            binding,
            ambient,
            area: false,
        });
        self.context.attributes_mut()?.shading.lights.push(key);
        Ok(key)
    }

    /// Declares an area light bound to subsequent primitives.
    pub fn area_light_source(&mut self, name: &str, params: &ParamList) -> Result<LightKey> {
        let binding = self.bind_shader(name, params)?;
        let ambient = binding.shader.is_ambient();
        let key = self.lights.insert(LightSource {
            binding: binding.clone(),
            ambient,
            area: true,
        });
        let attrs = self.context.attributes_mut()?;
        attrs.shading.area_light = Some(binding);
        attrs.shading.lights.push(key);
        Ok(key)
    }

    /// Toggles a light's membership in the active set.
    pub fn illuminate(&mut self, handle: LightKey, on: bool) -> Result<()> {
        if !self.lights.contains_key(handle) {
            return Err(RenderError::UnknownSymbol("light handle".to_string()));
        }
        let lights = &mut self.context.attributes_mut()?.shading.lights;
        let present = lights.iter().position(|&k| k == handle);
        match (on, present) {
            (true, None) => lights.push(handle),
            (false, Some(idx)) => {
                lights.remove(idx);
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------

    /// Applies a transform-affecting call: inside a motion block it
    /// edits the key at the current time and advances; outside it edits
    /// every key.
    fn apply_transform(&mut self, concat: bool, m: Mat4) -> Result<()> {
        if let Some(motion) = self.context.motion() {
            let time = motion.current_time().ok_or_else(|| {
                RenderError::InvalidData("motion block received too many calls".to_string())
            })?;
            let transform = self.context.transform_mut()?;
            if concat {
                transform.concat_at_time(time, m);
            } else {
                transform.set_at_time(time, m);
            }
            self.context.advance_motion()?;
        } else {
            let transform = self.context.transform_mut()?;
            if concat {
                transform.concat_all(m);
            } else {
                transform.set_all(m);
            }
        }
        Ok(())
    }

    pub fn identity(&mut self) -> Result<()> {
        self.apply_transform(false, Mat4::IDENTITY)
    }

    pub fn transform(&mut self, matrix: Mat4) -> Result<()> {
        self.apply_transform(false, matrix)
    }

    pub fn concat_transform(&mut self, matrix: Mat4) -> Result<()> {
        self.apply_transform(true, matrix)
    }

    pub fn translate(&mut self, offset: Vec3) -> Result<()> {
        self.apply_transform(true, Mat4::from_translation(offset))
    }

    pub fn rotate(&mut self, angle_degrees: f32, axis: Vec3) -> Result<()> {
        if axis.length_squared() <= f32::EPSILON {
            return Err(RenderError::InvalidData("rotate about zero axis".into()));
        }
        self.apply_transform(
            true,
            Mat4::from_axis_angle(axis.normalize(), angle_degrees.to_radians()),
        )
    }

    pub fn scale(&mut self, factors: Vec3) -> Result<()> {
        self.apply_transform(true, Mat4::from_scale(factors))
    }

    /// Shears points along `d2` in proportion to their extent along
    /// `d1`.
    pub fn skew(&mut self, angle_degrees: f32, d1: Vec3, d2: Vec3) -> Result<()> {
        let a = d1.normalize_or_zero();
        let b = d2.normalize_or_zero();
        if a.length_squared() <= f32::EPSILON || b.length_squared() <= f32::EPSILON {
            return Err(RenderError::InvalidData("skew with zero axis".into()));
        }
        let t = angle_degrees.to_radians().tan();
        let m = mat4_from_rows([
            [1.0 + t * b.x * a.x, t * b.x * a.y, t * b.x * a.z, 0.0],
            [t * b.y * a.x, 1.0 + t * b.y * a.y, t * b.y * a.z, 0.0],
            [t * b.z * a.x, t * b.z * a.y, 1.0 + t * b.z * a.z, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        self.apply_transform(true, m)
    }

    /// Concatenates a perspective along z, as the interface's
    /// `perspective` call does.
    pub fn perspective(&mut self, fov_degrees: f32) -> Result<()> {
        let f = 1.0 / (fov_degrees.to_radians() * 0.5).tan();
        let m = mat4_from_rows([
            [f, 0.0, 0.0, 0.0],
            [0.0, f, 0.0, 0.0],
            [0.0, 0.0, 1.0, 1.0],
            [0.0, 0.0, 0.0, 0.0],
        ]);
        self.apply_transform(true, m)
    }

    /// Stores the current transform under a name.
    pub fn coordinate_system(&mut self, name: &str) -> Result<()> {
        let to_world = self.context.transform()?.matrix_at(0.0);
        self.coordsys.register(name, to_world)
    }

    /// Replaces the current transform with a named space's.
    pub fn coord_sys_transform(&mut self, name: &str) -> Result<()> {
        let contextual = self.context.transform()?.matrix_at(0.0);
        let to_world = self.coordsys.to_world(name, Some(&contextual))?;
        self.context
            .replace_transform(Arc::new(Transform::from_matrix(to_world)))
    }

    /// Maps points between named spaces.
    pub fn transform_points(&self, from: &str, to: &str, points: &mut [Vec3]) -> Result<()> {
        let contextual = self.context.transform()?.matrix_at(0.0);
        let m = self.coordsys.space_to_space(from, to, Some(&contextual))?;
        for p in points.iter_mut() {
            *p = crate::math::transform_point(&m, *p);
        }
        Ok(())
    }
}
