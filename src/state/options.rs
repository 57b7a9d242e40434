//! Render Options
//!
//! The frame-global option snapshot: camera, display, sampling and hider
//! settings plus the open-ended user option map. Owned by the Main scope,
//! snapshotted by Frame scopes, and frozen when the world begins.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::math::Color;
use crate::params::ParamList;

bitflags! {
    /// Which channels the display receives.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DisplayMode: u32 {
        const RGB = 1;
        const A = 2;
        const Z = 4;
    }
}

impl DisplayMode {
    /// Parses a display mode string such as `"rgba"` or `"z"`.
    #[must_use]
    pub fn from_mode_string(mode: &str) -> Self {
        let mut out = Self::empty();
        if mode.contains("rgb") {
            out |= Self::RGB;
        }
        if mode.contains('a') {
            out |= Self::A;
        }
        if mode.contains('z') {
            out |= Self::Z;
        }
        out
    }

    /// Channels per pixel handed to the display driver.
    #[must_use]
    pub fn channel_count(self) -> usize {
        let mut n = 0;
        if self.contains(Self::RGB) {
            n += 3;
        }
        if self.contains(Self::A) {
            n += 1;
        }
        if self.contains(Self::Z) {
            n += 1;
        }
        n
    }
}

/// Camera projection declared before the world begins.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    #[default]
    Orthographic,
    Perspective,
    User(String),
}

/// One quantisation quadruple; color and depth each carry their own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantize {
    pub one: i32,
    pub min: i32,
    pub max: i32,
    pub dither: f32,
}

/// How per-sample depths collapse to a pixel depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthFilter {
    #[default]
    Min,
    Midpoint,
    Max,
    Average,
}

impl DepthFilter {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "midpoint" => Some(Self::Midpoint),
            "max" => Some(Self::Max),
            "average" => Some(Self::Average),
            _ => None,
        }
    }
}

/// The full option state.
#[derive(Debug, Clone)]
pub struct Options {
    // Image
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub pixel_aspect_ratio: f32,
    /// Fractions of the resolution: (xmin, xmax, ymin, ymax).
    pub crop_window: [f32; 4],
    pub frame_aspect_ratio: f32,
    /// (left, right, bottom, top).
    pub screen_window: [f32; 4],

    // Camera
    pub projection: Projection,
    pub field_of_view: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub f_stop: f32,
    pub focal_length: f32,
    pub focal_distance: f32,
    pub shutter_open: f32,
    pub shutter_close: f32,

    // Sampling and filtering
    pub pixel_x_samples: u32,
    pub pixel_y_samples: u32,
    pub filter_name: String,
    pub filter_x_width: f32,
    pub filter_y_width: f32,

    // Output conditioning
    pub exposure_gain: f32,
    pub exposure_gamma: f32,
    pub imager_name: String,
    pub color_quantize: Quantize,
    pub depth_quantize: Quantize,

    // Display
    pub display_type: String,
    pub display_name: String,
    pub display_mode: DisplayMode,

    // Hider
    pub hider: String,
    pub color_samples: u32,
    pub relative_detail: f32,

    /// User options: category name to parameter list.
    pub user: FxHashMap<String, ParamList>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            x_resolution: 640,
            y_resolution: 480,
            pixel_aspect_ratio: 1.0,
            crop_window: [0.0, 1.0, 0.0, 1.0],
            frame_aspect_ratio: 4.0 / 3.0,
            screen_window: [-4.0 / 3.0, 4.0 / 3.0, -1.0, 1.0],
            projection: Projection::default(),
            field_of_view: 90.0,
            near_clip: f32::EPSILON,
            far_clip: f32::INFINITY,
            f_stop: f32::INFINITY,
            focal_length: 0.0,
            focal_distance: 0.0,
            shutter_open: 0.0,
            shutter_close: 0.0,
            pixel_x_samples: 2,
            pixel_y_samples: 2,
            filter_name: "gaussian".to_string(),
            filter_x_width: 2.0,
            filter_y_width: 2.0,
            exposure_gain: 1.0,
            exposure_gamma: 1.0,
            imager_name: "null".to_string(),
            color_quantize: Quantize {
                one: 255,
                min: 0,
                max: 255,
                dither: 0.5,
            },
            depth_quantize: Quantize {
                one: 0,
                min: 0,
                max: 0,
                dither: 0.0,
            },
            display_type: "file".to_string(),
            display_name: "ri.pic".to_string(),
            display_mode: DisplayMode::RGB,
            hider: "hidden".to_string(),
            color_samples: 3,
            relative_detail: 1.0,
            user: FxHashMap::default(),
        }
    }
}

impl Options {
    /// Recomputes the default screen window from the frame aspect ratio.
    /// Only applies while the user has not set one explicitly; the caller
    /// tracks that.
    pub fn fit_screen_window_to_aspect(&mut self) {
        let ar = self.frame_aspect_ratio;
        if ar >= 1.0 {
            self.screen_window = [-ar, ar, -1.0, 1.0];
        } else {
            self.screen_window = [-1.0, 1.0, -1.0 / ar, 1.0 / ar];
        }
    }

    /// Merges a parameter list into a user option category, expanding the
    /// `&` convention in search paths against the previous value.
    pub fn set_user(&mut self, category: &str, params: &ParamList) {
        let entry = self.user.entry(category.to_string()).or_default();
        for p in params.iter() {
            let mut p = p.clone();
            if category == "searchpath"
                && let crate::params::ParamValue::Strings(values) = &mut p.value
            {
                let previous = entry.string(&p.decl.name).unwrap_or(".").to_string();
                for v in values.iter_mut() {
                    if v.contains('&') {
                        *v = v.replace('&', &previous);
                    }
                }
            }
            entry.push(p);
        }
    }

    #[must_use]
    pub fn user_float(&self, category: &str, name: &str) -> Option<f32> {
        self.user.get(category)?.float(name)
    }

    #[must_use]
    pub fn user_int(&self, category: &str, name: &str) -> Option<i32> {
        self.user.get(category)?.int(name)
    }

    #[must_use]
    pub fn user_string(&self, category: &str, name: &str) -> Option<&str> {
        self.user.get(category)?.string(name)
    }

    // ------------------------------------------------------------------
    // Typed accessors for well-known categories
    // ------------------------------------------------------------------

    /// `limits:bucketsize`, default 16×16.
    #[must_use]
    pub fn bucket_size(&self) -> (u32, u32) {
        match self.user.get("limits").and_then(|l| l.ints("bucketsize")) {
            Some([x, y, ..]) => ((*x).max(1) as u32, (*y).max(1) as u32),
            _ => (16, 16),
        }
    }

    /// `limits:eyesplits`, default 10.
    #[must_use]
    pub fn max_eye_splits(&self) -> u32 {
        self.user_int("limits", "eyesplits").map_or(10, |n| n.max(0) as u32)
    }

    /// `limits:gridsize`: soft cap on vertices per diced grid, default 256.
    #[must_use]
    pub fn grid_size(&self) -> u32 {
        self.user_int("limits", "gridsize").map_or(256, |n| n.max(4) as u32)
    }

    /// `limits:texturememory` in kilobytes, default 8192.
    #[must_use]
    pub fn texture_memory_kb(&self) -> u32 {
        self.user_int("limits", "texturememory").map_or(8192, |n| n.max(0) as u32)
    }

    /// `limits:zthreshold`: opacity a surface needs before it registers
    /// in depth outputs. Default fully opaque.
    #[must_use]
    pub fn z_threshold(&self) -> Color {
        self.user
            .get("limits")
            .and_then(|l| l.color("zthreshold"))
            .unwrap_or(Color::WHITE)
    }

    /// `Hider:depthfilter`, default "min".
    #[must_use]
    pub fn depth_filter(&self) -> DepthFilter {
        self.user_string("Hider", "depthfilter")
            .and_then(DepthFilter::from_name)
            .unwrap_or_default()
    }

    /// `Hider:jitter`, default on.
    #[must_use]
    pub fn jitter(&self) -> bool {
        self.user_float("Hider", "jitter").is_none_or(|j| j != 0.0)
    }

    /// A `searchpath` entry split on `:`.
    #[must_use]
    pub fn search_path(&self, kind: &str) -> Vec<String> {
        self.user_string("searchpath", kind)
            .unwrap_or(".")
            .split(':')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Crop window in whole pixels: (xmin, xmax, ymin, ymax).
    #[must_use]
    pub fn crop_pixels(&self) -> (u32, u32, u32, u32) {
        let [cxmin, cxmax, cymin, cymax] = self.crop_window;
        let xres = self.x_resolution as f32;
        let yres = self.y_resolution as f32;
        let xmin = (cxmin * xres).ceil().clamp(0.0, xres) as u32;
        let xmax = (cxmax * xres).ceil().clamp(0.0, xres) as u32;
        let ymin = (cymin * yres).ceil().clamp(0.0, yres) as u32;
        let ymax = (cymax * yres).ceil().clamp(0.0, yres) as u32;
        (xmin, xmax.max(xmin), ymin, ymax.max(ymin))
    }

    /// True when motion blur is enabled by a non-degenerate shutter.
    #[must_use]
    pub fn shutter_open_interval(&self) -> bool {
        self.shutter_close > self.shutter_open
    }

    /// True when depth of field is active and non-degenerate. Degenerate
    /// camera parameters disable it; the interface warns when they are
    /// set.
    #[must_use]
    pub fn depth_of_field_active(&self) -> bool {
        self.f_stop.is_finite()
            && self.f_stop > 0.0
            && self.focal_length > 0.0
            && self.focal_distance > self.near_clip
    }

    /// Circle-of-confusion diameter in screen units for a point at
    /// camera depth `z`, evaluated at the sample centre's z:
    /// `fl² / f_stop · |fd − z| / (z · (fd − fl))`.
    #[must_use]
    pub fn circle_of_confusion(&self, z: f32) -> f32 {
        if !self.depth_of_field_active() || z.abs() <= f32::EPSILON {
            return 0.0;
        }
        let fl = self.focal_length;
        let fd = self.focal_distance;
        (fl * fl / self.f_stop) * ((fd - z).abs() / (z * (fd - fl).abs().max(f32::EPSILON)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mode_parsing() {
        assert_eq!(DisplayMode::from_mode_string("rgb"), DisplayMode::RGB);
        assert_eq!(
            DisplayMode::from_mode_string("rgba"),
            DisplayMode::RGB | DisplayMode::A
        );
        assert_eq!(DisplayMode::from_mode_string("z"), DisplayMode::Z);
        assert_eq!(DisplayMode::from_mode_string("rgbaz").channel_count(), 5);
    }

    #[test]
    fn bucket_size_default_and_override() {
        let mut opts = Options::default();
        assert_eq!(opts.bucket_size(), (16, 16));
        opts.set_user(
            "limits",
            &ParamList::new().with_ints("uniform integer[2] bucketsize", &[32, 8]),
        );
        assert_eq!(opts.bucket_size(), (32, 8));
    }

    #[test]
    fn searchpath_ampersand_expansion() {
        let mut opts = Options::default();
        opts.set_user(
            "searchpath",
            &ParamList::new().with_string("uniform string texture", "/maps"),
        );
        opts.set_user(
            "searchpath",
            &ParamList::new().with_string("uniform string texture", "&:/more"),
        );
        assert_eq!(opts.search_path("texture"), vec!["/maps", "/more"]);
    }

    #[test]
    fn crop_pixels_match_interface_convention() {
        let mut opts = Options::default();
        opts.x_resolution = 160;
        opts.y_resolution = 120;
        opts.crop_window = [0.5, 1.0, 0.0, 0.5];
        assert_eq!(opts.crop_pixels(), (80, 160, 0, 60));
    }

    #[test]
    fn screen_window_follows_aspect() {
        let mut opts = Options::default();
        opts.frame_aspect_ratio = 2.0;
        opts.fit_screen_window_to_aspect();
        assert_eq!(opts.screen_window, [-2.0, 2.0, -1.0, 1.0]);
        opts.frame_aspect_ratio = 0.5;
        opts.fit_screen_window_to_aspect();
        assert_eq!(opts.screen_window, [-1.0, 1.0, -2.0, 2.0]);
    }

    #[test]
    fn dof_requires_sane_camera() {
        let mut opts = Options::default();
        assert!(!opts.depth_of_field_active());
        opts.f_stop = 2.8;
        opts.focal_length = 0.05;
        opts.focal_distance = 2.0;
        opts.near_clip = 0.1;
        assert!(opts.depth_of_field_active());
        let coc_at_focus = opts.circle_of_confusion(2.0);
        assert!(coc_at_focus.abs() < 1e-6);
        assert!(opts.circle_of_confusion(1.0) > 0.0);
    }
}
