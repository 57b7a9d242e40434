//! RGB Color
//!
//! A three-channel float color with full operator algebra and conversions
//! to and from HSV, HSL and CIE XYZ. Opacity is represented with the same
//! type, one coverage value per channel.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// An RGB triple. Channel values are nominally in `[0, 1]` but are not
/// clamped by arithmetic; clamping happens at quantisation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);

    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Arithmetic mean of the channels.
    #[must_use]
    pub fn average(self) -> f32 {
        (self.r + self.g + self.b) / 3.0
    }

    #[must_use]
    pub fn min_channel(self) -> f32 {
        self.r.min(self.g).min(self.b)
    }

    #[must_use]
    pub fn max_channel(self) -> f32 {
        self.r.max(self.g).max(self.b)
    }

    #[must_use]
    pub fn clamp(self, lo: f32, hi: f32) -> Self {
        Self::new(
            self.r.clamp(lo, hi),
            self.g.clamp(lo, hi),
            self.b.clamp(lo, hi),
        )
    }

    #[must_use]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }

    /// Per-channel power, used by exposure.
    #[must_use]
    pub fn powf(self, e: f32) -> Self {
        Self::new(self.r.powf(e), self.g.powf(e), self.b.powf(e))
    }

    /// True when any channel reaches `threshold`. Used by the depth-filter
    /// opacity gate.
    #[must_use]
    pub fn any_channel_reaches(self, threshold: Self) -> bool {
        self.r >= threshold.r || self.g >= threshold.g || self.b >= threshold.b
    }

    // ------------------------------------------------------------------
    // Color space conversions
    // ------------------------------------------------------------------

    /// Builds a color from hue (degrees), saturation and value.
    #[must_use]
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        if s <= 0.0 {
            return Self::splat(v);
        }
        let h = (h.rem_euclid(360.0)) / 60.0;
        let i = h.floor();
        let f = h - i;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        match i as i32 {
            0 => Self::new(v, t, p),
            1 => Self::new(q, v, p),
            2 => Self::new(p, v, t),
            3 => Self::new(p, q, v),
            4 => Self::new(t, p, v),
            _ => Self::new(v, p, q),
        }
    }

    /// Returns (hue degrees, saturation, value).
    #[must_use]
    pub fn to_hsv(self) -> (f32, f32, f32) {
        let max = self.max_channel();
        let min = self.min_channel();
        let delta = max - min;
        let v = max;
        let s = if max > 0.0 { delta / max } else { 0.0 };
        if delta <= 0.0 {
            return (0.0, 0.0, v);
        }
        let h = if self.r >= max {
            (self.g - self.b) / delta
        } else if self.g >= max {
            2.0 + (self.b - self.r) / delta
        } else {
            4.0 + (self.r - self.g) / delta
        };
        ((h * 60.0).rem_euclid(360.0), s, v)
    }

    /// Builds a color from hue (degrees), saturation and lightness.
    #[must_use]
    pub fn from_hsl(h: f32, s: f32, l: f32) -> Self {
        if s <= 0.0 {
            return Self::splat(l);
        }
        let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let h = h.rem_euclid(360.0) / 60.0;
        let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
        let (r, g, b) = match h as i32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = l - c * 0.5;
        Self::new(r + m, g + m, b + m)
    }

    /// Returns (hue degrees, saturation, lightness).
    #[must_use]
    pub fn to_hsl(self) -> (f32, f32, f32) {
        let max = self.max_channel();
        let min = self.min_channel();
        let l = (max + min) * 0.5;
        let delta = max - min;
        if delta <= 0.0 {
            return (0.0, 0.0, l);
        }
        let s = delta / (1.0 - (2.0 * l - 1.0).abs());
        let (h, _, _) = self.to_hsv();
        (h, s, l)
    }

    /// Converts linear RGB to CIE XYZ (D65 primaries).
    #[must_use]
    pub fn to_xyz(self) -> (f32, f32, f32) {
        (
            0.412_453 * self.r + 0.357_580 * self.g + 0.180_423 * self.b,
            0.212_671 * self.r + 0.715_160 * self.g + 0.072_169 * self.b,
            0.019_334 * self.r + 0.119_193 * self.g + 0.950_227 * self.b,
        )
    }

    /// Converts CIE XYZ (D65 primaries) to linear RGB.
    #[must_use]
    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        Self::new(
            3.240_479 * x - 1.537_150 * y - 0.498_535 * z,
            -0.969_256 * x + 1.875_992 * y + 0.041_556 * z,
            0.055_648 * x - 0.204_043 * y + 1.057_311 * z,
        )
    }
}

impl Add for Color {
    type Output = Self;
    fn add(self, o: Self) -> Self {
        Self::new(self.r + o.r, self.g + o.g, self.b + o.b)
    }
}

impl AddAssign for Color {
    fn add_assign(&mut self, o: Self) {
        *self = *self + o;
    }
}

impl Sub for Color {
    type Output = Self;
    fn sub(self, o: Self) -> Self {
        Self::new(self.r - o.r, self.g - o.g, self.b - o.b)
    }
}

impl SubAssign for Color {
    fn sub_assign(&mut self, o: Self) {
        *self = *self - o;
    }
}

impl Mul for Color {
    type Output = Self;
    fn mul(self, o: Self) -> Self {
        Self::new(self.r * o.r, self.g * o.g, self.b * o.b)
    }
}

impl Mul<f32> for Color {
    type Output = Self;
    fn mul(self, s: f32) -> Self {
        Self::new(self.r * s, self.g * s, self.b * s)
    }
}

impl MulAssign<f32> for Color {
    fn mul_assign(&mut self, s: f32) {
        *self = *self * s;
    }
}

impl Div<f32> for Color {
    type Output = Self;
    fn div(self, s: f32) -> Self {
        Self::new(self.r / s, self.g / s, self.b / s)
    }
}

impl DivAssign<f32> for Color {
    fn div_assign(&mut self, s: f32) {
        *self = *self / s;
    }
}

impl Neg for Color {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.r, -self.g, -self.b)
    }
}

impl From<[f32; 3]> for Color {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Color> for [f32; 3] {
    fn from(c: Color) -> Self {
        [c.r, c.g, c.b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn hsv_round_trip() {
        let c = Color::new(0.2, 0.6, 0.4);
        let (h, s, v) = c.to_hsv();
        let back = Color::from_hsv(h, s, v);
        assert!(approx(c.r, back.r) && approx(c.g, back.g) && approx(c.b, back.b));
    }

    #[test]
    fn hsl_round_trip() {
        let c = Color::new(0.8, 0.1, 0.3);
        let (h, s, l) = c.to_hsl();
        let back = Color::from_hsl(h, s, l);
        assert!(approx(c.r, back.r) && approx(c.g, back.g) && approx(c.b, back.b));
    }

    #[test]
    fn xyz_round_trip() {
        let c = Color::new(0.25, 0.5, 0.75);
        let (x, y, z) = c.to_xyz();
        let back = Color::from_xyz(x, y, z);
        assert!(approx(c.r, back.r) && approx(c.g, back.g) && approx(c.b, back.b));
    }

    #[test]
    fn white_is_full_value() {
        let (_, s, v) = Color::WHITE.to_hsv();
        assert!(approx(s, 0.0) && approx(v, 1.0));
    }

    #[test]
    fn opacity_threshold_gate() {
        let threshold = Color::splat(0.9);
        assert!(Color::new(0.95, 0.0, 0.0).any_channel_reaches(threshold));
        assert!(!Color::splat(0.5).any_channel_reaches(threshold));
    }
}
