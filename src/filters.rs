//! Pixel Filter Functions
//!
//! The named reconstruction filters of the interface. Each has the
//! signature `f(x, y, xwidth, ywidth)` where (x, y) is the offset from the
//! filter centre and the widths are the full support. Callers resolve a
//! filter by its interface name; unknown names fail with `UnknownSymbol`.

use crate::errors::{RenderError, Result};

/// The shared filter signature.
pub type FilterFunc = fn(f32, f32, f32, f32) -> f32;

#[must_use]
pub fn box_filter(_x: f32, _y: f32, _xwidth: f32, _ywidth: f32) -> f32 {
    1.0
}

#[must_use]
pub fn triangle_filter(x: f32, y: f32, xwidth: f32, ywidth: f32) -> f32 {
    let hx = xwidth * 0.5;
    let hy = ywidth * 0.5;
    ((hx - x.abs()) / hx).max(0.0) * ((hy - y.abs()) / hy).max(0.0)
}

#[must_use]
pub fn gaussian_filter(x: f32, y: f32, xwidth: f32, ywidth: f32) -> f32 {
    let u = 2.0 * x / xwidth;
    let v = 2.0 * y / ywidth;
    (-2.0 * (u * u + v * v)).exp()
}

/// Radial Catmull-Rom over the filter support.
#[must_use]
pub fn catmull_rom_filter(x: f32, y: f32, xwidth: f32, ywidth: f32) -> f32 {
    let u = 2.0 * x / xwidth;
    let v = 2.0 * y / ywidth;
    let r = 2.0 * (u * u + v * v).sqrt();
    if r >= 2.0 {
        0.0
    } else if r < 1.0 {
        1.5 * r * r * r - 2.5 * r * r + 1.0
    } else {
        -0.5 * r * r * r + 2.5 * r * r - 4.0 * r + 2.0
    }
}

#[must_use]
pub fn sinc_filter(x: f32, y: f32, _xwidth: f32, _ywidth: f32) -> f32 {
    let fx = if x.abs() > 1e-6 { x.sin() / x } else { 1.0 };
    let fy = if y.abs() > 1e-6 { y.sin() / y } else { 1.0 };
    fx * fy
}

#[must_use]
pub fn disk_filter(x: f32, y: f32, xwidth: f32, ywidth: f32) -> f32 {
    let u = 2.0 * x / xwidth;
    let v = 2.0 * y / ywidth;
    if u * u + v * v <= 1.0 { 1.0 } else { 0.0 }
}

/// First-order Bessel function of the first kind, by the Abramowitz and
/// Stegun polynomial approximations.
fn bessel_j1(x: f32) -> f32 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let p1 = x
            * (72_362_614_232.0
                + y * (-7_895_059_235.0
                    + y * (242_396_853.1 + y * (-2_972_611.439 + y * (15_704.482_6 + y * -30.160_366_06)))));
        let p2 = 144_725_228_442.0
            + y * (2_300_535_178.0
                + y * (18_583_304.74 + y * (99_447.433_94 + y * (376.999_139_7 + y))));
        p1 / p2
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356_194_491;
        let p1 = 1.0 + y * (0.183_105e-2 + y * (-0.351_639_64e-4 + y * (0.245_752_017e-5 + y * -0.240_337_019e-6)));
        let p2 = 0.046_874_999_95
            + y * (-0.200_269_087_3e-3 + y * (0.691_112_979_1e-5 + y * (-0.764_217_128_7e-6 + y * 0.105_787_412e-6)));
        let ans = (0.636_619_772 / ax).sqrt() * (xx.cos() * p1 - z * xx.sin() * p2);
        if x < 0.0 { -ans } else { ans }
    }
}

#[must_use]
pub fn bessel_filter(x: f32, y: f32, xwidth: f32, ywidth: f32) -> f32 {
    let u = 2.0 * x / xwidth;
    let v = 2.0 * y / ywidth;
    let r = (u * u + v * v).sqrt();
    if r > 1.0 {
        return 0.0;
    }
    let t = r * std::f32::consts::PI * 2.0;
    if t < 1e-5 {
        1.0
    } else {
        2.0 * bessel_j1(t) / t
    }
}

/// Separable Mitchell-Netravali with B = C = 1/3.
#[must_use]
pub fn mitchell_filter(x: f32, y: f32, xwidth: f32, ywidth: f32) -> f32 {
    mitchell_1d(4.0 * x / xwidth) * mitchell_1d(4.0 * y / ywidth)
}

fn mitchell_1d(t: f32) -> f32 {
    const B: f32 = 1.0 / 3.0;
    const C: f32 = 1.0 / 3.0;
    let t = t.abs();
    if t >= 2.0 {
        0.0
    } else if t >= 1.0 {
        ((-B - 6.0 * C) * t * t * t
            + (6.0 * B + 30.0 * C) * t * t
            + (-12.0 * B - 48.0 * C) * t
            + (8.0 * B + 24.0 * C))
            / 6.0
    } else {
        ((12.0 - 9.0 * B - 6.0 * C) * t * t * t
            + (-18.0 + 12.0 * B + 6.0 * C) * t * t
            + (6.0 - 2.0 * B))
            / 6.0
    }
}

/// Resolves a filter function by its interface name.
pub fn by_name(name: &str) -> Result<FilterFunc> {
    match name {
        "box" => Ok(box_filter),
        "triangle" => Ok(triangle_filter),
        "gaussian" => Ok(gaussian_filter),
        "catmull-rom" => Ok(catmull_rom_filter),
        "sinc" => Ok(sinc_filter),
        "disk" => Ok(disk_filter),
        "bessel" => Ok(bessel_filter),
        "mitchell" => Ok(mitchell_filter),
        other => Err(RenderError::UnknownSymbol(format!(
            "pixel filter \"{other}\""
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_names_resolve() {
        for name in [
            "box",
            "triangle",
            "gaussian",
            "catmull-rom",
            "sinc",
            "disk",
            "bessel",
            "mitchell",
        ] {
            assert!(by_name(name).is_ok(), "{name} should resolve");
        }
        assert!(by_name("blur").is_err());
    }

    #[test]
    fn filters_peak_at_centre() {
        for f in [
            triangle_filter,
            gaussian_filter,
            catmull_rom_filter,
            mitchell_filter,
            bessel_filter,
        ] {
            let centre = f(0.0, 0.0, 2.0, 2.0);
            let edge = f(0.99, 0.0, 2.0, 2.0);
            assert!(centre > edge, "centre {centre} should exceed edge {edge}");
        }
    }

    #[test]
    fn disk_cuts_off_at_radius() {
        assert_eq!(disk_filter(0.4, 0.0, 1.0, 1.0), 1.0);
        assert_eq!(disk_filter(0.6, 0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn triangle_vanishes_at_support_edge() {
        assert!(triangle_filter(1.0, 0.0, 2.0, 2.0).abs() < 1e-6);
    }
}
