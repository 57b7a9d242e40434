//! Shading Pipeline Tests
//!
//! Full renders of shaded quadrics:
//! - Quadric coverage through dice/sample
//! - Matte surface under a distant light shades by incidence
//! - Ambient light gives flat shading
//! - Atmosphere (depthcue) fades with depth

use parking_lot::Mutex;
use std::sync::Arc;

use reyes::display::{CaptureDriver, CapturedFrame};
use reyes::{Color, ParamList, Renderer, TokenData};

struct FrameView {
    frame: Arc<Mutex<CapturedFrame>>,
}

impl FrameView {
    fn channel(&self, x: u32, y: u32, c: usize) -> f32 {
        let frame = self.frame.lock();
        let idx = ((y * frame.width + x) as usize) * frame.channels + c;
        frame.data[idx]
    }
}

/// Orthographic camera with 2 pixels per unit on a 64x64 frame.
fn render(build: impl FnOnce(&mut Renderer)) -> FrameView {
    let mut r = Renderer::new();
    r.begin("shading-test").unwrap();
    r.set_worker_count(2);
    let (driver, frame) = CaptureDriver::new();
    r.set_display_driver(Box::new(driver));
    r.format(64, 64, 1.0).unwrap();
    r.projection("orthographic", &ParamList::new()).unwrap();
    r.screen_window(-16.0, 16.0, 16.0, -16.0).unwrap();
    r.clipping(0.1, 100.0).unwrap();
    r.display("out", "file", "rgba", &ParamList::new()).unwrap();
    r.quantize("rgba", 255, 0, 255, 0.0).unwrap();
    r.world_begin().unwrap();
    build(&mut r);
    r.world_end().unwrap();
    r.end().unwrap();
    FrameView { frame }
}

#[test]
fn sphere_covers_its_projected_circle() {
    let view = render(|r| {
        r.translate(glam::Vec3::new(0.0, 0.0, 20.0)).unwrap();
        r.sphere(8.0, -8.0, 8.0, 360.0).unwrap();
    });
    // Radius 8 units = 16 pixels around the frame centre.
    assert!(view.channel(32, 32, 3) > 0.9, "centre covered");
    assert!(view.channel(32 + 10, 32, 3) > 0.9, "inside the circle");
    assert!(view.channel(62, 2, 3) < 0.05, "corner uncovered");
}

#[test]
fn torus_leaves_hole() {
    let view = render(|r| {
        r.translate(glam::Vec3::new(0.0, 0.0, 5.0)).unwrap();
        r.torus(10.0, 3.0, 0.0, 360.0, 360.0).unwrap();
    });
    // The ring covers radius 7..13 units; the centre stays open.
    assert!(view.channel(32, 32, 3) < 0.05, "hole at the centre");
    assert!(view.channel(32 + 20, 32, 3) > 0.9, "ring covered");
}

#[test]
fn matte_shades_by_light_incidence() {
    let view = render(|r| {
        let light_params = r
            .build_params(&[
                ("intensity", TokenData::Floats(&[1.0])),
                ("from", TokenData::Floats(&[0.0, 0.0, 0.0])),
                ("to", TokenData::Floats(&[0.0, 0.0, 1.0])),
            ])
            .unwrap();
        r.light_source("distantlight", &light_params).unwrap();
        let surf_params = r
            .build_params(&[
                ("Ka", TokenData::Floats(&[0.0])),
                ("Kd", TokenData::Floats(&[1.0])),
            ])
            .unwrap();
        r.surface("matte", &surf_params).unwrap();
        r.translate(glam::Vec3::new(0.0, 0.0, 20.0)).unwrap();
        r.sphere(10.0, -10.0, 10.0, 360.0).unwrap();
    });
    let centre = view.channel(32, 32, 0);
    let edge = view.channel(32 + 18, 32, 0);
    assert!(centre > 0.7, "head-on lambert term {centre}");
    assert!(edge < centre - 0.3, "grazing edge {edge} vs centre {centre}");
}

#[test]
fn ambient_light_is_flat() {
    let view = render(|r| {
        let light_params = r
            .build_params(&[
                ("intensity", TokenData::Floats(&[0.5])),
                ("lightcolor", TokenData::Floats(&[1.0, 1.0, 1.0])),
            ])
            .unwrap();
        r.light_source("ambientlight", &light_params).unwrap();
        let surf_params = r
            .build_params(&[
                ("Ka", TokenData::Floats(&[1.0])),
                ("Kd", TokenData::Floats(&[0.0])),
            ])
            .unwrap();
        r.surface("matte", &surf_params).unwrap();
        r.translate(glam::Vec3::new(0.0, 0.0, 20.0)).unwrap();
        r.sphere(10.0, -10.0, 10.0, 360.0).unwrap();
    });
    let centre = view.channel(32, 32, 0);
    let off_centre = view.channel(32 + 12, 32 - 8, 0);
    assert!((centre - 0.5).abs() < 0.05, "ambient level {centre}");
    assert!((centre - off_centre).abs() < 0.05, "flat across the surface");
}

#[test]
fn illuminate_switches_lights_off() {
    let view = render(|r| {
        let light_params = r
            .build_params(&[("intensity", TokenData::Floats(&[0.5]))])
            .unwrap();
        let handle = r.light_source("ambientlight", &light_params).unwrap();
        r.illuminate(handle, false).unwrap();
        let surf_params = ParamList::new();
        r.surface("matte", &surf_params).unwrap();
        r.translate(glam::Vec3::new(0.0, 0.0, 20.0)).unwrap();
        r.sphere(10.0, -10.0, 10.0, 360.0).unwrap();
    });
    // Covered but unlit.
    assert!(view.channel(32, 32, 3) > 0.9);
    assert!(view.channel(32, 32, 0) < 0.01);
}

#[test]
fn depthcue_fades_toward_background() {
    let view = render(|r| {
        let fog_params = r
            .build_params(&[
                ("mindistance", TokenData::Floats(&[0.0])),
                ("maxdistance", TokenData::Floats(&[10.0])),
                ("background", TokenData::Floats(&[0.0, 0.0, 0.0])),
            ])
            .unwrap();
        r.atmosphere("depthcue", &fog_params).unwrap();
        r.color(Color::new(1.0, 1.0, 1.0)).unwrap();
        r.surface("constant", &ParamList::new()).unwrap();
        // Two quads at different depths.
        let near = r
            .build_params(&[(
                "P",
                TokenData::Floats(&[
                    -16.0, -16.0, 2.0, //
                    0.0, -16.0, 2.0, //
                    0.0, 16.0, 2.0, //
                    -16.0, 16.0, 2.0,
                ]),
            )])
            .unwrap();
        r.polygon(&near).unwrap();
        let far = r
            .build_params(&[(
                "P",
                TokenData::Floats(&[
                    0.0, -16.0, 8.0, //
                    16.0, -16.0, 8.0, //
                    16.0, 16.0, 8.0, //
                    0.0, 16.0, 8.0,
                ]),
            )])
            .unwrap();
        r.polygon(&far).unwrap();
    });
    let near_side = view.channel(16, 32, 0);
    let far_side = view.channel(48, 32, 0);
    assert!(near_side > far_side + 0.3, "depth cue: {near_side} vs {far_side}");
}
