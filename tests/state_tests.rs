//! Graphics State Tests
//!
//! Tests for:
//! - Begin/End scope nesting rules
//! - Attribute save/restore across attribute blocks
//! - Transform save/restore and motion-sampled transforms
//! - Named coordinate systems through the interface
//! - Declaration round trips through declare()

use glam::{Mat4, Vec3};

use reyes::{Color, ErrorKind, Renderer, TokenData};

const EPSILON: f32 = 1e-5;

fn approx_mat(a: Mat4, b: Mat4) -> bool {
    a.to_cols_array()
        .iter()
        .zip(b.to_cols_array().iter())
        .all(|(x, y)| (x - y).abs() < EPSILON)
}

fn world_renderer() -> Renderer {
    let mut r = Renderer::new();
    r.begin("state-test").unwrap();
    r.world_begin().unwrap();
    r
}

// ============================================================================
// Nesting
// ============================================================================

#[test]
fn calls_outside_begin_are_invalid_nesting() {
    let mut r = Renderer::new();
    let err = r.world_begin().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidNesting);
}

#[test]
fn frame_must_nest_inside_main() {
    let mut r = Renderer::new();
    r.begin("t").unwrap();
    r.frame_begin(1).unwrap();
    // Frame inside frame is rejected.
    assert_eq!(
        r.frame_begin(2).unwrap_err().kind(),
        ErrorKind::InvalidNesting
    );
    r.frame_end().unwrap();
    r.end().unwrap();
}

#[test]
fn mismatched_end_is_fatal_nesting() {
    let mut r = world_renderer();
    r.attribute_begin().unwrap();
    assert_eq!(
        r.transform_end().unwrap_err().kind(),
        ErrorKind::InvalidNesting
    );
}

#[test]
fn options_frozen_after_world_begin() {
    let mut r = world_renderer();
    assert_eq!(
        r.format(320, 240, 1.0).unwrap_err().kind(),
        ErrorKind::InvalidNesting
    );
}

#[test]
fn frame_end_restores_options() {
    let mut r = Renderer::new();
    r.begin("t").unwrap();
    r.format(640, 480, 1.0).unwrap();
    r.frame_begin(1).unwrap();
    r.format(160, 120, 1.0).unwrap();
    assert_eq!(r.options().x_resolution, 160);
    r.frame_end().unwrap();
    assert_eq!(r.options().x_resolution, 640);
    r.end().unwrap();
}

// ============================================================================
// Attribute stack
// ============================================================================

#[test]
fn attribute_block_restores_state() {
    let mut r = world_renderer();
    r.color(Color::new(0.2, 0.4, 0.6)).unwrap();
    let saved = std::sync::Arc::clone(r.current_attributes().unwrap());
    r.attribute_begin().unwrap();
    r.color(Color::new(1.0, 0.0, 0.0)).unwrap();
    r.shading_rate(4.0).unwrap();
    r.matte(true).unwrap();
    r.attribute_end().unwrap();
    // Inner changes never leak outward; the reference is the one saved
    // at the matching attribute begin.
    let restored = r.current_attributes().unwrap();
    assert!(std::sync::Arc::ptr_eq(restored, &saved));
    assert_eq!(restored.shading.color, Color::new(0.2, 0.4, 0.6));
    assert!(!restored.shading.matte);
}

#[test]
fn transform_block_restores_matrix() {
    let mut r = world_renderer();
    let saved = r.current_transform_matrix(0.0).unwrap();
    r.transform_begin().unwrap();
    r.translate(Vec3::new(5.0, 0.0, 0.0)).unwrap();
    r.transform_end().unwrap();
    assert!(approx_mat(r.current_transform_matrix(0.0).unwrap(), saved));
}

#[test]
fn nested_attribute_blocks_stack() {
    let mut r = world_renderer();
    for _ in 0..8 {
        r.attribute_begin().unwrap();
        r.shading_rate(0.5).unwrap();
    }
    for _ in 0..8 {
        r.attribute_end().unwrap();
    }
    assert_eq!(
        r.attribute_end().unwrap_err().kind(),
        ErrorKind::InvalidNesting
    );
}

// ============================================================================
// Transforms and motion
// ============================================================================

#[test]
fn concat_and_identity() {
    let mut r = world_renderer();
    r.translate(Vec3::new(1.0, 2.0, 3.0)).unwrap();
    r.scale(Vec3::splat(2.0)).unwrap();
    r.coordinate_system("stacked").unwrap();
    let mut p = [Vec3::ONE];
    r.transform_points("stacked", "world", &mut p).unwrap();
    // Scale applies in the inner (object) frame, then the translation.
    assert!((p[0] - Vec3::new(3.0, 4.0, 5.0)).length() < EPSILON);

    r.identity().unwrap();
    r.coordinate_system("reset").unwrap();
    let mut q = [Vec3::ONE];
    r.transform_points("reset", "world", &mut q).unwrap();
    assert!((q[0] - Vec3::ONE).length() < EPSILON);
}

#[test]
fn motion_block_samples_transform_keys() {
    let mut r = world_renderer();
    r.motion_begin(&[0.0, 1.0]).unwrap();
    r.translate(Vec3::ZERO).unwrap();
    r.translate(Vec3::new(10.0, 0.0, 0.0)).unwrap();
    r.motion_end().unwrap();
    // Register the now motion-sampled transform; key 0 is identity.
    r.coordinate_system("moving").unwrap();
    let mut p = [Vec3::ZERO];
    r.transform_points("moving", "world", &mut p).unwrap();
    assert!(p[0].length() < EPSILON);
}

#[test]
fn motion_block_rejects_extra_calls() {
    let mut r = world_renderer();
    r.motion_begin(&[0.0, 1.0]).unwrap();
    r.translate(Vec3::ZERO).unwrap();
    r.translate(Vec3::X).unwrap();
    assert!(r.translate(Vec3::Y).is_err());
    r.motion_end().unwrap();
}

#[test]
fn rotate_matches_axis_angle() {
    let mut r = world_renderer();
    r.rotate(90.0, Vec3::Z).unwrap();
    r.coordinate_system("quarter").unwrap();
    let mut p = [Vec3::X];
    r.transform_points("quarter", "world", &mut p).unwrap();
    assert!((p[0] - Vec3::Y).length() < 1e-4);
}

// ============================================================================
// Coordinate systems
// ============================================================================

#[test]
fn builtin_spaces_resolve_after_world_begin() {
    let r = world_renderer();
    let mut p = [Vec3::new(0.25, 0.25, 1.0)];
    // A world point round-trips through camera space.
    r.transform_points("world", "camera", &mut p).unwrap();
    r.transform_points("camera", "world", &mut p).unwrap();
    assert!((p[0] - Vec3::new(0.25, 0.25, 1.0)).length() < 1e-4);
}

#[test]
fn builtin_names_cannot_be_redefined() {
    let mut r = world_renderer();
    assert!(r.coordinate_system("camera").is_err());
}

#[test]
fn coord_sys_transform_replaces_ctm() {
    let mut r = world_renderer();
    r.translate(Vec3::new(7.0, 0.0, 0.0)).unwrap();
    r.coordinate_system("lamp").unwrap();
    r.identity().unwrap();
    r.coord_sys_transform("lamp").unwrap();
    r.coordinate_system("lamp2").unwrap();
    let mut p = [Vec3::ZERO];
    r.transform_points("lamp2", "world", &mut p).unwrap();
    assert!((p[0].x - 7.0).abs() < EPSILON);
}

// ============================================================================
// Declarations
// ============================================================================

#[test]
fn declared_tokens_resolve_in_parameter_lists() {
    let mut r = Renderer::new();
    r.begin("decl").unwrap();
    let canonical = r.declare("temperature", "varying float").unwrap();
    assert_eq!(canonical, "varying float temperature");
    let params = r
        .build_params(&[("temperature", TokenData::Floats(&[1.0, 2.0]))])
        .unwrap();
    assert_eq!(params.floats("temperature").unwrap(), &[1.0, 2.0]);
    r.end().unwrap();
}

#[test]
fn inline_declarations_parse_on_the_fly() {
    let r = Renderer::new();
    let params = r
        .build_params(&[("constant color tint", TokenData::Floats(&[1.0, 0.5, 0.0]))])
        .unwrap();
    assert_eq!(params.color("tint").unwrap(), Color::new(1.0, 0.5, 0.0));
}

#[test]
fn undeclared_tokens_reject() {
    let r = Renderer::new();
    let err = r
        .build_params(&[("mystery", TokenData::Floats(&[1.0]))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadToken);
}
