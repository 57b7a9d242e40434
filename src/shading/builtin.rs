//! Built-in Shaders
//!
//! The standard surface, light, volume and displacement shaders. These
//! are the factory's products when a scene names them; an external shader
//! VM may register replacements through [`ShaderRegistry::register`].

use std::sync::Arc;

use glam::Vec3;

use crate::errors::Result;
use crate::math::{Color, transform_point};
use crate::texture::ShadowSampleParams;

use super::{EvalContext, Shader, ShaderEnv, ShaderRegistry};

pub(super) fn register_all(registry: &ShaderRegistry) {
    registry.register(Arc::new(ConstantSurface));
    registry.register(Arc::new(MatteSurface));
    registry.register(Arc::new(MetalSurface));
    registry.register(Arc::new(PlasticSurface));
    registry.register(Arc::new(PaintedPlastic));
    registry.register(Arc::new(ShinyMetal));
    registry.register(Arc::new(AmbientLight));
    registry.register(Arc::new(DistantLight));
    registry.register(Arc::new(PointLight));
    registry.register(Arc::new(SpotLight));
    registry.register(Arc::new(DepthCue));
    registry.register(Arc::new(Fog));
    registry.register(Arc::new(Displacement));
    registry.register(Arc::new(Background));
}

/// Shading normal faced toward the viewer.
fn faceforward(n: Vec3, i: Vec3) -> Vec3 {
    if n.dot(i) > 0.0 { -n } else { n }
}

/// Sum of ambient light contributions at vertex `idx`.
fn ambient(env: &ShaderEnv, idx: usize) -> Color {
    env.lights
        .iter()
        .filter(|l| l.ambient)
        .fold(Color::BLACK, |acc, l| acc + l.cl[idx])
}

/// Lambert accumulation over non-ambient lights.
fn diffuse(env: &ShaderEnv, idx: usize, nf: Vec3) -> Color {
    env.lights
        .iter()
        .filter(|l| !l.ambient)
        .fold(Color::BLACK, |acc, light| {
            let ndotl = nf.dot(light.l[idx]).max(0.0);
            acc + light.cl[idx] * ndotl
        })
}

/// Blinn specular accumulation over non-ambient lights.
fn specular(env: &ShaderEnv, idx: usize, nf: Vec3, roughness: f32) -> Color {
    let view = -env.i[idx].normalize_or_zero();
    let exponent = 1.0 / roughness.max(1e-4);
    env.lights
        .iter()
        .filter(|l| !l.ambient)
        .fold(Color::BLACK, |acc, light| {
            let h = (light.l[idx] + view).normalize_or_zero();
            let ndoth = nf.dot(h).max(0.0);
            acc + light.cl[idx] * ndoth.powf(exponent)
        })
}

// ----------------------------------------------------------------------
// Surfaces
// ----------------------------------------------------------------------

struct ConstantSurface;

impl Shader for ConstantSurface {
    fn name(&self) -> &str {
        "constant"
    }

    fn evaluate(&self, env: &mut ShaderEnv, _ctx: &mut EvalContext<'_>) -> Result<()> {
        for idx in 0..env.len() {
            env.oi[idx] = env.os[idx];
            env.ci[idx] = env.cs[idx] * env.os[idx];
        }
        Ok(())
    }
}

struct MatteSurface;

impl Shader for MatteSurface {
    fn name(&self) -> &str {
        "matte"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let ka = ctx.params.float("Ka").unwrap_or(1.0);
        let kd = ctx.params.float("Kd").unwrap_or(1.0);
        for idx in 0..env.len() {
            if env.culled[idx] {
                continue;
            }
            let nf = faceforward(env.n[idx].normalize_or_zero(), env.i[idx]);
            let light = ambient(env, idx) * ka + diffuse(env, idx, nf) * kd;
            env.oi[idx] = env.os[idx];
            env.ci[idx] = env.cs[idx] * light * env.os[idx];
        }
        Ok(())
    }
}

struct MetalSurface;

impl Shader for MetalSurface {
    fn name(&self) -> &str {
        "metal"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let ka = ctx.params.float("Ka").unwrap_or(1.0);
        let ks = ctx.params.float("Ks").unwrap_or(1.0);
        let roughness = ctx.params.float("roughness").unwrap_or(0.1);
        for idx in 0..env.len() {
            if env.culled[idx] {
                continue;
            }
            let nf = faceforward(env.n[idx].normalize_or_zero(), env.i[idx]);
            let light = ambient(env, idx) * ka + specular(env, idx, nf, roughness) * ks;
            env.oi[idx] = env.os[idx];
            env.ci[idx] = env.cs[idx] * light * env.os[idx];
        }
        Ok(())
    }
}

struct PlasticSurface;

impl Shader for PlasticSurface {
    fn name(&self) -> &str {
        "plastic"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let ka = ctx.params.float("Ka").unwrap_or(1.0);
        let kd = ctx.params.float("Kd").unwrap_or(0.5);
        let ks = ctx.params.float("Ks").unwrap_or(0.5);
        let roughness = ctx.params.float("roughness").unwrap_or(0.1);
        let spec_color = ctx.params.color("specularcolor").unwrap_or(Color::WHITE);
        for idx in 0..env.len() {
            if env.culled[idx] {
                continue;
            }
            let nf = faceforward(env.n[idx].normalize_or_zero(), env.i[idx]);
            let body = env.cs[idx] * (ambient(env, idx) * ka + diffuse(env, idx, nf) * kd);
            let sheen = spec_color * specular(env, idx, nf, roughness) * ks;
            env.oi[idx] = env.os[idx];
            env.ci[idx] = (body + sheen) * env.os[idx];
        }
        Ok(())
    }
}

struct PaintedPlastic;

impl Shader for PaintedPlastic {
    fn name(&self) -> &str {
        "paintedplastic"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let ka = ctx.params.float("Ka").unwrap_or(1.0);
        let kd = ctx.params.float("Kd").unwrap_or(0.5);
        let ks = ctx.params.float("Ks").unwrap_or(0.5);
        let roughness = ctx.params.float("roughness").unwrap_or(0.1);
        let spec_color = ctx.params.color("specularcolor").unwrap_or(Color::WHITE);
        let texture_name = ctx.params.string("texturename").unwrap_or("").to_string();
        // A missing map paints with the surface color alone.
        let map = if texture_name.is_empty() {
            None
        } else {
            ctx.textures.texture(&texture_name).ok()
        };
        // Footprint from the grid's parametric spacing.
        let swidth = 1.0 / env.u_dim.max(1) as f32;
        let twidth = 1.0 / env.v_dim.max(1) as f32;
        for idx in 0..env.len() {
            if env.culled[idx] {
                continue;
            }
            let paint = match &map {
                Some(map) => {
                    env.cs[idx]
                        * map.sample(
                            &ctx.textures.cache,
                            env.s[idx],
                            env.t[idx],
                            swidth,
                            twidth,
                            0.0,
                            0.0,
                        )?
                }
                None => env.cs[idx],
            };
            let nf = faceforward(env.n[idx].normalize_or_zero(), env.i[idx]);
            let body = paint * (ambient(env, idx) * ka + diffuse(env, idx, nf) * kd);
            let sheen = spec_color * specular(env, idx, nf, roughness) * ks;
            env.oi[idx] = env.os[idx];
            env.ci[idx] = (body + sheen) * env.os[idx];
        }
        Ok(())
    }
}

struct ShinyMetal;

impl Shader for ShinyMetal {
    fn name(&self) -> &str {
        "shinymetal"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let ka = ctx.params.float("Ka").unwrap_or(1.0);
        let ks = ctx.params.float("Ks").unwrap_or(1.0);
        let kr = ctx.params.float("Kr").unwrap_or(1.0);
        let roughness = ctx.params.float("roughness").unwrap_or(0.1);
        let texture_name = ctx.params.string("texturename").unwrap_or("").to_string();
        let map = if texture_name.is_empty() {
            None
        } else {
            ctx.textures.environment(&texture_name).ok()
        };
        for idx in 0..env.len() {
            if env.culled[idx] {
                continue;
            }
            let nf = faceforward(env.n[idx].normalize_or_zero(), env.i[idx]);
            let i = env.i[idx].normalize_or_zero();
            let mut light = ambient(env, idx) * ka + specular(env, idx, nf, roughness) * ks;
            if let Some(map) = &map {
                // Reflection lookup in world space.
                let r = i - nf * (2.0 * i.dot(nf));
                let world_r = (ctx.camera_to_world * r.extend(0.0)).truncate();
                let reflected = map.sample(
                    &ctx.textures.cache,
                    world_r,
                    Vec3::ZERO,
                    Vec3::ZERO,
                    0.0,
                    0.0,
                )?;
                light += reflected * kr;
            }
            env.oi[idx] = env.os[idx];
            env.ci[idx] = env.cs[idx] * light * env.os[idx];
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Lights
// ----------------------------------------------------------------------

struct AmbientLight;

impl Shader for AmbientLight {
    fn name(&self) -> &str {
        "ambientlight"
    }

    fn is_ambient(&self) -> bool {
        true
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let intensity = ctx.params.float("intensity").unwrap_or(1.0);
        let color = ctx.params.color("lightcolor").unwrap_or(Color::WHITE);
        let cl = color * intensity;
        for idx in 0..env.len() {
            env.l[idx] = Vec3::ZERO;
            env.cl[idx] = cl;
        }
        Ok(())
    }
}

struct DistantLight;

impl Shader for DistantLight {
    fn name(&self) -> &str {
        "distantlight"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let intensity = ctx.params.float("intensity").unwrap_or(1.0);
        let color = ctx.params.color("lightcolor").unwrap_or(Color::WHITE);
        let from = ctx
            .params
            .points("from")
            .and_then(|p| p.first().copied())
            .unwrap_or(Vec3::ZERO);
        let to = ctx
            .params
            .points("to")
            .and_then(|p| p.first().copied())
            .unwrap_or(Vec3::Z);
        let shader_to_camera = ctx.world_to_camera * ctx.shader_to_world;
        let dir = (transform_point(&shader_to_camera, to) - transform_point(&shader_to_camera, from))
            .normalize_or_zero();
        let cl = color * intensity;
        for idx in 0..env.len() {
            // Surface-to-light direction opposes the beam.
            env.l[idx] = -dir;
            env.cl[idx] = cl;
        }
        Ok(())
    }
}

struct PointLight;

impl Shader for PointLight {
    fn name(&self) -> &str {
        "pointlight"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let intensity = ctx.params.float("intensity").unwrap_or(1.0);
        let color = ctx.params.color("lightcolor").unwrap_or(Color::WHITE);
        let from = ctx
            .params
            .points("from")
            .and_then(|p| p.first().copied())
            .unwrap_or(Vec3::ZERO);
        let shader_to_camera = ctx.world_to_camera * ctx.shader_to_world;
        let position = transform_point(&shader_to_camera, from);
        for idx in 0..env.len() {
            let offset = position - env.p[idx];
            let dist_sq = offset.length_squared().max(1e-6);
            env.l[idx] = offset / dist_sq.sqrt();
            env.cl[idx] = color * (intensity / dist_sq);
        }
        Ok(())
    }
}

struct SpotLight;

impl Shader for SpotLight {
    fn name(&self) -> &str {
        "spotlight"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let intensity = ctx.params.float("intensity").unwrap_or(1.0);
        let color = ctx.params.color("lightcolor").unwrap_or(Color::WHITE);
        let from = ctx
            .params
            .points("from")
            .and_then(|p| p.first().copied())
            .unwrap_or(Vec3::ZERO);
        let to = ctx
            .params
            .points("to")
            .and_then(|p| p.first().copied())
            .unwrap_or(Vec3::Z);
        let cone_angle = ctx.params.float("coneangle").unwrap_or(0.523_599);
        let cone_delta = ctx.params.float("conedeltaangle").unwrap_or(0.087_266);
        let beam = ctx.params.float("beamdistribution").unwrap_or(2.0);
        let shadow_name = ctx.params.string("shadowname").unwrap_or("").to_string();

        let shader_to_camera = ctx.world_to_camera * ctx.shader_to_world;
        let position = transform_point(&shader_to_camera, from);
        let axis = (transform_point(&shader_to_camera, to) - position).normalize_or_zero();
        let cos_outer = cone_angle.cos();
        let cos_inner = (cone_angle - cone_delta).cos();

        let shadow_map = if shadow_name.is_empty() {
            None
        } else {
            // A missing map falls back to unshadowed.
            ctx.textures.shadow(&shadow_name).ok()
        };
        let shadow_params = ShadowSampleParams {
            sblur: ctx.params.float("blur").unwrap_or(0.0),
            tblur: ctx.params.float("blur").unwrap_or(0.0),
            bias: ctx.params.float("bias").unwrap_or(0.225),
            bias0: ctx.params.float("bias0").unwrap_or(0.0),
            bias1: ctx.params.float("bias1").unwrap_or(0.0),
            samples: ctx.params.float("samples").unwrap_or(16.0),
        };

        for idx in 0..env.len() {
            let offset = position - env.p[idx];
            let dist_sq = offset.length_squared().max(1e-6);
            let l = offset / dist_sq.sqrt();
            let cos_beam = (-l).dot(axis);
            if cos_beam <= cos_outer {
                env.l[idx] = l;
                env.cl[idx] = Color::BLACK;
                continue;
            }
            let cone = if cos_beam >= cos_inner {
                1.0
            } else {
                (cos_beam - cos_outer) / (cos_inner - cos_outer).max(1e-6)
            };
            let mut cl = color * (intensity * cos_beam.powf(beam) * cone / dist_sq);
            if let Some(map) = &shadow_map {
                let world_p = transform_point(&ctx.camera_to_world, env.p[idx]);
                let sample = map.sample(
                    &ctx.textures.cache,
                    world_p,
                    Vec3::ZERO,
                    Vec3::ZERO,
                    &shadow_params,
                    ctx.rng,
                )?;
                cl = cl * (1.0 - sample.fraction);
            }
            env.l[idx] = l;
            env.cl[idx] = cl;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Volumes
// ----------------------------------------------------------------------

struct DepthCue;

impl Shader for DepthCue {
    fn name(&self) -> &str {
        "depthcue"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let min_d = ctx.params.float("mindistance").unwrap_or(0.0);
        let max_d = ctx.params.float("maxdistance").unwrap_or(1.0);
        let background = ctx.params.color("background").unwrap_or(Color::BLACK);
        let span = (max_d - min_d).max(1e-6);
        for idx in 0..env.len() {
            let f = ((env.p[idx].z - min_d) / span).clamp(0.0, 1.0);
            env.ci[idx] = env.ci[idx].lerp(background, f);
        }
        Ok(())
    }
}

struct Fog;

impl Shader for Fog {
    fn name(&self) -> &str {
        "fog"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let distance = ctx.params.float("distance").unwrap_or(1.0).max(1e-6);
        let background = ctx.params.color("background").unwrap_or(Color::BLACK);
        for idx in 0..env.len() {
            let f = 1.0 - (-env.i[idx].length() / distance).exp();
            env.ci[idx] = env.ci[idx].lerp(background, f);
            env.oi[idx] = env.oi[idx].lerp(Color::WHITE, f);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Displacement and imager
// ----------------------------------------------------------------------

struct Displacement;

impl Shader for Displacement {
    fn name(&self) -> &str {
        "displacement"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let amplitude = ctx.params.float("amplitude").unwrap_or(0.0);
        if amplitude == 0.0 {
            return Ok(());
        }
        for idx in 0..env.len() {
            let n = env.n[idx].normalize_or_zero();
            env.p[idx] += n * amplitude;
        }
        Ok(())
    }
}

struct Background;

impl Shader for Background {
    fn name(&self) -> &str {
        "background"
    }

    fn evaluate(&self, env: &mut ShaderEnv, ctx: &mut EvalContext<'_>) -> Result<()> {
        let background = ctx.params.color("background").unwrap_or(Color::BLACK);
        for idx in 0..env.len() {
            let alpha = env.oi[idx].average().clamp(0.0, 1.0);
            env.ci[idx] += background * (1.0 - alpha);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamList;
    use crate::stats::Statistics;
    use crate::texture::TextureSystem;
    use glam::Mat4;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn eval(shader: &dyn Shader, env: &mut ShaderEnv, params: &ParamList) {
        let textures = TextureSystem::new(1024, Arc::new(Statistics::new()));
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = EvalContext {
            textures: &textures,
            rng: &mut rng,
            params,
            camera_to_world: Mat4::IDENTITY,
            world_to_camera: Mat4::IDENTITY,
            shader_to_world: Mat4::IDENTITY,
        };
        shader.evaluate(env, &mut ctx).unwrap();
    }

    #[test]
    fn constant_passes_cs_through() {
        let mut env = ShaderEnv::new(2, 2);
        env.cs.fill(Color::new(0.25, 0.5, 0.75));
        eval(&ConstantSurface, &mut env, &ParamList::new());
        assert_eq!(env.ci[0], Color::new(0.25, 0.5, 0.75));
    }

    #[test]
    fn matte_responds_to_light_direction() {
        let mut env = ShaderEnv::new(1, 2);
        env.n.fill(Vec3::NEG_Z);
        env.i.fill(Vec3::Z);
        env.lights.push(super::super::LightContribution {
            ambient: false,
            l: vec![Vec3::NEG_Z; 2],
            cl: vec![Color::WHITE; 2],
        });
        let params = ParamList::new()
            .with_floats("uniform float Ka", &[0.0])
            .with_floats("uniform float Kd", &[1.0]);
        eval(&MatteSurface, &mut env, &params);
        assert!((env.ci[0].r - 1.0).abs() < 1e-5);

        // Light behind the surface contributes nothing.
        env.lights[0].l = vec![Vec3::Z; 2];
        env.ci.fill(Color::BLACK);
        eval(&MatteSurface, &mut env, &params);
        assert!(env.ci[0].r.abs() < 1e-5);
    }

    #[test]
    fn pointlight_inverse_square_falloff() {
        let mut env = ShaderEnv::new(1, 2);
        env.p[0] = Vec3::new(0.0, 0.0, 1.0);
        env.p[1] = Vec3::new(0.0, 0.0, 2.0);
        let params = ParamList::new().with_floats("uniform point from", &[0.0, 0.0, 0.0]);
        eval(&PointLight, &mut env, &params);
        assert!(env.cl[0].r > env.cl[1].r);
        assert!((env.cl[0].r / env.cl[1].r - 4.0).abs() < 1e-3);
    }

    #[test]
    fn spotlight_cuts_off_outside_cone() {
        let mut env = ShaderEnv::new(1, 2);
        // Light at origin aiming +z; one point in the beam, one far off
        // axis.
        env.p[0] = Vec3::new(0.0, 0.0, 2.0);
        env.p[1] = Vec3::new(5.0, 0.0, 0.5);
        let params = ParamList::new()
            .with_floats("uniform point from", &[0.0, 0.0, 0.0])
            .with_floats("uniform point to", &[0.0, 0.0, 1.0]);
        eval(&SpotLight, &mut env, &params);
        assert!(env.cl[0].r > 0.0);
        assert!(env.cl[1].r.abs() < 1e-6);
    }

    #[test]
    fn paintedplastic_without_map_matches_surface_color() {
        let mut env = ShaderEnv::new(1, 1);
        env.cs.fill(Color::new(0.5, 0.25, 0.125));
        env.n.fill(Vec3::NEG_Z);
        env.i.fill(Vec3::Z);
        env.lights.push(super::super::LightContribution {
            ambient: true,
            l: vec![Vec3::ZERO; 1],
            cl: vec![Color::WHITE; 1],
        });
        let params = ParamList::new()
            .with_floats("uniform float Ka", &[1.0])
            .with_floats("uniform float Kd", &[0.0])
            .with_floats("uniform float Ks", &[0.0]);
        eval(&PaintedPlastic, &mut env, &params);
        assert!((env.ci[0].r - 0.5).abs() < 1e-5);
        assert!((env.ci[0].g - 0.25).abs() < 1e-5);
    }

    #[test]
    fn displacement_moves_along_normal() {
        let mut env = ShaderEnv::new(1, 1);
        env.n.fill(Vec3::Z);
        let params = ParamList::new().with_floats("uniform float amplitude", &[0.5]);
        eval(&Displacement, &mut env, &params);
        assert!((env.p[0].z - 0.5).abs() < 1e-6);
    }
}
