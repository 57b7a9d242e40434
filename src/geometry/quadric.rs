//! Quadric Surfaces
//!
//! The parametric quadrics of the interface, evaluated directly: sphere,
//! cone, cylinder, hyperboloid, paraboloid, disk and torus. All angles
//! arrive in degrees, as the interface passes them.

use glam::Vec3;

use super::{ParamSurface, ParametricPrim, PrimBase};

fn radians(deg: f32) -> f32 {
    deg.to_radians()
}

#[derive(Clone)]
pub struct Sphere {
    pub radius: f32,
    pub zmin: f32,
    pub zmax: f32,
    pub thetamax: f32,
}

impl ParamSurface for Sphere {
    fn type_name(&self) -> &'static str {
        "sphere"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let r = self.radius.max(1e-6);
        let phi_min = (self.zmin.clamp(-r, r) / r).asin();
        let phi_max = (self.zmax.clamp(-r, r) / r).asin();
        let phi = phi_min + v * (phi_max - phi_min);
        let theta = u * radians(self.thetamax);
        Vec3::new(
            r * phi.cos() * theta.cos(),
            r * phi.cos() * theta.sin(),
            r * phi.sin(),
        )
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Cone {
    pub height: f32,
    pub radius: f32,
    pub thetamax: f32,
}

impl ParamSurface for Cone {
    fn type_name(&self) -> &'static str {
        "cone"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let theta = u * radians(self.thetamax);
        let r = self.radius * (1.0 - v);
        Vec3::new(r * theta.cos(), r * theta.sin(), v * self.height)
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Cylinder {
    pub radius: f32,
    pub zmin: f32,
    pub zmax: f32,
    pub thetamax: f32,
}

impl ParamSurface for Cylinder {
    fn type_name(&self) -> &'static str {
        "cylinder"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let theta = u * radians(self.thetamax);
        Vec3::new(
            self.radius * theta.cos(),
            self.radius * theta.sin(),
            self.zmin + v * (self.zmax - self.zmin),
        )
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Hyperboloid {
    pub point1: Vec3,
    pub point2: Vec3,
    pub thetamax: f32,
}

impl ParamSurface for Hyperboloid {
    fn type_name(&self) -> &'static str {
        "hyperboloid"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let p = self.point1.lerp(self.point2, v);
        let theta = u * radians(self.thetamax);
        Vec3::new(
            p.x * theta.cos() - p.y * theta.sin(),
            p.x * theta.sin() + p.y * theta.cos(),
            p.z,
        )
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Paraboloid {
    pub rmax: f32,
    pub zmin: f32,
    pub zmax: f32,
    pub thetamax: f32,
}

impl ParamSurface for Paraboloid {
    fn type_name(&self) -> &'static str {
        "paraboloid"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let z = self.zmin + v * (self.zmax - self.zmin);
        let denom = if self.zmax.abs() <= f32::EPSILON {
            1.0
        } else {
            self.zmax
        };
        let r = self.rmax * (z / denom).max(0.0).sqrt();
        let theta = u * radians(self.thetamax);
        Vec3::new(r * theta.cos(), r * theta.sin(), z)
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Disk {
    pub height: f32,
    pub radius: f32,
    pub thetamax: f32,
}

impl ParamSurface for Disk {
    fn type_name(&self) -> &'static str {
        "disk"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let theta = u * radians(self.thetamax);
        let r = self.radius * (1.0 - v);
        Vec3::new(r * theta.cos(), r * theta.sin(), self.height)
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Torus {
    pub major_radius: f32,
    pub minor_radius: f32,
    pub phimin: f32,
    pub phimax: f32,
    pub thetamax: f32,
}

impl ParamSurface for Torus {
    fn type_name(&self) -> &'static str {
        "torus"
    }

    fn eval(&self, u: f32, v: f32) -> Vec3 {
        let phi = radians(self.phimin) + v * radians(self.phimax - self.phimin);
        let theta = u * radians(self.thetamax);
        let r = self.minor_radius * phi.cos();
        let z = self.minor_radius * phi.sin();
        Vec3::new(
            (self.major_radius + r) * theta.cos(),
            (self.major_radius + r) * theta.sin(),
            z,
        )
    }

    fn clone_surface(&self) -> Box<dyn ParamSurface> {
        Box::new(self.clone())
    }
}

/// Wraps any quadric surface into a primitive.
#[must_use]
pub fn quadric_prim(base: PrimBase, surface: Box<dyn ParamSurface>) -> ParametricPrim {
    ParametricPrim::new(base, surface)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn sphere_radius_everywhere() {
        let s = Sphere {
            radius: 2.0,
            zmin: -2.0,
            zmax: 2.0,
            thetamax: 360.0,
        };
        for (u, v) in [(0.0, 0.5), (0.25, 0.25), (0.9, 0.75)] {
            assert!(approx(s.eval(u, v).length(), 2.0));
        }
    }

    #[test]
    fn sphere_z_range_clamps() {
        let s = Sphere {
            radius: 1.0,
            zmin: 0.0,
            zmax: 1.0,
            thetamax: 360.0,
        };
        assert!(approx(s.eval(0.0, 0.0).z, 0.0));
        assert!(approx(s.eval(0.0, 1.0).z, 1.0));
    }

    #[test]
    fn cone_apex_and_base() {
        let c = Cone {
            height: 3.0,
            radius: 1.0,
            thetamax: 360.0,
        };
        assert!(approx(c.eval(0.3, 1.0).z, 3.0));
        assert!(approx(c.eval(0.3, 1.0).truncate().length(), 0.0));
        assert!(approx(c.eval(0.0, 0.0).truncate().length(), 1.0));
    }

    #[test]
    fn cylinder_constant_radius() {
        let c = Cylinder {
            radius: 1.5,
            zmin: -1.0,
            zmax: 1.0,
            thetamax: 360.0,
        };
        assert!(approx(c.eval(0.7, 0.2).truncate().length(), 1.5));
    }

    #[test]
    fn torus_major_minor() {
        let t = Torus {
            major_radius: 3.0,
            minor_radius: 1.0,
            phimin: 0.0,
            phimax: 360.0,
            thetamax: 360.0,
        };
        // phi = 0: on the outer equator.
        assert!(approx(t.eval(0.0, 0.0).x, 4.0));
        // phi = 180: on the inner equator.
        assert!(approx(t.eval(0.0, 0.5).x, 2.0));
    }

    #[test]
    fn partial_theta_sweep() {
        let d = Disk {
            height: 0.0,
            radius: 1.0,
            thetamax: 90.0,
        };
        let edge = d.eval(1.0, 0.0);
        assert!(approx(edge.x, 0.0) && approx(edge.y, 1.0));
    }
}
