//! Motion-Sampled Transform
//!
//! The object-to-world transform is an ordered sequence of (time, matrix)
//! keys. Outside a motion block there is exactly one key; a motion block
//! leaves one key per declared time. Handles are shared copy-on-write
//! between scopes, the same way attributes are.

use std::sync::Arc;

use glam::Mat4;
use smallvec::SmallVec;

/// Shared handle to a transform snapshot.
pub type TransformHandle = Arc<Transform>;

#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Keys sorted by increasing time. Never empty.
    keys: SmallVec<[(f32, Mat4); 2]>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            keys: SmallVec::from_slice(&[(0.0, Mat4::IDENTITY)]),
        }
    }

    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        Self {
            keys: SmallVec::from_slice(&[(0.0, m)]),
        }
    }

    /// Ensures the handle is uniquely owned, cloning if shared, and
    /// returns a mutable reference. Mutations through the returned
    /// reference never affect other holders of the handle.
    pub fn write(this: &mut TransformHandle) -> &mut Self {
        if Arc::strong_count(this) > 1 {
            *this = Arc::new((**this).clone());
        }
        Arc::make_mut(this)
    }

    /// True when more than one motion key is present.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.keys.len() > 1
    }

    #[must_use]
    pub fn times(&self) -> impl Iterator<Item = f32> + '_ {
        self.keys.iter().map(|(t, _)| *t)
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Object-to-world matrix at `time`, linearly interpolating between
    /// the surrounding keys and clamping outside the key range.
    #[must_use]
    pub fn matrix_at(&self, time: f32) -> Mat4 {
        match self.keys.as_slice() {
            [(_, only)] => *only,
            keys => {
                if time <= keys[0].0 {
                    return keys[0].1;
                }
                if let Some(&(last_t, last_m)) = keys.last()
                    && time >= last_t
                {
                    return last_m;
                }
                let hi = keys.partition_point(|(t, _)| *t <= time);
                let (t0, m0) = keys[hi - 1];
                let (t1, m1) = keys[hi];
                let span = t1 - t0;
                if span <= f32::EPSILON {
                    return m0;
                }
                let f = (time - t0) / span;
                // Component-wise matrix blend between motion keys.
                m0 * (1.0 - f) + m1 * f
            }
        }
    }

    /// World-to-object matrix at `time`.
    #[must_use]
    pub fn inverse_at(&self, time: f32) -> Mat4 {
        self.matrix_at(time).inverse()
    }

    /// The matrix transforming normals: inverse transpose of the upper
    /// 3×3, widened back to 4×4 with no translation.
    #[must_use]
    pub fn normal_matrix_at(&self, time: f32) -> Mat4 {
        normal_matrix(&self.matrix_at(time))
    }

    /// Replaces every key's matrix. Used by `transform()` and
    /// `identity()` outside motion blocks.
    pub fn set_all(&mut self, m: Mat4) {
        self.keys = SmallVec::from_slice(&[(0.0, m)]);
    }

    /// Post-concatenates `m` onto every key.
    pub fn concat_all(&mut self, m: Mat4) {
        for (_, key) in &mut self.keys {
            *key *= m;
        }
    }

    /// Pre-concatenates `m` onto every key, as when rebasing an
    /// object-to-world transform into camera space.
    pub fn pre_concat_all(&mut self, m: Mat4) {
        for (_, key) in &mut self.keys {
            *key = m * *key;
        }
    }

    /// Replaces the key at `time`, inserting it if missing. Used by
    /// `transform()` inside a motion block.
    pub fn set_at_time(&mut self, time: f32, m: Mat4) {
        match self.keys.binary_search_by(|(t, _)| t.total_cmp(&time)) {
            Ok(i) => self.keys[i].1 = m,
            Err(i) => self.keys.insert(i, (time, m)),
        }
    }

    /// Concatenates `m` onto the key at `time`, seeding the key from the
    /// interpolated matrix when it does not exist yet.
    pub fn concat_at_time(&mut self, time: f32, m: Mat4) {
        let seeded = self.matrix_at(time);
        match self.keys.binary_search_by(|(t, _)| t.total_cmp(&time)) {
            Ok(i) => self.keys[i].1 *= m,
            Err(i) => self.keys.insert(i, (time, seeded * m)),
        }
    }

    /// Collapses multiple keys that are all identical back to a single
    /// key. Called when a motion block ends without actually varying the
    /// transform.
    pub fn consolidate(&mut self) {
        if self.keys.len() > 1 && self.keys.windows(2).all(|w| w[0].1 == w[1].1) {
            let m = self.keys[0].1;
            self.set_all(m);
        }
    }
}

/// Inverse-transpose of the upper 3×3 of `m`, as a 4×4.
#[must_use]
pub fn normal_matrix(m: &Mat4) -> Mat4 {
    let linear = glam::Mat3::from_mat4(*m);
    Mat4::from_mat3(linear.inverse().transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    #[test]
    fn single_key_is_constant() {
        let t = Transform::from_matrix(Mat4::from_translation(Vec3::X));
        assert!(!t.is_moving());
        assert_eq!(t.matrix_at(0.0), t.matrix_at(0.7));
    }

    #[test]
    fn two_keys_interpolate() {
        let mut t = Transform::identity();
        t.set_at_time(0.0, Mat4::from_translation(Vec3::ZERO));
        t.set_at_time(1.0, Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        let mid = t.matrix_at(0.5);
        let p = mid * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((p.x - 5.0).abs() < 1e-5);
    }

    #[test]
    fn interpolation_clamps_outside_range() {
        let mut t = Transform::identity();
        t.set_at_time(0.0, Mat4::IDENTITY);
        t.set_at_time(1.0, Mat4::from_translation(Vec3::X));
        assert_eq!(t.matrix_at(-1.0), Mat4::IDENTITY);
        assert_eq!(t.matrix_at(2.0), Mat4::from_translation(Vec3::X));
    }

    #[test]
    fn copy_on_write_isolates_scopes() {
        let outer: TransformHandle = Arc::new(Transform::identity());
        let mut inner = Arc::clone(&outer);
        Transform::write(&mut inner).concat_all(Mat4::from_scale(Vec3::splat(2.0)));
        assert_eq!(outer.matrix_at(0.0), Mat4::IDENTITY);
        assert_ne!(inner.matrix_at(0.0), Mat4::IDENTITY);
    }

    #[test]
    fn normal_matrix_counter_scales() {
        let m = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(&m);
        let transformed = n * Vec4::new(1.0, 0.0, 0.0, 0.0);
        assert!((transformed.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn consolidate_collapses_identical_keys() {
        let mut t = Transform::identity();
        t.set_at_time(0.0, Mat4::IDENTITY);
        t.set_at_time(1.0, Mat4::IDENTITY);
        assert!(t.is_moving());
        t.consolidate();
        assert!(!t.is_moving());
    }
}
