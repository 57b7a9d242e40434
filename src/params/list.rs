//! Parameter Values and Lists

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::errors::{RenderError, Result};
use crate::math::Color;

use super::{Declaration, ParamType, StorageClass};

/// The payload of one parameter. Numeric types arrive as flat float
/// arrays and are interpreted through the declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    Strings(Vec<String>),
}

impl ParamValue {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Floats(v) => v.len(),
            Self::Ints(v) => v.len(),
            Self::Strings(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A declared parameter and its values.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub decl: Declaration,
    pub value: ParamValue,
}

impl Param {
    #[must_use]
    pub fn new(decl: Declaration, value: ParamValue) -> Self {
        Self { decl, value }
    }

    /// Number of storage-class elements carried by this parameter.
    #[must_use]
    pub fn element_count(&self) -> usize {
        let size = self.decl.element_size();
        if size == 0 { 0 } else { self.value.len() / size }
    }
}

/// Per-primitive element counts used to validate storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimVarCounts {
    pub uniform: usize,
    pub varying: usize,
    pub vertex: usize,
    pub facevarying: usize,
}

impl PrimVarCounts {
    #[must_use]
    pub fn expected(&self, class: StorageClass) -> usize {
        match class {
            StorageClass::Constant => 1,
            StorageClass::Uniform => self.uniform,
            StorageClass::Varying => self.varying,
            StorageClass::Vertex => self.vertex,
            StorageClass::FaceVarying => self.facevarying,
        }
    }
}

/// An ordered list of parameters, preserving call order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    params: Vec<Param>,
}

impl ParamList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: Param) {
        // A repeated token replaces the earlier binding.
        if let Some(existing) = self
            .params
            .iter_mut()
            .find(|p| p.decl.name == param.decl.name)
        {
            *existing = param;
        } else {
            self.params.push(param);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.decl.name == name)
    }

    /// Flat float data of a parameter, regardless of its declared type.
    #[must_use]
    pub fn floats(&self, name: &str) -> Option<&[f32]> {
        match self.find(name)? {
            Param {
                value: ParamValue::Floats(v),
                ..
            } => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn ints(&self, name: &str) -> Option<&[i32]> {
        match self.find(name)? {
            Param {
                value: ParamValue::Ints(v),
                ..
            } => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn strings(&self, name: &str) -> Option<&[String]> {
        match self.find(name)? {
            Param {
                value: ParamValue::Strings(v),
                ..
            } => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn float(&self, name: &str) -> Option<f32> {
        self.floats(name)?.first().copied()
    }

    #[must_use]
    pub fn int(&self, name: &str) -> Option<i32> {
        self.ints(name)?.first().copied()
    }

    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        self.strings(name)?.first().map(String::as_str)
    }

    /// Interprets a float parameter as 3-component points.
    #[must_use]
    pub fn points(&self, name: &str) -> Option<Vec<Vec3>> {
        let data = self.floats(name)?;
        Some(
            data.chunks_exact(3)
                .map(|c| Vec3::new(c[0], c[1], c[2]))
                .collect(),
        )
    }

    #[must_use]
    pub fn hpoints(&self, name: &str) -> Option<Vec<Vec4>> {
        let data = self.floats(name)?;
        Some(
            data.chunks_exact(4)
                .map(|c| Vec4::new(c[0], c[1], c[2], c[3]))
                .collect(),
        )
    }

    #[must_use]
    pub fn vec2s(&self, name: &str) -> Option<Vec<Vec2>> {
        let data = self.floats(name)?;
        Some(data.chunks_exact(2).map(|c| Vec2::new(c[0], c[1])).collect())
    }

    #[must_use]
    pub fn colors(&self, name: &str) -> Option<Vec<Color>> {
        let data = self.floats(name)?;
        Some(
            data.chunks_exact(3)
                .map(|c| Color::new(c[0], c[1], c[2]))
                .collect(),
        )
    }

    #[must_use]
    pub fn color(&self, name: &str) -> Option<Color> {
        self.colors(name)?.first().copied()
    }

    #[must_use]
    pub fn matrix(&self, name: &str) -> Option<Mat4> {
        let data = self.floats(name)?;
        if data.len() < 16 {
            return None;
        }
        let mut a = [0.0f32; 16];
        a.copy_from_slice(&data[..16]);
        Some(Mat4::from_cols_array(&a).transpose())
    }

    /// Vertex positions: `P` as points, `Pw` as homogeneous points
    /// projected, or `Pz` as depth-only (x,y supplied by the primitive).
    #[must_use]
    pub fn positions(&self) -> Option<Vec<Vec3>> {
        if let Some(p) = self.points("P") {
            return Some(p);
        }
        if let Some(pw) = self.hpoints("Pw") {
            return Some(pw.into_iter().map(crate::math::project_hpoint).collect());
        }
        None
    }

    /// Validates every parameter's element count against the primitive's
    /// storage-class sizes.
    pub fn validate(&self, counts: &PrimVarCounts) -> Result<()> {
        for param in &self.params {
            let expected = counts.expected(param.decl.class);
            let actual = param.element_count();
            if actual != expected {
                return Err(RenderError::InvalidData(format!(
                    "parameter \"{}\" has {actual} {} elements, expected {expected}",
                    param.decl.name, param.decl.class,
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<Param> for ParamList {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        let mut list = Self::new();
        for p in iter {
            list.push(p);
        }
        list
    }
}

/// Convenience constructors used heavily by tests and built-in shaders.
impl ParamList {
    pub fn with_floats(mut self, decl: &str, values: &[f32]) -> Self {
        if let Ok(d) = Declaration::parse(decl) {
            self.push(Param::new(d, ParamValue::Floats(values.to_vec())));
        }
        self
    }

    pub fn with_ints(mut self, decl: &str, values: &[i32]) -> Self {
        if let Ok(d) = Declaration::parse(decl) {
            self.push(Param::new(d, ParamValue::Ints(values.to_vec())));
        }
        self
    }

    pub fn with_string(mut self, decl: &str, value: &str) -> Self {
        if let Ok(d) = Declaration::parse(decl) {
            self.push(Param::new(d, ParamValue::Strings(vec![value.to_string()])));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_param(name: &str, class: StorageClass, data: &[f32]) -> Param {
        Param::new(
            Declaration::new(name, class, ParamType::Point, 1),
            ParamValue::Floats(data.to_vec()),
        )
    }

    #[test]
    fn element_count_uses_declared_size() {
        let p = point_param("P", StorageClass::Vertex, &[0.0; 12]);
        assert_eq!(p.element_count(), 4);
    }

    #[test]
    fn list_lookup_and_typed_access() {
        let mut list = ParamList::new();
        list.push(point_param("P", StorageClass::Vertex, &[1.0, 2.0, 3.0]));
        let pts = list.points("P").unwrap();
        assert_eq!(pts, vec![Vec3::new(1.0, 2.0, 3.0)]);
        assert!(list.find("N").is_none());
    }

    #[test]
    fn repeated_token_replaces() {
        let mut list = ParamList::new();
        list.push(point_param("P", StorageClass::Vertex, &[1.0, 1.0, 1.0]));
        list.push(point_param("P", StorageClass::Vertex, &[2.0, 2.0, 2.0]));
        assert_eq!(list.len(), 1);
        assert_eq!(list.points("P").unwrap()[0], Vec3::splat(2.0));
    }

    #[test]
    fn validation_checks_storage_class_counts() {
        let counts = PrimVarCounts {
            uniform: 1,
            varying: 4,
            vertex: 4,
            facevarying: 4,
        };
        // 12 floats = 4 points, matches vertex = 4.
        let mut good = ParamList::new();
        good.push(point_param("P", StorageClass::Vertex, &[0.0; 12]));
        assert!(good.validate(&counts).is_ok());
        // 9 floats = 3 points, does not.
        let mut bad = ParamList::new();
        bad.push(point_param("P", StorageClass::Vertex, &[0.0; 9]));
        assert!(bad.validate(&counts).is_err());
    }

    #[test]
    fn pw_positions_project() {
        let mut list = ParamList::new();
        list.push(Param::new(
            Declaration::new("Pw", StorageClass::Vertex, ParamType::HPoint, 1),
            ParamValue::Floats(vec![2.0, 4.0, 6.0, 2.0]),
        ));
        assert_eq!(list.positions().unwrap()[0], Vec3::new(1.0, 2.0, 3.0));
    }
}
