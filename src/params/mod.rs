//! Typed Parameter Lists
//!
//! Every interface call carries an open-ended list of (token, values)
//! pairs. A token is either a name previously registered through
//! `declare()` or an inline declaration such as `"vertex point P"`; both
//! parse to the same [`Declaration`]. Values are stored as flat float,
//! int or string arrays and interpreted through the declared type.
//!
//! Storage classes determine how many elements a primitive expects:
//!
//! - `constant` — one value for the whole primitive
//! - `uniform` — one value per face
//! - `varying` / `facevarying` — one value per parametric corner
//! - `vertex` — one value per control vertex
mod list;

pub use list::{Param, ParamList, ParamValue};

use std::fmt;

use rustc_hash::FxHashMap;

use crate::errors::{RenderError, Result};

/// Storage class of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    Constant,
    #[default]
    Uniform,
    Varying,
    Vertex,
    FaceVarying,
}

impl StorageClass {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "constant" => Some(Self::Constant),
            "uniform" => Some(Self::Uniform),
            "varying" => Some(Self::Varying),
            "vertex" => Some(Self::Vertex),
            "facevarying" => Some(Self::FaceVarying),
            _ => None,
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Constant => "constant",
            Self::Uniform => "uniform",
            Self::Varying => "varying",
            Self::Vertex => "vertex",
            Self::FaceVarying => "facevarying",
        };
        write!(f, "{s}")
    }
}

/// Value type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Float,
    Int,
    Str,
    Point,
    Vector,
    Normal,
    Color,
    Matrix,
    HPoint,
}

impl ParamType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "float" => Some(Self::Float),
            "integer" | "int" => Some(Self::Int),
            "string" => Some(Self::Str),
            "point" => Some(Self::Point),
            "vector" => Some(Self::Vector),
            "normal" => Some(Self::Normal),
            "color" => Some(Self::Color),
            "matrix" => Some(Self::Matrix),
            "hpoint" => Some(Self::HPoint),
            _ => None,
        }
    }

    /// Float (or int/string) components per element of this type.
    #[must_use]
    pub fn components(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::Str => 1,
            Self::Point | Self::Vector | Self::Normal | Self::Color => 3,
            Self::HPoint => 4,
            Self::Matrix => 16,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Float => "float",
            Self::Int => "integer",
            Self::Str => "string",
            Self::Point => "point",
            Self::Vector => "vector",
            Self::Normal => "normal",
            Self::Color => "color",
            Self::Matrix => "matrix",
            Self::HPoint => "hpoint",
        };
        write!(f, "{s}")
    }
}

/// A parsed parameter declaration: `class type[count] name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub class: StorageClass,
    pub ty: ParamType,
    /// Array length per element; 1 unless declared `type[N]`.
    pub count: usize,
}

impl Declaration {
    #[must_use]
    pub fn new(name: &str, class: StorageClass, ty: ParamType, count: usize) -> Self {
        Self {
            name: name.to_string(),
            class,
            ty,
            count,
        }
    }

    /// Parses a full declaration string. The class defaults to `uniform`
    /// and the array count to 1 when omitted.
    pub fn parse(decl: &str) -> Result<Self> {
        let mut words = decl.split_whitespace().collect::<Vec<_>>();
        if words.is_empty() {
            return Err(RenderError::BadInlineDeclaration(decl.to_string()));
        }
        let name = words.pop().unwrap_or_default();
        if name.is_empty() || ParamType::parse(name).is_some() || StorageClass::parse(name).is_some()
        {
            return Err(RenderError::BadInlineDeclaration(decl.to_string()));
        }

        let mut class = StorageClass::Uniform;
        let mut ty = None;
        let mut count = 1usize;
        for word in words {
            if let Some(c) = StorageClass::parse(word) {
                if ty.is_some() {
                    // Class must precede type.
                    return Err(RenderError::BadInlineDeclaration(decl.to_string()));
                }
                class = c;
            } else {
                let (type_word, array) = match word.find('[') {
                    Some(open) => {
                        let close = word
                            .rfind(']')
                            .ok_or_else(|| RenderError::BadInlineDeclaration(decl.to_string()))?;
                        let n = word[open + 1..close]
                            .parse::<usize>()
                            .map_err(|_| RenderError::BadInlineDeclaration(decl.to_string()))?;
                        (&word[..open], n)
                    }
                    None => (word, 1),
                };
                let parsed = ParamType::parse(type_word)
                    .ok_or_else(|| RenderError::BadInlineDeclaration(decl.to_string()))?;
                if ty.replace(parsed).is_some() {
                    return Err(RenderError::BadInlineDeclaration(decl.to_string()));
                }
                count = array;
            }
        }
        let ty = ty.ok_or_else(|| RenderError::BadInlineDeclaration(decl.to_string()))?;
        Ok(Self::new(name, class, ty, count))
    }

    /// Serialises back to the declaration grammar. `parse` of the result
    /// yields an identical declaration.
    #[must_use]
    pub fn to_token(&self) -> String {
        if self.count > 1 {
            format!("{} {}[{}] {}", self.class, self.ty, self.count, self.name)
        } else {
            format!("{} {} {}", self.class, self.ty, self.name)
        }
    }

    /// Total scalar components per storage-class element.
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.ty.components() * self.count
    }
}

/// The token dictionary: standard interface tokens plus everything
/// registered through `declare()`.
pub struct Dictionary {
    tokens: FxHashMap<String, Declaration>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    #[must_use]
    pub fn new() -> Self {
        use ParamType as T;
        use StorageClass as S;
        let mut tokens = FxHashMap::default();
        let standard = [
            ("P", S::Vertex, T::Point, 1),
            ("Pz", S::Vertex, T::Float, 1),
            ("Pw", S::Vertex, T::HPoint, 1),
            ("N", S::Varying, T::Normal, 1),
            ("Ng", S::Varying, T::Normal, 1),
            ("Cs", S::Varying, T::Color, 1),
            ("Os", S::Varying, T::Color, 1),
            ("s", S::Varying, T::Float, 1),
            ("t", S::Varying, T::Float, 1),
            ("st", S::Varying, T::Float, 2),
            ("u", S::Varying, T::Float, 1),
            ("v", S::Varying, T::Float, 1),
            ("w", S::Varying, T::Float, 1),
            ("width", S::Varying, T::Float, 1),
            ("constantwidth", S::Constant, T::Float, 1),
            ("fov", S::Uniform, T::Float, 1),
            ("intensity", S::Uniform, T::Float, 1),
            ("lightcolor", S::Uniform, T::Color, 1),
            ("from", S::Uniform, T::Point, 1),
            ("to", S::Uniform, T::Point, 1),
            ("coneangle", S::Uniform, T::Float, 1),
            ("conedeltaangle", S::Uniform, T::Float, 1),
            ("beamdistribution", S::Uniform, T::Float, 1),
            ("Ka", S::Uniform, T::Float, 1),
            ("Kd", S::Uniform, T::Float, 1),
            ("Ks", S::Uniform, T::Float, 1),
            ("Kr", S::Uniform, T::Float, 1),
            ("roughness", S::Uniform, T::Float, 1),
            ("specularcolor", S::Uniform, T::Color, 1),
            ("mindistance", S::Uniform, T::Float, 1),
            ("maxdistance", S::Uniform, T::Float, 1),
            ("background", S::Uniform, T::Color, 1),
            ("distance", S::Uniform, T::Float, 1),
            ("amplitude", S::Uniform, T::Float, 1),
            ("shadowname", S::Uniform, T::Str, 1),
            ("texturename", S::Uniform, T::Str, 1),
            ("bias", S::Uniform, T::Float, 1),
            ("bias0", S::Uniform, T::Float, 1),
            ("bias1", S::Uniform, T::Float, 1),
            ("samples", S::Uniform, T::Float, 1),
            ("origin", S::Uniform, T::Int, 2),
        ];
        for (name, class, ty, count) in standard {
            tokens.insert(name.to_string(), Declaration::new(name, class, ty, count));
        }
        Self { tokens }
    }

    /// Registers a declaration, as the `declare()` interface call does.
    /// Returns the canonical token form.
    pub fn declare(&mut self, name: &str, decl: &str) -> Result<String> {
        let full = format!("{decl} {name}");
        let parsed = Declaration::parse(&full)?;
        let token = parsed.to_token();
        self.tokens.insert(name.to_string(), parsed);
        Ok(token)
    }

    /// Resolves a token appearing in a parameter list: an inline
    /// declaration when it contains whitespace, otherwise a dictionary
    /// lookup.
    pub fn resolve(&self, token: &str) -> Result<Declaration> {
        let trimmed = token.trim();
        if trimmed.contains(char::is_whitespace) {
            return Declaration::parse(trimmed);
        }
        self.tokens
            .get(trimmed)
            .cloned()
            .ok_or_else(|| RenderError::BadToken(format!("undeclared token \"{trimmed}\"")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_declaration() {
        let d = Declaration::parse("vertex point P").unwrap();
        assert_eq!(d.class, StorageClass::Vertex);
        assert_eq!(d.ty, ParamType::Point);
        assert_eq!(d.count, 1);
        assert_eq!(d.name, "P");
    }

    #[test]
    fn parse_defaults() {
        let d = Declaration::parse("float Kd").unwrap();
        assert_eq!(d.class, StorageClass::Uniform);
        assert_eq!(d.ty, ParamType::Float);
    }

    #[test]
    fn parse_array_count() {
        let d = Declaration::parse("constant float[4] corners").unwrap();
        assert_eq!(d.count, 4);
        assert_eq!(d.element_size(), 4);
    }

    #[test]
    fn round_trip_through_grammar() {
        for token in [
            "vertex point P",
            "uniform color tint",
            "constant float[4] corners",
            "facevarying normal N",
        ] {
            let d = Declaration::parse(token).unwrap();
            let again = Declaration::parse(&d.to_token()).unwrap();
            assert_eq!(d, again);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!(Declaration::parse("").is_err());
        assert!(Declaration::parse("float").is_err());
        assert!(Declaration::parse("vertex vertex P").is_err());
        assert!(Declaration::parse("float[x] bad").is_err());
        assert!(Declaration::parse("point float two").is_err());
    }

    #[test]
    fn dictionary_standard_tokens() {
        let dict = Dictionary::new();
        let p = dict.resolve("P").unwrap();
        assert_eq!(p.class, StorageClass::Vertex);
        assert_eq!(p.ty, ParamType::Point);
        assert!(dict.resolve("madeup").is_err());
    }

    #[test]
    fn dictionary_declare_then_resolve() {
        let mut dict = Dictionary::new();
        dict.declare("temperature", "varying float").unwrap();
        let d = dict.resolve("temperature").unwrap();
        assert_eq!(d.class, StorageClass::Varying);
    }

    #[test]
    fn inline_beats_dictionary() {
        let dict = Dictionary::new();
        let d = dict.resolve("constant color Cs").unwrap();
        assert_eq!(d.class, StorageClass::Constant);
    }
}
