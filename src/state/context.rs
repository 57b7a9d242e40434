//! Context Stack
//!
//! Begin/End scopes as a stack of tagged entries. Each entry owns its own
//! attribute and transform handles; entering a scope clones the parent's
//! handles (bumping the reference counts that drive copy-on-write) and
//! leaving restores or propagates them according to the scope kind:
//!
//! - `Attribute`, `Solid`, `World`, `Object` restore both halves
//! - `Transform` restores the transform but lets attribute edits persist
//! - `Motion` propagates both and consolidates degenerate motion
//!
//! Mis-nesting is a fatal `InvalidNesting` error.

use std::sync::Arc;

use crate::errors::{RenderError, Result};

use super::attributes::{Attributes, AttributesHandle};
use super::options::Options;
use super::transform::{Transform, TransformHandle};

/// CSG operation of a Solid scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolidOp {
    Primitive,
    Intersection,
    Union,
    Difference,
}

impl SolidOp {
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "primitive" => Ok(Self::Primitive),
            "intersection" => Ok(Self::Intersection),
            "union" => Ok(Self::Union),
            "difference" => Ok(Self::Difference),
            other => Err(RenderError::UnknownSymbol(format!(
                "solid operation \"{other}\""
            ))),
        }
    }
}

/// Progress through a motion block.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    pub times: Vec<f32>,
    pub index: usize,
}

impl MotionState {
    /// The time the next motion-sampled call applies to.
    #[must_use]
    pub fn current_time(&self) -> Option<f32> {
        self.times.get(self.index).copied()
    }
}

/// Scope discriminant used by the nesting table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Main,
    Frame,
    World,
    Attribute,
    Transform,
    Solid,
    Object,
    Motion,
}

/// Per-kind payload of a stack entry.
#[derive(Debug, Clone)]
pub enum ScopeData {
    Main,
    Frame {
        /// Options as they were at `frame_begin`, restored at `frame_end`.
        saved_options: Box<Options>,
    },
    World,
    Attribute,
    Transform,
    Solid {
        op: SolidOp,
    },
    Object {
        handle: u32,
    },
    Motion(MotionState),
}

impl ScopeData {
    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Main => ScopeKind::Main,
            Self::Frame { .. } => ScopeKind::Frame,
            Self::World => ScopeKind::World,
            Self::Attribute => ScopeKind::Attribute,
            Self::Transform => ScopeKind::Transform,
            Self::Solid { .. } => ScopeKind::Solid,
            Self::Object { .. } => ScopeKind::Object,
            Self::Motion(_) => ScopeKind::Motion,
        }
    }
}

/// One entry of the context stack.
#[derive(Debug, Clone)]
pub struct Scope {
    pub data: ScopeData,
    pub attributes: AttributesHandle,
    pub transform: TransformHandle,
}

/// Which child scopes a parent admits.
fn may_nest(parent: ScopeKind, child: ScopeKind) -> bool {
    use ScopeKind as K;
    match parent {
        K::Main | K::Frame => matches!(
            child,
            K::World | K::Attribute | K::Transform | K::Object | K::Motion
        ) || (parent == K::Main && child == K::Frame),
        K::World | K::Attribute | K::Solid => matches!(
            child,
            K::Attribute | K::Transform | K::Solid | K::Object | K::Motion
        ),
        K::Transform => matches!(child, K::Attribute | K::Transform | K::Solid | K::Motion),
        K::Object => matches!(child, K::Attribute | K::Transform | K::Motion),
        K::Motion => false,
    }
}

/// The stack itself.
#[derive(Debug, Default)]
pub struct ContextStack {
    scopes: Vec<Scope>,
}

impl ContextStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.scopes.is_empty()
    }

    /// True when a World scope is open anywhere on the stack.
    #[must_use]
    pub fn in_world(&self) -> bool {
        self.scopes
            .iter()
            .any(|s| s.data.kind() == ScopeKind::World)
    }

    /// The innermost open Object scope, if any.
    #[must_use]
    pub fn open_object(&self) -> Option<u32> {
        self.scopes.iter().rev().find_map(|s| match s.data {
            ScopeData::Object { handle } => Some(handle),
            _ => None,
        })
    }

    /// The innermost open Solid scope's operation, if any.
    #[must_use]
    pub fn open_solid(&self) -> Option<SolidOp> {
        self.scopes.iter().rev().find_map(|s| match s.data {
            ScopeData::Solid { op } => Some(op),
            _ => None,
        })
    }

    /// The current motion block, if the top scope is one.
    #[must_use]
    pub fn motion(&self) -> Option<&MotionState> {
        match self.scopes.last()?.data {
            ScopeData::Motion(ref m) => Some(m),
            _ => None,
        }
    }

    /// Advances the motion index after a motion-sampled call.
    pub fn advance_motion(&mut self) -> Result<()> {
        match self.scopes.last_mut().map(|s| &mut s.data) {
            Some(ScopeData::Motion(m)) => {
                if m.index >= m.times.len() {
                    return Err(RenderError::InvalidData(format!(
                        "motion block holds {} times but received more calls",
                        m.times.len()
                    )));
                }
                m.index += 1;
                Ok(())
            }
            _ => Err(RenderError::InvalidNesting(
                "motion-sampled call outside a motion block".to_string(),
            )),
        }
    }

    fn top(&self) -> Result<&Scope> {
        self.scopes
            .last()
            .ok_or_else(|| RenderError::InvalidNesting("no open context".to_string()))
    }

    fn top_mut(&mut self) -> Result<&mut Scope> {
        self.scopes
            .last_mut()
            .ok_or_else(|| RenderError::InvalidNesting("no open context".to_string()))
    }

    /// Read access to the current attribute state.
    pub fn attributes(&self) -> Result<&AttributesHandle> {
        Ok(&self.top()?.attributes)
    }

    /// Write access to the current attribute state, copy-on-write.
    pub fn attributes_mut(&mut self) -> Result<&mut Attributes> {
        Ok(Attributes::write(&mut self.top_mut()?.attributes))
    }

    pub fn transform(&self) -> Result<&TransformHandle> {
        Ok(&self.top()?.transform)
    }

    pub fn transform_mut(&mut self) -> Result<&mut Transform> {
        Ok(Transform::write(&mut self.top_mut()?.transform))
    }

    /// Replaces the current transform handle outright, as
    /// `coord_sys_transform` does.
    pub fn replace_transform(&mut self, transform: TransformHandle) -> Result<()> {
        self.top_mut()?.transform = transform;
        Ok(())
    }

    /// Pushes a scope, validating the nesting rules.
    pub fn push(&mut self, data: ScopeData) -> Result<()> {
        let kind = data.kind();
        match self.scopes.last() {
            None => {
                if kind != ScopeKind::Main {
                    return Err(RenderError::InvalidNesting(format!(
                        "{kind:?} scope outside begin/end"
                    )));
                }
                self.scopes.push(Scope {
                    data,
                    attributes: Arc::new(Attributes::default()),
                    transform: Arc::new(Transform::identity()),
                });
                Ok(())
            }
            Some(parent) => {
                let parent_kind = parent.data.kind();
                if !may_nest(parent_kind, kind) {
                    return Err(RenderError::InvalidNesting(format!(
                        "{kind:?} scope inside {parent_kind:?}"
                    )));
                }
                let attributes = Arc::clone(&parent.attributes);
                let transform = Arc::clone(&parent.transform);
                self.scopes.push(Scope {
                    data,
                    attributes,
                    transform,
                });
                Ok(())
            }
        }
    }

    /// Pops a scope, which must match `expected`. Returns the popped
    /// entry; handle propagation per the scope kind has already been
    /// applied to the parent.
    pub fn pop(&mut self, expected: ScopeKind) -> Result<Scope> {
        let top_kind = self.top()?.data.kind();
        if top_kind != expected {
            return Err(RenderError::InvalidNesting(format!(
                "closing {expected:?} scope but {top_kind:?} is open"
            )));
        }
        let mut popped = self.scopes.pop().unwrap_or_else(|| unreachable!());
        if let Some(parent) = self.scopes.last_mut() {
            match popped.data {
                // Transform scopes restore the transform only; attribute
                // edits made inside persist.
                ScopeData::Transform => {
                    parent.attributes = Arc::clone(&popped.attributes);
                }
                // Motion blocks are not save/restore scopes.
                ScopeData::Motion(_) => {
                    Transform::write(&mut popped.transform).consolidate();
                    parent.attributes = Arc::clone(&popped.attributes);
                    parent.transform = Arc::clone(&popped.transform);
                }
                _ => {}
            }
        }
        Ok(popped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Color;

    fn stack_in_world() -> ContextStack {
        let mut stack = ContextStack::new();
        stack.push(ScopeData::Main).unwrap();
        stack.push(ScopeData::World).unwrap();
        stack
    }

    #[test]
    fn main_must_come_first() {
        let mut stack = ContextStack::new();
        assert!(stack.push(ScopeData::World).is_err());
        assert!(stack.push(ScopeData::Main).is_ok());
    }

    #[test]
    fn attribute_end_restores_reference() {
        let mut stack = stack_in_world();
        let saved = Arc::clone(stack.attributes().unwrap());
        stack.push(ScopeData::Attribute).unwrap();
        stack.attributes_mut().unwrap().shading.color = Color::new(1.0, 0.0, 0.0);
        stack.pop(ScopeKind::Attribute).unwrap();
        assert!(Arc::ptr_eq(stack.attributes().unwrap(), &saved));
        assert_eq!(stack.attributes().unwrap().shading.color, Color::WHITE);
    }

    #[test]
    fn transform_end_restores_matrix_but_keeps_attributes() {
        let mut stack = stack_in_world();
        let saved_matrix = stack.transform().unwrap().matrix_at(0.0);
        stack.push(ScopeData::Transform).unwrap();
        stack
            .transform_mut()
            .unwrap()
            .concat_all(glam::Mat4::from_translation(glam::Vec3::X));
        stack.attributes_mut().unwrap().shading.matte = true;
        stack.pop(ScopeKind::Transform).unwrap();
        assert_eq!(stack.transform().unwrap().matrix_at(0.0), saved_matrix);
        assert!(stack.attributes().unwrap().shading.matte);
    }

    #[test]
    fn mismatched_pop_is_invalid_nesting() {
        let mut stack = stack_in_world();
        stack.push(ScopeData::Attribute).unwrap();
        let err = stack.pop(ScopeKind::Transform).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidNesting);
    }

    #[test]
    fn motion_admits_no_children() {
        let mut stack = stack_in_world();
        stack
            .push(ScopeData::Motion(MotionState {
                times: vec![0.0, 1.0],
                index: 0,
            }))
            .unwrap();
        assert!(stack.push(ScopeData::Attribute).is_err());
    }

    #[test]
    fn motion_propagates_transform() {
        let mut stack = stack_in_world();
        stack
            .push(ScopeData::Motion(MotionState {
                times: vec![0.0, 1.0],
                index: 0,
            }))
            .unwrap();
        let t0 = stack.motion().unwrap().current_time().unwrap();
        stack
            .transform_mut()
            .unwrap()
            .set_at_time(t0, glam::Mat4::IDENTITY);
        stack.advance_motion().unwrap();
        let t1 = stack.motion().unwrap().current_time().unwrap();
        stack
            .transform_mut()
            .unwrap()
            .set_at_time(t1, glam::Mat4::from_translation(glam::Vec3::X));
        stack.advance_motion().unwrap();
        stack.pop(ScopeKind::Motion).unwrap();
        assert!(stack.transform().unwrap().is_moving());
    }

    #[test]
    fn solid_lookup_finds_innermost() {
        let mut stack = stack_in_world();
        stack
            .push(ScopeData::Solid {
                op: SolidOp::Difference,
            })
            .unwrap();
        stack
            .push(ScopeData::Solid {
                op: SolidOp::Primitive,
            })
            .unwrap();
        assert_eq!(stack.open_solid(), Some(SolidOp::Primitive));
    }
}
