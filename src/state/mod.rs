//! Graphics State
//!
//! Options, attributes, transforms, the Begin/End context stack and the
//! named coordinate-system registry — the state machine the interface
//! mutates and the engine consumes.

pub mod attributes;
pub mod context;
pub mod coordsys;
pub mod options;
pub mod transform;

pub use attributes::{
    Attributes, AttributesHandle, GeometricAttributes, Orientation, ShadingAttributes,
    ShadingInterpolation,
};
pub use context::{ContextStack, MotionState, Scope, ScopeData, ScopeKind, SolidOp};
pub use coordsys::CoordSysRegistry;
pub use options::{DepthFilter, DisplayMode, Options, Projection, Quantize};
pub use transform::{Transform, TransformHandle, normal_matrix};
