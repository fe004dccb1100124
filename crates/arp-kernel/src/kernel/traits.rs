//! Geometry kernel trait definitions
//!
//! These types define the boundary between the scene graph and the kernel
//! that owns the actual B-rep shapes.

use std::fmt;
use std::path::Path;

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mesh::TessellatedMesh;

/// Opaque reference to a shape living inside the kernel.
///
/// A handle is owned by at most one geometry node at a time and must be freed
/// exactly once. Handles compare by token, never by shape identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeHandle(String);

impl ShapeHandle {
    /// Wrap a kernel-issued token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parametric primitive solids
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// Axis-aligned box centered at the origin
    Box { width: f64, height: f64, length: f64 },
    /// Sphere centered at the origin
    Sphere { radius: f64 },
    /// Cylinder along the Y axis, centered at the origin
    Cylinder { radius: f64, height: f64 },
    /// Square-based pyramid with its base centered at the origin
    Pyramid { width: f64, height: f64, length: f64 },
}

impl PrimitiveKind {
    /// Default display name for nodes of this kind
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Box { .. } => "box",
            PrimitiveKind::Sphere { .. } => "sphere",
            PrimitiveKind::Cylinder { .. } => "cylinder",
            PrimitiveKind::Pyramid { .. } => "pyramid",
        }
    }

    /// Check that every dimension is strictly positive and finite
    pub fn is_valid(&self) -> bool {
        let positive = |d: f64| d.is_finite() && d > 0.0;
        match *self {
            PrimitiveKind::Box {
                width,
                height,
                length,
            }
            | PrimitiveKind::Pyramid {
                width,
                height,
                length,
            } => positive(width) && positive(height) && positive(length),
            PrimitiveKind::Sphere { radius } => positive(radius),
            PrimitiveKind::Cylinder { radius, height } => positive(radius) && positive(height),
        }
    }
}

/// Boolean operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BooleanOp {
    /// Union (a ∪ b)
    Join,
    /// Subtraction (a − b)
    Cut,
    /// Intersection (a ∩ b)
    Intersect,
}

impl BooleanOp {
    /// Symbol used when composing node names
    pub fn symbol(&self) -> char {
        match self {
            BooleanOp::Join => '+',
            BooleanOp::Cut => '-',
            BooleanOp::Intersect => 'x',
        }
    }
}

/// Corner style of a path point. The discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum CornerStyle {
    #[default]
    Sharp = 1,
    Round = 2,
}

impl CornerStyle {
    /// The other style
    pub fn toggled(self) -> Self {
        match self {
            CornerStyle::Sharp => CornerStyle::Round,
            CornerStyle::Round => CornerStyle::Sharp,
        }
    }
}

/// Axis definition for revolve operations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// A point on the axis
    pub position: DVec3,
    /// Direction of the axis (normalized)
    pub direction: DVec3,
}

impl Axis {
    /// Create an axis from a point and a direction
    pub fn new(position: DVec3, direction: DVec3) -> Self {
        Self {
            position,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Orthogonal projection of `point` onto the axis line
    pub fn project(&self, point: DVec3) -> DVec3 {
        self.position + self.direction * (point - self.position).dot(self.direction)
    }

    /// Distance from `point` to the axis line
    pub fn distance_to(&self, point: DVec3) -> f64 {
        point.distance(self.project(point))
    }
}

/// Error type for kernel operations
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    #[error("Geometry construction failed: {0}")]
    GeometryConstructionFailed(String),

    #[error("Unknown shape handle: {0}")]
    UnknownHandle(ShapeHandle),

    #[error("Kernel not available: {0}")]
    KernelNotAvailable(String),

    #[error("Export failed: {0}")]
    Export(String),
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// The geometry kernel gateway
///
/// Every geometry-producing call is synchronous and may take tens to hundreds
/// of milliseconds; callers run them off the interactive thread. Handles
/// returned by the kernel are owned by the caller until passed to `free`.
pub trait GeometryKernel: Send + Sync {
    /// Get the name of this kernel
    fn name(&self) -> &str;

    /// Check if the kernel is available
    fn is_available(&self) -> bool;

    /// Create a primitive solid centered at the origin
    fn create_primitive(&self, kind: &PrimitiveKind) -> KernelResult<ShapeHandle>;

    /// Create a path (wire) through world-space points
    ///
    /// # Arguments
    /// * `points` - Point positions in world coordinates
    /// * `corners` - Corner style for each point (same length as `points`)
    /// * `closed` - Whether the last point connects back to the first
    fn create_path(
        &self,
        points: &[DVec3],
        corners: &[CornerStyle],
        closed: bool,
    ) -> KernelResult<ShapeHandle>;

    /// Combine two shapes. The inputs stay valid and owned by the caller.
    fn boolean(&self, op: BooleanOp, a: &ShapeHandle, b: &ShapeHandle)
    -> KernelResult<ShapeHandle>;

    /// Sweep a profile along a path
    fn sweep(&self, profile: &ShapeHandle, path: &ShapeHandle) -> KernelResult<ShapeHandle>;

    /// Revolve a closed profile a full turn around an axis
    fn revolve(&self, profile: &ShapeHandle, axis: &Axis) -> KernelResult<ShapeHandle>;

    /// Loft through profiles in array order
    fn loft(&self, profiles: &[ShapeHandle]) -> KernelResult<ShapeHandle>;

    /// Place a shape so that its local frame sits at `transform`
    fn set_transform(&self, handle: &ShapeHandle, transform: DMat4) -> KernelResult<()>;

    /// Re-express a shape relative to a new local frame without moving it
    fn set_pivot(&self, handle: &ShapeHandle, pivot: DMat4) -> KernelResult<()>;

    /// Bounding-box center in world coordinates
    fn center(&self, handle: &ShapeHandle) -> KernelResult<DVec3>;

    /// Triangulate a shape, expressed in its local frame
    fn triangulate(&self, handle: &ShapeHandle) -> KernelResult<TessellatedMesh>;

    /// Edge outline of a shape as thin tubes, expressed in its local frame
    fn tube_outline(&self, handle: &ShapeHandle) -> KernelResult<TessellatedMesh>;

    /// Export a shape to an STL file
    fn export_stl(&self, handle: &ShapeHandle, path: &Path) -> KernelResult<()>;

    /// Delete a shape. Freeing the same handle twice is a caller defect.
    fn free(&self, handle: &ShapeHandle);
}

/// A null kernel that always returns errors (used when no kernel is available)
#[derive(Debug, Default)]
pub struct NullKernel;

impl NullKernel {
    fn unavailable<T>() -> KernelResult<T> {
        Err(KernelError::KernelNotAvailable(
            "No geometry kernel available".into(),
        ))
    }
}

impl GeometryKernel for NullKernel {
    fn name(&self) -> &str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn create_primitive(&self, _kind: &PrimitiveKind) -> KernelResult<ShapeHandle> {
        Self::unavailable()
    }

    fn create_path(
        &self,
        _points: &[DVec3],
        _corners: &[CornerStyle],
        _closed: bool,
    ) -> KernelResult<ShapeHandle> {
        Self::unavailable()
    }

    fn boolean(
        &self,
        _op: BooleanOp,
        _a: &ShapeHandle,
        _b: &ShapeHandle,
    ) -> KernelResult<ShapeHandle> {
        Self::unavailable()
    }

    fn sweep(&self, _profile: &ShapeHandle, _path: &ShapeHandle) -> KernelResult<ShapeHandle> {
        Self::unavailable()
    }

    fn revolve(&self, _profile: &ShapeHandle, _axis: &Axis) -> KernelResult<ShapeHandle> {
        Self::unavailable()
    }

    fn loft(&self, _profiles: &[ShapeHandle]) -> KernelResult<ShapeHandle> {
        Self::unavailable()
    }

    fn set_transform(&self, _handle: &ShapeHandle, _transform: DMat4) -> KernelResult<()> {
        Self::unavailable()
    }

    fn set_pivot(&self, _handle: &ShapeHandle, _pivot: DMat4) -> KernelResult<()> {
        Self::unavailable()
    }

    fn center(&self, _handle: &ShapeHandle) -> KernelResult<DVec3> {
        Self::unavailable()
    }

    fn triangulate(&self, _handle: &ShapeHandle) -> KernelResult<TessellatedMesh> {
        Self::unavailable()
    }

    fn tube_outline(&self, _handle: &ShapeHandle) -> KernelResult<TessellatedMesh> {
        Self::unavailable()
    }

    fn export_stl(&self, _handle: &ShapeHandle, _path: &Path) -> KernelResult<()> {
        Err(KernelError::KernelNotAvailable(
            "No geometry kernel available for STL export".into(),
        ))
    }

    fn free(&self, _handle: &ShapeHandle) {}
}
