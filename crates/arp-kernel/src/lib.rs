//! Geometry Kernel Gateway
//!
//! This crate provides:
//! - The `GeometryKernel` trait, a synchronous facade over a B-rep kernel
//! - Opaque shape handles and the value types crossing the kernel boundary
//! - A `NullKernel` for environments without geometry support
//! - A `PreviewKernel` that keeps shapes in memory, journals every call and
//!   produces approximate meshes (used for previews and tests)
//! - Tessellated mesh utilities and STL export

pub mod constants;
pub mod kernel;
pub mod mesh;

// Re-exports for convenience
pub use kernel::{
    Axis, BooleanOp, CornerStyle, GeometryKernel, HandleViolation, KernelCall, KernelError,
    KernelResult, NullKernel, PreviewKernel, PrimitiveKind, ShapeHandle,
};
pub use mesh::{StlError, TessellatedMesh, write_stl};
