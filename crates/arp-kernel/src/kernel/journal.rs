//! Call journal and handle-discipline violations recorded by the preview kernel

use std::fmt;

use super::traits::{BooleanOp, PrimitiveKind, ShapeHandle};

/// One call made against the kernel, in the order it was received
#[derive(Debug, Clone, PartialEq)]
pub enum KernelCall {
    CreatePrimitive {
        kind: PrimitiveKind,
        output: Option<ShapeHandle>,
    },
    CreatePath {
        point_count: usize,
        closed: bool,
        output: Option<ShapeHandle>,
    },
    Boolean {
        op: BooleanOp,
        a: ShapeHandle,
        b: ShapeHandle,
        output: Option<ShapeHandle>,
    },
    Sweep {
        profile: ShapeHandle,
        path: ShapeHandle,
        output: Option<ShapeHandle>,
    },
    Revolve {
        profile: ShapeHandle,
        output: Option<ShapeHandle>,
    },
    Loft {
        profiles: Vec<ShapeHandle>,
        output: Option<ShapeHandle>,
    },
    SetTransform(ShapeHandle),
    SetPivot(ShapeHandle),
    Center(ShapeHandle),
    Triangulate(ShapeHandle),
    TubeOutline(ShapeHandle),
    ExportStl(ShapeHandle),
    Free(ShapeHandle),
}

impl KernelCall {
    /// Handle produced by a construction call, if it succeeded
    pub fn output(&self) -> Option<&ShapeHandle> {
        match self {
            KernelCall::CreatePrimitive { output, .. }
            | KernelCall::CreatePath { output, .. }
            | KernelCall::Boolean { output, .. }
            | KernelCall::Sweep { output, .. }
            | KernelCall::Revolve { output, .. }
            | KernelCall::Loft { output, .. } => output.as_ref(),
            _ => None,
        }
    }

    /// Whether this call asks the kernel to construct a new shape
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            KernelCall::CreatePrimitive { .. }
                | KernelCall::CreatePath { .. }
                | KernelCall::Boolean { .. }
                | KernelCall::Sweep { .. }
                | KernelCall::Revolve { .. }
                | KernelCall::Loft { .. }
        )
    }

    /// Short operation name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            KernelCall::CreatePrimitive { .. } => "create_primitive",
            KernelCall::CreatePath { .. } => "create_path",
            KernelCall::Boolean { .. } => "boolean",
            KernelCall::Sweep { .. } => "sweep",
            KernelCall::Revolve { .. } => "revolve",
            KernelCall::Loft { .. } => "loft",
            KernelCall::SetTransform(_) => "set_transform",
            KernelCall::SetPivot(_) => "set_pivot",
            KernelCall::Center(_) => "center",
            KernelCall::Triangulate(_) => "triangulate",
            KernelCall::TubeOutline(_) => "tube_outline",
            KernelCall::ExportStl(_) => "export_stl",
            KernelCall::Free(_) => "free",
        }
    }
}

/// A breach of the handle ownership discipline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleViolation {
    /// A freed handle was passed to the kernel again
    UseAfterFree(ShapeHandle),
    /// A handle was freed a second time
    DoubleFree(ShapeHandle),
    /// A handle the kernel never issued was used
    Unknown(ShapeHandle),
}

impl fmt::Display for HandleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleViolation::UseAfterFree(h) => write!(f, "use after free of {h}"),
            HandleViolation::DoubleFree(h) => write!(f, "double free of {h}"),
            HandleViolation::Unknown(h) => write!(f, "unknown handle {h}"),
        }
    }
}
