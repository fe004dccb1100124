//! Scene error type

use arp_kernel::KernelError;

use crate::node::{NodeId, PointId};

/// Scene-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SceneError {
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Invalid operand topology: {0}")]
    InvalidOperandTopology(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node is not a path: {0}")]
    NotAPath(NodeId),

    #[error("Node has no shape: {0}")]
    NotBuilt(NodeId),

    #[error("Control point not found: {0}")]
    PointNotFound(PointId),

    #[error("Control points are not adjacent")]
    PointsNotAdjacent,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// Result type for scene operations
pub type SceneResult<T> = Result<T, SceneError>;
