//! Geometry scene graph for pen-based modeling
//!
//! This crate provides:
//! - Geometry nodes (primitives, paths, booleans, sweeps, revolutions, lofts)
//!   kept in a scene arena with parent/child placement
//! - The build, rebuild and propagation protocol against a `GeometryKernel`
//! - Control-point editing, flattening and dimensionality analysis for paths
//! - A background rebuild scheduler on a rayon pool
//! - The undo/redo action log

pub mod config;
pub mod error;
pub mod geometry;
pub mod history;
pub mod node;
pub mod scene;
pub mod scheduler;

// Re-exports for convenience
pub use config::SceneConfig;
pub use error::{SceneError, SceneResult};
pub use history::{Action, ActionLog, ActionObserver, NodeMove};
pub use node::{
    BuildState, ControlPoint, GeometryNode, NodeFlags, NodeId, NodeKind, PathShape, PointId, Pose,
    RevolutionProfile,
};
pub use scene::{BuildJob, BuildOutcome, BuildSpec, BuiltShape, CommitStatus, PathSnapshot, Scene};
pub use scheduler::RebuildScheduler;
