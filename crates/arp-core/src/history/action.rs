//! Reversible modeling actions

use glam::{DQuat, DVec3};

use arp_kernel::ShapeHandle;

use crate::error::SceneResult;
use crate::node::{ControlPoint, NodeId, PointId};
use crate::scene::{PathSnapshot, Scene};

/// Local positions of one node before and after a move
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMove {
    pub node: NodeId,
    pub before: DVec3,
    pub after: DVec3,
}

/// A user action that can be undone and redone
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A primitive was placed in the drawing
    PrimitiveBuilt { node: NodeId },
    SweepBuilt { node: NodeId },
    RevolveBuilt { node: NodeId },
    LoftBuilt { node: NodeId },
    /// A profile was appended to an existing loft
    LoftProfileAdded { loft: NodeId, profile: NodeId },
    BooleanCombined { node: NodeId, a: NodeId, b: NodeId },
    Translation { moves: Vec<NodeMove> },
    /// Rotation of a top-level node, found again through its shape handle
    Rotation {
        handle: ShapeHandle,
        rotation_before: DQuat,
        rotation_after: DQuat,
        position_before: DVec3,
        position_after: DVec3,
    },
    Scaling {
        handle: ShapeHandle,
        scale_delta: DVec3,
        position_before: DVec3,
        position_after: DVec3,
    },
    SolidOrHole { node: NodeId, hole: bool },
    /// A point was placed while drawing a path
    PathPointAdded {
        path: NodeId,
        before: PathSnapshot,
        after: PathSnapshot,
    },
    /// A path was finished (closed or ended)
    PathFinished {
        path: NodeId,
        before: PathSnapshot,
        after: PathSnapshot,
    },
    PointInserted {
        path: NodeId,
        point: ControlPoint,
        index: usize,
    },
    /// A control point was dragged, world positions
    PointMoved {
        path: NodeId,
        point: PointId,
        before: DVec3,
        after: DVec3,
    },
    CornerStyleToggled { path: NodeId, point: PointId },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::PrimitiveBuilt { .. } => "build primitive",
            Action::SweepBuilt { .. } => "sweep",
            Action::RevolveBuilt { .. } => "revolve",
            Action::LoftBuilt { .. } => "loft",
            Action::LoftProfileAdded { .. } => "extend loft",
            Action::BooleanCombined { .. } => "combine",
            Action::Translation { .. } => "translate",
            Action::Rotation { .. } => "rotate",
            Action::Scaling { .. } => "scale",
            Action::SolidOrHole { .. } => "solid or hole",
            Action::PathPointAdded { .. } => "add path point",
            Action::PathFinished { .. } => "finish path",
            Action::PointInserted { .. } => "insert point",
            Action::PointMoved { .. } => "move point",
            Action::CornerStyleToggled { .. } => "toggle corner",
        }
    }

    /// Step of drawing a path, discarded once the path becomes part of a shape
    pub fn is_path_action(&self) -> bool {
        matches!(
            self,
            Action::PathPointAdded { .. } | Action::PathFinished { .. }
        )
    }

    /// Turns paths into a solid
    pub fn is_final_shape(&self) -> bool {
        matches!(
            self,
            Action::SweepBuilt { .. }
                | Action::RevolveBuilt { .. }
                | Action::LoftBuilt { .. }
                | Action::LoftProfileAdded { .. }
        )
    }

    /// Nodes the action refers to by id
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Action::PrimitiveBuilt { node }
            | Action::SweepBuilt { node }
            | Action::RevolveBuilt { node }
            | Action::LoftBuilt { node }
            | Action::SolidOrHole { node, .. } => vec![*node],
            Action::LoftProfileAdded { loft, profile } => vec![*loft, *profile],
            Action::BooleanCombined { node, a, b } => vec![*node, *a, *b],
            Action::Translation { moves } => moves.iter().map(|m| m.node).collect(),
            Action::Rotation { .. } | Action::Scaling { .. } => Vec::new(),
            Action::PathPointAdded { path, .. }
            | Action::PathFinished { path, .. }
            | Action::PointInserted { path, .. }
            | Action::PointMoved { path, .. }
            | Action::CornerStyleToggled { path, .. } => vec![*path],
        }
    }

    pub fn undo(&self, scene: &mut Scene) -> SceneResult<()> {
        match self {
            Action::PrimitiveBuilt { node }
            | Action::SweepBuilt { node }
            | Action::RevolveBuilt { node }
            | Action::LoftBuilt { node } => scene.remove_from_parent(*node),
            Action::LoftProfileAdded { loft, profile } => scene.remove_loft_profile(*loft, *profile),
            Action::BooleanCombined { node, .. } => scene.dissolve_composite(*node),
            Action::Translation { moves } => {
                for m in moves {
                    scene.set_position(m.node, m.before)?;
                    scene.apply_transform(m.node)?;
                }
                Ok(())
            }
            Action::Rotation {
                handle,
                rotation_before,
                position_before,
                ..
            } => {
                let Some(node) = find(scene, handle) else {
                    return Ok(());
                };
                scene.set_rotation(node, *rotation_before)?;
                scene.set_position(node, *position_before)?;
                scene.apply_transform(node)
            }
            Action::Scaling {
                handle,
                scale_delta,
                position_before,
                ..
            } => {
                let Some(node) = find(scene, handle) else {
                    return Ok(());
                };
                let scale = scene.node(node)?.pose().scale - *scale_delta;
                scene.set_scale(node, scale)?;
                scene.set_position(node, *position_before)?;
                scene.apply_transform(node)
            }
            Action::SolidOrHole { node, hole } => scene.set_hole(*node, !*hole),
            Action::PathPointAdded { path, before, .. } | Action::PathFinished { path, before, .. } => {
                scene.restore_path(*path, before)
            }
            Action::PointInserted { path, point, .. } => {
                scene.remove_point(*path, point.id)?;
                scene.rebuild(*path)?;
                scene.flatten(*path)
            }
            Action::PointMoved {
                path,
                point,
                before,
                ..
            } => {
                scene.set_point_world(*path, *point, *before)?;
                scene.flatten(*path)
            }
            Action::CornerStyleToggled { path, point } => {
                scene.toggle_corner_style(*path, *point).map(|_| ())
            }
        }
    }

    pub fn redo(&self, scene: &mut Scene) -> SceneResult<()> {
        match self {
            Action::PrimitiveBuilt { node }
            | Action::SweepBuilt { node }
            | Action::RevolveBuilt { node }
            | Action::LoftBuilt { node } => scene.add_child(*node),
            Action::LoftProfileAdded { loft, profile } => scene.add_profile(*loft, *profile),
            Action::BooleanCombined { node, .. } => scene.restore_composite(*node),
            Action::Translation { moves } => {
                for m in moves {
                    scene.set_position(m.node, m.after)?;
                    scene.apply_transform(m.node)?;
                }
                Ok(())
            }
            Action::Rotation {
                handle,
                rotation_after,
                position_after,
                ..
            } => {
                let Some(node) = find(scene, handle) else {
                    return Ok(());
                };
                scene.set_rotation(node, *rotation_after)?;
                scene.set_position(node, *position_after)?;
                scene.apply_transform(node)
            }
            Action::Scaling {
                handle,
                scale_delta,
                position_after,
                ..
            } => {
                let Some(node) = find(scene, handle) else {
                    return Ok(());
                };
                let scale = scene.node(node)?.pose().scale + *scale_delta;
                scene.set_scale(node, scale)?;
                scene.set_position(node, *position_after)?;
                scene.apply_transform(node)
            }
            Action::SolidOrHole { node, hole } => scene.set_hole(*node, *hole),
            Action::PathPointAdded { path, after, .. } | Action::PathFinished { path, after, .. } => {
                scene.restore_path(*path, after)
            }
            Action::PointInserted { path, point, index } => {
                scene.insert_point(*path, *index, point.clone())?;
                scene.rebuild(*path)?;
                scene.flatten(*path)
            }
            Action::PointMoved {
                path, point, after, ..
            } => {
                scene.set_point_world(*path, *point, *after)?;
                scene.flatten(*path)
            }
            Action::CornerStyleToggled { path, point } => {
                scene.toggle_corner_style(*path, *point).map(|_| ())
            }
        }
    }
}

/// Resolve a top-level node through the handle it held when the action was recorded
fn find(scene: &Scene, handle: &ShapeHandle) -> Option<NodeId> {
    let node = scene.find_by_handle(handle);
    if node.is_none() {
        tracing::warn!("No node holds {} any more, skipping", handle);
    }
    node
}
