//! Scene container
//!
//! The scene owns every geometry node in an arena keyed by id, the list of
//! top-level nodes, and the kernel the nodes build against. All mutation goes
//! through `&mut Scene`, so it happens on whichever thread owns the scene;
//! only prepared build jobs travel to worker threads.

mod build;
mod path_ops;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use arp_kernel::{BooleanOp, GeometryKernel, PrimitiveKind, ShapeHandle};
use glam::{DMat4, DQuat, DVec3};

use crate::config::SceneConfig;
use crate::error::{SceneError, SceneResult};
use crate::node::{BuildState, ControlPoint, GeometryNode, NodeId, NodeKind, PathShape, Pose};

pub use build::{BuildJob, BuildOutcome, BuildSpec, BuiltShape, CommitStatus};
pub use path_ops::PathSnapshot;

/// The geometry scene graph
pub struct Scene {
    kernel: Arc<dyn GeometryKernel>,
    config: SceneConfig,
    nodes: HashMap<NodeId, GeometryNode>,
    /// Top-level nodes, in insertion order
    roots: Vec<NodeId>,
    cursor: DVec3,
    /// Number of in-flight builds reading each node's handle
    leases: HashMap<NodeId, usize>,
    /// Handles to free once the leases on their node end
    deferred_frees: HashMap<NodeId, Vec<ShapeHandle>>,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("kernel", &self.kernel.name())
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .finish()
    }
}

impl Scene {
    /// Create an empty scene building against `kernel`
    pub fn new(kernel: Arc<dyn GeometryKernel>, config: SceneConfig) -> Self {
        if kernel.is_available() {
            tracing::debug!("Creating scene with {} kernel", kernel.name());
        } else {
            tracing::warn!("Kernel {} is not available, builds will fail", kernel.name());
        }
        Self {
            kernel,
            config,
            nodes: HashMap::new(),
            roots: Vec::new(),
            cursor: DVec3::ZERO,
            leases: HashMap::new(),
            deferred_frees: HashMap::new(),
        }
    }

    pub fn kernel(&self) -> Arc<dyn GeometryKernel> {
        Arc::clone(&self.kernel)
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    // ============== Arena ==============

    pub fn get(&self, id: NodeId) -> Option<&GeometryNode> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: NodeId) -> SceneResult<&GeometryNode> {
        self.nodes.get(&id).ok_or(SceneError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> SceneResult<&mut GeometryNode> {
        self.nodes.get_mut(&id).ok_or(SceneError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes in the arena, attached or not
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GeometryNode> {
        self.nodes.values()
    }

    fn insert(&mut self, node: GeometryNode) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    // ============== Hierarchy ==============

    /// Top-level nodes of the drawing
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Operands currently parented under `id`
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| {
                node.kind
                    .operands()
                    .into_iter()
                    .filter(|op| self.nodes.get(op).is_some_and(|n| n.parent == Some(id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parent chain of `id`, nearest first
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.nodes.get(&parent).and_then(|n| n.parent);
        }
        chain
    }

    /// Every node below `id`, depth first
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = self.children(id);
        while let Some(next) = stack.pop() {
            stack.extend(self.children(next));
            out.push(next);
        }
        out
    }

    /// Whether the node is part of the drawing, directly or through its composite
    pub fn is_attached(&self, id: NodeId) -> bool {
        let top = self.ancestors(id).last().copied().unwrap_or(id);
        self.nodes.contains_key(&id) && self.roots.contains(&top)
    }

    /// Add a node to the top level of the drawing.
    ///
    /// A node nested in a composite is moved out of it keeping its world
    /// placement. A node that was never built is built now.
    pub fn add_child(&mut self, id: NodeId) -> SceneResult<()> {
        let node = self.node(id)?;
        let needs_build = node.state == BuildState::Unbuilt;
        if node.parent.is_some() {
            self.reparent(id, None)?;
        }
        if !self.roots.contains(&id) {
            self.roots.push(id);
            tracing::info!("Attached {} to the drawing", self.node(id)?.name);
        }
        if needs_build {
            self.rebuild(id)?;
        }
        Ok(())
    }

    /// Detach a top-level node from the drawing. Its handle stays alive.
    pub fn remove_from_parent(&mut self, id: NodeId) -> SceneResult<()> {
        let node = self.node(id)?;
        if node.parent.is_some() {
            return Err(SceneError::InvalidOperandTopology(format!(
                "{} is an operand of another node",
                node.name
            )));
        }
        tracing::info!("Detached {} from the drawing", node.name);
        self.roots.retain(|r| *r != id);
        Ok(())
    }

    /// Move `id` under `parent` (or to the top level) keeping its world placement
    pub(crate) fn reparent(&mut self, id: NodeId, parent: Option<NodeId>) -> SceneResult<()> {
        let world = self.world_transform(id)?;
        let frame = match parent {
            Some(p) => self.content_frame(p)?,
            None => DMat4::IDENTITY,
        };
        let node = self.node_mut(id)?;
        node.parent = parent;
        node.pose = Pose::from_mat4(frame.inverse() * world);
        if parent.is_some() {
            self.roots.retain(|r| *r != id);
        }
        Ok(())
    }

    /// Nodes that are neither in the drawing nor inside another node
    pub fn detached_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.parent.is_none() && !self.roots.contains(&n.id))
            .map(|n| n.id)
            .collect()
    }

    // ============== Transforms ==============

    /// Frame the node's pose is relative to
    pub fn parent_frame(&self, id: NodeId) -> SceneResult<DMat4> {
        match self.node(id)?.parent {
            Some(parent) => self.content_frame(parent),
            None => Ok(DMat4::IDENTITY),
        }
    }

    pub fn world_transform(&self, id: NodeId) -> SceneResult<DMat4> {
        Ok(self.parent_frame(id)? * self.node(id)?.pose.to_mat4())
    }

    pub fn world_position(&self, id: NodeId) -> SceneResult<DVec3> {
        Ok(self.world_transform(id)?.transform_point3(DVec3::ZERO))
    }

    /// World frame of the node's operand subtree
    pub fn content_frame(&self, id: NodeId) -> SceneResult<DMat4> {
        Ok(self.world_transform(id)? * self.node(id)?.content)
    }

    pub fn set_pose(&mut self, id: NodeId, pose: Pose) -> SceneResult<()> {
        self.node_mut(id)?.pose = pose;
        self.invalidate(id)
    }

    pub fn set_position(&mut self, id: NodeId, position: DVec3) -> SceneResult<()> {
        self.node_mut(id)?.pose.position = position;
        self.invalidate(id)
    }

    pub fn set_rotation(&mut self, id: NodeId, rotation: DQuat) -> SceneResult<()> {
        self.node_mut(id)?.pose.rotation = rotation;
        self.invalidate(id)
    }

    pub fn set_scale(&mut self, id: NodeId, scale: DVec3) -> SceneResult<()> {
        self.node_mut(id)?.pose.scale = scale;
        self.invalidate(id)
    }

    /// Mark the inputs of `id` and of every node above it as changed
    pub fn invalidate(&mut self, id: NodeId) -> SceneResult<()> {
        self.node_mut(id)?.generation += 1;
        for ancestor in self.ancestors(id) {
            if let Some(node) = self.nodes.get_mut(&ancestor) {
                node.generation += 1;
            }
        }
        Ok(())
    }

    /// Current cursor (pen tip) position in world coordinates
    pub fn cursor_position(&self) -> DVec3 {
        self.cursor
    }

    pub fn set_cursor_position(&mut self, position: DVec3) {
        self.cursor = position;
    }

    // ============== Flags ==============

    pub fn set_hole(&mut self, id: NodeId, hole: bool) -> SceneResult<()> {
        self.node_mut(id)?.set_hole(hole);
        Ok(())
    }

    pub fn set_highlighted(&mut self, id: NodeId, highlighted: bool) -> SceneResult<()> {
        self.node_mut(id)?.flags.highlighted = highlighted;
        Ok(())
    }

    pub fn set_selected(&mut self, id: NodeId, selected: bool) -> SceneResult<()> {
        self.node_mut(id)?.flags.selected = selected;
        Ok(())
    }

    /// Show the operand subtree of a composite instead of its own mesh
    pub fn set_visited(&mut self, id: NodeId, visited: bool) -> SceneResult<()> {
        self.node_mut(id)?.flags.visited = visited;
        Ok(())
    }

    /// Whether the node's own mesh is currently shown
    pub fn is_visible(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if node.state != BuildState::Built || (node.flags.visited && !node.is_path()) {
            return false;
        }
        let content_shown = self
            .ancestors(id)
            .iter()
            .all(|a| self.nodes.get(a).is_some_and(|n| n.flags.visited));
        content_shown && self.is_attached(id)
    }

    // ============== Handles ==============

    /// Find a top-level node by the handle it currently holds
    pub fn find_by_handle(&self, handle: &ShapeHandle) -> Option<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).and_then(|n| n.handle.as_ref()) == Some(handle))
    }

    /// Handles currently held by nodes, sorted
    pub fn live_handles(&self) -> Vec<ShapeHandle> {
        let mut handles: Vec<_> = self
            .nodes
            .values()
            .filter_map(|n| n.handle.clone())
            .collect();
        handles.sort();
        handles
    }

    pub(crate) fn free_handle(&mut self, owner: NodeId, handle: ShapeHandle) {
        if self.leases.get(&owner).is_some_and(|count| *count > 0) {
            tracing::debug!("Deferring free of {} until its readers finish", handle);
            self.deferred_frees.entry(owner).or_default().push(handle);
        } else {
            self.kernel.free(&handle);
        }
    }

    pub(crate) fn begin_lease(&mut self, id: NodeId) {
        *self.leases.entry(id).or_default() += 1;
    }

    pub(crate) fn end_lease(&mut self, id: NodeId) {
        let remaining = match self.leases.get_mut(&id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.leases.remove(&id);
            for handle in self.deferred_frees.remove(&id).unwrap_or_default() {
                self.kernel.free(&handle);
            }
        }
    }

    /// Drop the node's shape and display meshes
    pub(crate) fn clear_shape(&mut self, id: NodeId, state: BuildState) -> SceneResult<()> {
        let node = self.node_mut(id)?;
        let old = node.handle.take();
        node.state = state;
        node.mesh = None;
        node.outline = None;
        if let Some(handle) = old {
            self.free_handle(id, handle);
        }
        Ok(())
    }

    /// Remove a top-level node from the drawing and free its shape.
    ///
    /// Operands are left alone; the node stays in the arena until the action
    /// log no longer refers to it.
    pub fn delete_node(&mut self, id: NodeId) -> SceneResult<()> {
        self.remove_from_parent(id)?;
        self.clear_shape(id, BuildState::Unbuilt)?;
        self.invalidate(id)
    }

    /// Free a detached node and everything below it, and drop them from the arena
    pub(crate) fn release(&mut self, id: NodeId) -> SceneResult<()> {
        let node = self.node(id)?;
        if node.parent.is_some() || self.roots.contains(&id) {
            return Err(SceneError::InvalidOperandTopology(format!(
                "{} is still part of the drawing",
                node.name
            )));
        }
        let mut subtree = self.descendants(id);
        subtree.push(id);
        for member in subtree {
            if let Some(node) = self.nodes.remove(&member) {
                tracing::debug!("Releasing {}", node.name);
                if let Some(handle) = node.handle {
                    self.free_handle(member, handle);
                }
            }
        }
        Ok(())
    }

    /// Release every detached node whose subtree holds none of `keep`
    pub(crate) fn release_unreferenced(&mut self, keep: &HashSet<NodeId>) -> SceneResult<usize> {
        let mut released = 0;
        for id in self.detached_nodes() {
            let referenced =
                keep.contains(&id) || self.descendants(id).iter().any(|d| keep.contains(d));
            if !referenced {
                self.release(id)?;
                released += 1;
            }
        }
        Ok(released)
    }

    /// Write the node's shape as STL
    pub fn export_stl(&self, id: NodeId, path: impl AsRef<Path>) -> SceneResult<()> {
        let handle = self.node(id)?.handle.as_ref().ok_or(SceneError::NotBuilt(id))?;
        self.kernel.export_stl(handle, path.as_ref())?;
        Ok(())
    }

    /// Bounding-box center of the node's shape in world coordinates
    pub fn shape_center(&self, id: NodeId) -> SceneResult<DVec3> {
        let handle = self.node(id)?.handle.as_ref().ok_or(SceneError::NotBuilt(id))?;
        Ok(self.kernel.center(handle)?)
    }

    // ============== Construction ==============

    /// Place a primitive in the drawing
    pub fn create_primitive(&mut self, kind: PrimitiveKind, pose: Pose) -> SceneResult<NodeId> {
        if !kind.is_valid() {
            return Err(SceneError::InvalidOperandTopology(format!(
                "{} dimensions must be positive",
                kind.name()
            )));
        }
        let id = self.insert(GeometryNode::new(NodeKind::Primitive(kind)).with_pose(pose));
        self.roots.push(id);
        self.rebuild(id)?;
        tracing::info!("Created {}", kind.name());
        Ok(id)
    }

    /// Place a path through world-space control points
    pub fn create_path(&mut self, points: Vec<ControlPoint>, closed: bool) -> SceneResult<NodeId> {
        if points.is_empty() {
            return Err(SceneError::InvalidOperandTopology(
                "a path needs at least one point".into(),
            ));
        }
        let id = self.insert(GeometryNode::new(NodeKind::Path(PathShape::new(
            points, closed,
        ))));
        self.roots.push(id);
        self.rebuild(id)?;
        Ok(id)
    }

    /// Combine two top-level nodes with a boolean operation
    pub fn combine(&mut self, a: NodeId, b: NodeId, op: BooleanOp) -> SceneResult<NodeId> {
        if a == b {
            return Err(SceneError::InvalidOperandTopology(
                "a boolean needs two distinct operands".into(),
            ));
        }
        self.check_free_operand(a)?;
        self.check_free_operand(b)?;
        let color = self.node(a)?.color;

        let mut node = GeometryNode::new(NodeKind::Boolean { op, a, b });
        node.color = color;
        self.create_composite(node)
    }

    /// Sweep a profile path along a second path
    pub fn sweep(&mut self, profile: NodeId, path: NodeId) -> SceneResult<NodeId> {
        if profile == path {
            return Err(SceneError::InvalidOperandTopology(
                "profile and path must differ".into(),
            ));
        }
        self.check_path_operand(profile, 1)?;
        self.check_path_operand(path, 2)?;
        if self
            .path_shape(path)?
            .closed_for_build(self.config.same_point_tolerance)
        {
            return Err(SceneError::InvalidOperandTopology(
                "the sweep path must be open".into(),
            ));
        }
        self.create_composite(GeometryNode::new(NodeKind::Sweep { profile, path }))
    }

    /// Revolve a profile path around the line given by a two-point axis path
    pub fn revolve(&mut self, profile: NodeId, axis: NodeId) -> SceneResult<NodeId> {
        if profile == axis {
            return Err(SceneError::InvalidOperandTopology(
                "profile and axis must differ".into(),
            ));
        }
        self.check_path_operand(profile, 2)?;
        self.check_path_operand(axis, 2)?;
        self.create_composite(GeometryNode::new(NodeKind::Revolution {
            profile,
            axis,
            derived: None,
        }))
    }

    /// Loft through profile paths in the given order
    pub fn loft(&mut self, profiles: Vec<NodeId>) -> SceneResult<NodeId> {
        if profiles.is_empty() {
            return Err(SceneError::InvalidOperandTopology(
                "a loft needs at least one profile".into(),
            ));
        }
        let unique: HashSet<_> = profiles.iter().collect();
        if unique.len() != profiles.len() {
            return Err(SceneError::InvalidOperandTopology(
                "loft profiles must be distinct".into(),
            ));
        }
        for profile in &profiles {
            self.check_path_operand(*profile, 1)?;
        }
        self.create_composite(GeometryNode::new(NodeKind::Loft { profiles }))
    }

    /// Append a profile to an existing loft and rebuild it
    pub fn add_profile(&mut self, loft: NodeId, profile: NodeId) -> SceneResult<()> {
        self.check_path_operand(profile, 1)?;
        match &mut self.node_mut(loft)?.kind {
            NodeKind::Loft { profiles } => {
                if profiles.contains(&profile) {
                    return Err(SceneError::InvalidOperandTopology(
                        "profile is already part of the loft".into(),
                    ));
                }
                profiles.push(profile);
            }
            _ => {
                return Err(SceneError::InvalidOperandTopology(
                    "profiles can only be added to a loft".into(),
                ));
            }
        }
        self.reparent(profile, Some(loft))?;
        self.invalidate(loft)?;
        self.rebuild(loft)
    }

    /// Take a profile back out of a loft, returning it to the drawing
    pub fn remove_loft_profile(&mut self, loft: NodeId, profile: NodeId) -> SceneResult<()> {
        match &mut self.node_mut(loft)?.kind {
            NodeKind::Loft { profiles } if profiles.len() > 1 && profiles.contains(&profile) => {
                profiles.retain(|p| *p != profile);
            }
            _ => {
                return Err(SceneError::InvalidOperandTopology(
                    "not a removable profile of this loft".into(),
                ));
            }
        }
        self.reparent(profile, None)?;
        self.roots.push(profile);
        self.invalidate(loft)?;
        self.rebuild(loft)
    }

    /// Detach a composite and return its operands to the drawing, unchanged
    pub fn dissolve_composite(&mut self, id: NodeId) -> SceneResult<()> {
        let operands = self.children(id);
        for operand in &operands {
            self.reparent(*operand, None)?;
            self.roots.push(*operand);
        }
        self.roots.retain(|r| *r != id);
        self.invalidate(id)?;
        tracing::info!("Dissolved {} into {} operands", self.node(id)?.name, operands.len());
        Ok(())
    }

    /// Put a dissolved composite back together and rebuild it
    pub fn restore_composite(&mut self, id: NodeId) -> SceneResult<()> {
        let operands = self.node(id)?.kind.operands();
        for operand in &operands {
            self.check_free_operand(*operand)?;
        }
        // The composite's frame is stale until the rebuild re-pivots it
        let node = self.node_mut(id)?;
        node.pose = Pose::IDENTITY;
        node.content = DMat4::IDENTITY;
        for operand in operands {
            self.reparent(operand, Some(id))?;
        }
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        self.invalidate(id)?;
        self.rebuild(id)?;
        tracing::info!("Restored {}", self.node(id)?.name);
        Ok(())
    }

    fn create_composite(&mut self, node: GeometryNode) -> SceneResult<NodeId> {
        let operands = node.kind.operands();
        let id = self.insert(node);
        for operand in operands {
            self.reparent(operand, Some(id))?;
        }
        self.roots.push(id);
        self.rebuild(id)?;
        tracing::info!("Created {}", self.node(id)?.name);
        Ok(id)
    }

    fn check_free_operand(&self, id: NodeId) -> SceneResult<()> {
        let node = self.node(id)?;
        if node.parent.is_some() {
            return Err(SceneError::InvalidOperandTopology(format!(
                "{} already belongs to another node",
                node.name
            )));
        }
        Ok(())
    }

    fn check_path_operand(&self, id: NodeId, min_points: usize) -> SceneResult<()> {
        self.check_free_operand(id)?;
        let shape = self.path_shape(id)?;
        if shape.points.len() < min_points {
            return Err(SceneError::InvalidOperandTopology(format!(
                "path needs at least {} points, has {}",
                min_points,
                shape.points.len()
            )));
        }
        Ok(())
    }
}
