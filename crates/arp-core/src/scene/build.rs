//! Build and rebuild protocol
//!
//! A build runs in three steps. `prepare_build` snapshots everything the
//! kernel needs into a [`BuildJob`] while the scene is borrowed; the job then
//! runs against the kernel with no access to the scene, possibly on a worker
//! thread; `commit_build` installs the result, provided the node's inputs have
//! not changed in the meantime.

use arp_kernel::{
    BooleanOp, CornerStyle, GeometryKernel, KernelError, KernelResult, PrimitiveKind, ShapeHandle,
    TessellatedMesh,
};
use glam::{DMat4, DVec3};

use super::Scene;
use crate::error::{SceneError, SceneResult};
use crate::node::{
    BuildState, CLOSED_PATH_COLOR, NodeId, NodeKind, OPEN_PATH_COLOR, PathOutline, Pose,
    RevolutionProfile, derive_profile,
};

/// Kernel inputs for one build, in world coordinates
#[derive(Debug, Clone)]
pub enum BuildSpec {
    Primitive {
        kind: PrimitiveKind,
        placement: DMat4,
    },
    Path {
        outline: PathOutline,
        pivot: DMat4,
    },
    Boolean {
        op: BooleanOp,
        a: ShapeHandle,
        b: ShapeHandle,
        pivot: DMat4,
    },
    Sweep {
        profile: ShapeHandle,
        path: ShapeHandle,
        pivot: DMat4,
    },
    Revolution {
        profile: RevolutionProfile,
        pivot: DMat4,
    },
    Loft {
        profiles: Vec<ShapeHandle>,
        pivot: DMat4,
    },
    /// The node's inputs cannot produce a shape
    Unbuildable(String),
}

/// A prepared build, detached from the scene
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub node: NodeId,
    pub generation: u64,
    pub spec: BuildSpec,
    /// Operands whose handles the job reads
    reads: Vec<NodeId>,
}

/// Shape and display meshes produced by a successful build
#[derive(Debug, Clone)]
pub struct BuiltShape {
    pub handle: ShapeHandle,
    pub mesh: TessellatedMesh,
    pub outline: TessellatedMesh,
}

/// Result of running a [`BuildJob`]
#[derive(Debug)]
pub struct BuildOutcome {
    pub node: NodeId,
    pub generation: u64,
    pub result: KernelResult<BuiltShape>,
    reads: Vec<NodeId>,
}

/// What `commit_build` did with an outcome
#[derive(Debug, Clone)]
pub enum CommitStatus {
    /// The node holds the new shape; its parent needs a rebuild
    Built { propagate_to: Option<NodeId> },
    /// The build failed; the node has no shape and its parent needs a rebuild
    Failed {
        propagate_to: Option<NodeId>,
        error: KernelError,
    },
    /// The node changed while the job ran; the result was freed
    Stale,
    /// The node no longer exists; the result was freed
    Discarded,
}

impl BuildJob {
    /// Run the job against `kernel`
    pub fn run(self, kernel: &dyn GeometryKernel) -> BuildOutcome {
        let result = self.spec.execute(kernel);
        BuildOutcome {
            node: self.node,
            generation: self.generation,
            result,
            reads: self.reads,
        }
    }
}

impl BuildSpec {
    fn execute(&self, kernel: &dyn GeometryKernel) -> KernelResult<BuiltShape> {
        let handle = match self {
            BuildSpec::Primitive { kind, .. } => kernel.create_primitive(kind)?,
            BuildSpec::Path { outline, .. } => {
                kernel.create_path(&outline.positions, &outline.corners, outline.closed)?
            }
            BuildSpec::Boolean { op, a, b, .. } => kernel.boolean(*op, a, b)?,
            BuildSpec::Sweep { profile, path, .. } => kernel.sweep(profile, path)?,
            BuildSpec::Revolution { profile, .. } => {
                let wire = kernel.create_path(&profile.points, &profile.corners, true)?;
                let revolved = kernel.revolve(&wire, &profile.axis);
                kernel.free(&wire);
                revolved?
            }
            BuildSpec::Loft { profiles, .. } => kernel.loft(profiles)?,
            BuildSpec::Unbuildable(reason) => {
                return Err(KernelError::GeometryConstructionFailed(reason.clone()));
            }
        };

        match self.finish(kernel, &handle) {
            Ok(built) => Ok(built),
            Err(e) => {
                kernel.free(&handle);
                Err(e)
            }
        }
    }

    /// Place the new shape so its kernel frame matches the node, then tessellate
    fn finish(&self, kernel: &dyn GeometryKernel, handle: &ShapeHandle) -> KernelResult<BuiltShape> {
        match self {
            BuildSpec::Primitive { placement, .. } => kernel.set_transform(handle, *placement)?,
            BuildSpec::Path { pivot, .. }
            | BuildSpec::Boolean { pivot, .. }
            | BuildSpec::Sweep { pivot, .. }
            | BuildSpec::Revolution { pivot, .. }
            | BuildSpec::Loft { pivot, .. } => kernel.set_pivot(handle, *pivot)?,
            BuildSpec::Unbuildable(_) => {}
        }
        Ok(BuiltShape {
            handle: handle.clone(),
            mesh: kernel.triangulate(handle)?,
            outline: kernel.tube_outline(handle)?,
        })
    }
}

/// Display name of a boolean from its operand names
fn boolean_name(op: BooleanOp, a: &str, b: &str) -> String {
    match op {
        BooleanOp::Cut => format!("({}-{})", a, b),
        _ => {
            let (first, second) = if a.chars().count() >= b.chars().count() {
                (a, b)
            } else {
                (b, a)
            };
            format!("({}{}{})", first, op.symbol(), second)
        }
    }
}

impl Scene {
    /// Snapshot the inputs of `id` into a job.
    ///
    /// Operands read by the job are leased until the matching commit, so
    /// their handles outlive the job even if the operands are rebuilt.
    pub fn prepare_build(&mut self, id: NodeId) -> SceneResult<BuildJob> {
        let node = self.node(id)?;
        let generation = node.generation;
        let tolerance = self.config.same_point_tolerance;
        let content_frame = self.content_frame(id)?;
        let operand_pose = node
            .kind
            .pivot_operand()
            .and_then(|op| self.nodes.get(&op))
            .map(|n| n.pose);
        let pivot = content_frame * node.pivot_local(operand_pose.as_ref());

        let stray = node
            .kind
            .operands()
            .into_iter()
            .find(|op| self.nodes.get(op).is_none_or(|n| n.parent != Some(id)));

        let mut reads = Vec::new();
        let mut name = None;
        let mut derived = None;
        let spec = match (&node.kind, stray) {
            (NodeKind::Primitive(kind), _) => BuildSpec::Primitive {
                kind: *kind,
                placement: self.world_transform(id)?,
            },
            (_, Some(operand)) => {
                BuildSpec::Unbuildable(format!("operand {} is not part of this node", operand))
            }
            (NodeKind::Path(shape), _) => {
                let mut outline = shape.outline(tolerance);
                let minimum = if outline.closed { 3 } else { 2 };
                if outline.positions.len() < minimum {
                    BuildSpec::Unbuildable(format!(
                        "path has {} usable points, needs {}",
                        outline.positions.len(),
                        minimum
                    ))
                } else {
                    for p in outline.positions.iter_mut() {
                        *p = content_frame.transform_point3(*p);
                    }
                    BuildSpec::Path { outline, pivot }
                }
            }
            (NodeKind::Boolean { op, a, b }, _) => {
                let names = (self.node(*a)?.name.as_str(), self.node(*b)?.name.as_str());
                name = Some(boolean_name(*op, names.0, names.1));
                match (self.operand_handle(*a), self.operand_handle(*b)) {
                    (Some(ha), Some(hb)) => {
                        reads = vec![*a, *b];
                        BuildSpec::Boolean {
                            op: *op,
                            a: ha,
                            b: hb,
                            pivot,
                        }
                    }
                    _ => BuildSpec::Unbuildable("an operand has no shape".into()),
                }
            }
            (NodeKind::Sweep { profile, path }, _) => {
                match (self.operand_handle(*profile), self.operand_handle(*path)) {
                    (Some(hp), Some(hq)) => {
                        reads = vec![*profile, *path];
                        BuildSpec::Sweep {
                            profile: hp,
                            path: hq,
                            pivot,
                        }
                    }
                    _ => BuildSpec::Unbuildable("an operand has no shape".into()),
                }
            }
            (NodeKind::Revolution { profile, axis, .. }, _) => {
                let profile_points = self.world_points_with_corners(*profile)?;
                let axis_points = self.world_points_with_corners(*axis)?;
                let result = match (axis_points.first(), axis_points.last()) {
                    (Some(start), Some(end)) if axis_points.len() >= 2 => derive_profile(
                        &profile_points,
                        start.0,
                        end.0,
                        self.config.coincidence_tolerance,
                        self.config.revolve_axis_offset,
                    ),
                    _ => None,
                };
                match result {
                    Some(profile) => {
                        derived = Some(profile.clone());
                        BuildSpec::Revolution { profile, pivot }
                    }
                    None => BuildSpec::Unbuildable("profile or axis is degenerate".into()),
                }
            }
            (NodeKind::Loft { profiles }, _) => {
                let handles: Option<Vec<_>> =
                    profiles.iter().map(|p| self.operand_handle(*p)).collect();
                match handles {
                    Some(handles) if !handles.is_empty() => {
                        reads = profiles.clone();
                        BuildSpec::Loft {
                            profiles: handles,
                            pivot,
                        }
                    }
                    _ => BuildSpec::Unbuildable("a profile has no shape".into()),
                }
            }
        };

        let node = self.node_mut(id)?;
        if let Some(name) = name {
            node.name = name;
        }
        if let (NodeKind::Revolution { derived: slot, .. }, Some(profile)) = (&mut node.kind, derived)
        {
            *slot = Some(profile);
        }
        for read in &reads {
            self.begin_lease(*read);
        }

        Ok(BuildJob {
            node: id,
            generation,
            spec,
            reads,
        })
    }

    /// Install the outcome of a job.
    ///
    /// Results for nodes that were removed or changed since `prepare_build`
    /// are freed instead of installed.
    pub fn commit_build(&mut self, outcome: BuildOutcome) -> SceneResult<CommitStatus> {
        let BuildOutcome {
            node: id,
            generation,
            result,
            reads,
        } = outcome;
        for read in reads {
            self.end_lease(read);
        }

        let Some(node) = self.nodes.get(&id) else {
            if let Ok(built) = result {
                tracing::debug!("Dropping {} built for a removed node", built.handle);
                self.kernel.free(&built.handle);
            }
            return Ok(CommitStatus::Discarded);
        };
        if node.generation != generation {
            if let Ok(built) = result {
                tracing::debug!("Dropping stale {} for {}", built.handle, node.name);
                self.kernel.free(&built.handle);
            }
            return Ok(CommitStatus::Stale);
        }
        let propagate_to = node.parent;

        match result {
            Ok(built) => {
                if let Some(old) = self.node_mut(id)?.handle.take() {
                    self.free_handle(id, old);
                }
                self.repivot(id)?;
                let tolerance = self.config.same_point_tolerance;
                let node = self.node_mut(id)?;
                tracing::debug!("Built {} as {}", node.name, built.handle);
                node.handle = Some(built.handle);
                node.state = BuildState::Built;
                node.mesh = Some(built.mesh);
                node.outline = Some(built.outline);
                if let NodeKind::Path(shape) = &node.kind {
                    node.line_color = if shape.closed_for_build(tolerance) {
                        CLOSED_PATH_COLOR
                    } else {
                        OPEN_PATH_COLOR
                    };
                }
                Ok(CommitStatus::Built { propagate_to })
            }
            Err(error) => {
                tracing::warn!("Failed to build {}: {}", node.name, error);
                self.clear_shape(id, BuildState::Failed)?;
                Ok(CommitStatus::Failed {
                    propagate_to,
                    error,
                })
            }
        }
    }

    /// Rebuild `id` synchronously, then every node above it.
    ///
    /// Kernel failures leave the affected nodes in the failed state and are
    /// not returned as errors.
    pub fn rebuild(&mut self, id: NodeId) -> SceneResult<()> {
        let mut next = Some(id);
        while let Some(current) = next {
            let job = self.prepare_build(current)?;
            let outcome = job.run(self.kernel.as_ref());
            next = match self.commit_build(outcome)? {
                CommitStatus::Built { propagate_to } | CommitStatus::Failed { propagate_to, .. } => {
                    propagate_to
                }
                CommitStatus::Stale | CommitStatus::Discarded => None,
            };
        }
        Ok(())
    }

    /// Push the current world transforms of `id` and its subtree to the
    /// kernel, then rebuild the composite containing `id`
    pub fn apply_transform(&mut self, id: NodeId) -> SceneResult<()> {
        self.push_transforms(id)?;
        if let Some(parent) = self.node(id)?.parent {
            self.rebuild(parent)?;
        }
        Ok(())
    }

    fn push_transforms(&self, id: NodeId) -> SceneResult<()> {
        if let Some(handle) = &self.node(id)?.handle {
            self.kernel.set_transform(handle, self.world_transform(id)?)?;
        }
        for child in self.children(id) {
            self.push_transforms(child)?;
        }
        Ok(())
    }

    /// Move the node's origin onto its pivot without moving anything in world
    fn repivot(&mut self, id: NodeId) -> SceneResult<()> {
        let node = self.node(id)?;
        let operand_pose = node
            .kind
            .pivot_operand()
            .and_then(|op| self.nodes.get(&op))
            .map(|n| n.pose);
        let pivot_local = node.pivot_local(operand_pose.as_ref());
        if pivot_local == DMat4::IDENTITY && node.content == DMat4::IDENTITY {
            return Ok(());
        }

        let new_world = self.content_frame(id)? * pivot_local;
        let parent_frame = self.parent_frame(id)?;
        let node = self.node_mut(id)?;
        node.pose = Pose::from_mat4(parent_frame.inverse() * new_world);
        node.content = pivot_local.inverse();
        Ok(())
    }

    fn operand_handle(&self, id: NodeId) -> Option<ShapeHandle> {
        self.nodes.get(&id).and_then(|n| n.handle.clone())
    }

    /// All control points of a path in world coordinates
    fn world_points_with_corners(&self, id: NodeId) -> SceneResult<Vec<(DVec3, CornerStyle)>> {
        let frame = self.content_frame(id)?;
        let shape = self
            .node(id)?
            .kind
            .as_path()
            .ok_or(SceneError::NotAPath(id))?;
        Ok(shape
            .points
            .iter()
            .map(|p| (frame.transform_point3(p.position), p.corner))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::node::ControlPoint;
    use approx::assert_relative_eq;
    use arp_kernel::{KernelCall, PreviewKernel};
    use std::sync::Arc;

    fn scene() -> (Arc<PreviewKernel>, Scene) {
        let kernel = Arc::new(PreviewKernel::new());
        let scene = Scene::new(kernel.clone(), SceneConfig::default());
        (kernel, scene)
    }

    fn sharp(points: &[DVec3]) -> Vec<ControlPoint> {
        points
            .iter()
            .map(|p| ControlPoint::new(*p, CornerStyle::Sharp))
            .collect()
    }

    #[test]
    fn test_boolean_names() {
        assert_eq!(boolean_name(BooleanOp::Cut, "box", "sphere"), "(box-sphere)");
        assert_eq!(boolean_name(BooleanOp::Join, "box", "sphere"), "(sphere+box)");
        assert_eq!(
            boolean_name(BooleanOp::Intersect, "cylinder", "box"),
            "(cylinderxbox)"
        );
    }

    #[test]
    fn test_path_pivots_on_first_point() {
        let (kernel, mut scene) = scene();
        let first = DVec3::new(1.0, 2.0, 3.0);
        let id = scene
            .create_path(sharp(&[first, DVec3::new(2.0, 2.0, 3.0)]), false)
            .unwrap();

        assert_relative_eq!(scene.world_position(id).unwrap().distance(first), 0.0, epsilon = 1e-12);
        let handle = scene.node(id).unwrap().handle().unwrap();
        let frame = kernel.frame(handle).unwrap();
        assert!(frame.abs_diff_eq(scene.world_transform(id).unwrap(), 1e-12));

        let (points, closed) = kernel.path_points(handle).unwrap();
        assert!(!closed);
        assert_relative_eq!(points[1].x, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_point_path_fails_to_build() {
        let (kernel, mut scene) = scene();
        let id = scene.create_path(sharp(&[DVec3::ZERO]), false).unwrap();
        assert_eq!(scene.node(id).unwrap().state(), BuildState::Failed);
        assert!(scene.node(id).unwrap().handle().is_none());
        assert!(kernel.journal().is_empty());
    }

    #[test]
    fn test_failure_propagates_to_parent() {
        let (kernel, mut scene) = scene();
        let profile = scene
            .create_path(sharp(&[DVec3::ZERO, DVec3::X, DVec3::Y]), true)
            .unwrap();
        let path = scene
            .create_path(sharp(&[DVec3::ZERO, DVec3::Z]), false)
            .unwrap();
        let sweep = scene.sweep(profile, path).unwrap();
        assert_eq!(scene.node(sweep).unwrap().state(), BuildState::Built);

        // The path rebuild fails, then the sweep rebuild fails for lack of an operand
        kernel.fail_next(1);
        scene.invalidate(path).unwrap();
        scene.rebuild(path).unwrap();
        assert_eq!(scene.node(path).unwrap().state(), BuildState::Failed);
        assert_eq!(scene.node(sweep).unwrap().state(), BuildState::Failed);
        assert!(scene.node(sweep).unwrap().mesh().is_none());

        scene.rebuild(path).unwrap();
        assert_eq!(scene.node(sweep).unwrap().state(), BuildState::Built);
        assert_eq!(kernel.live_handles(), scene.live_handles());
        assert!(kernel.violations().is_empty());
    }

    #[test]
    fn test_stale_outcome_is_freed() {
        let (kernel, mut scene) = scene();
        let id = scene
            .create_path(sharp(&[DVec3::ZERO, DVec3::X]), false)
            .unwrap();
        let held = scene.node(id).unwrap().handle().cloned();

        let job = scene.prepare_build(id).unwrap();
        scene.invalidate(id).unwrap();
        let outcome = job.run(kernel.as_ref());
        let produced = outcome.result.as_ref().map(|b| b.handle.clone()).unwrap();

        assert!(matches!(
            scene.commit_build(outcome).unwrap(),
            CommitStatus::Stale
        ));
        assert!(!kernel.is_live(&produced));
        assert_eq!(scene.node(id).unwrap().handle().cloned(), held);
    }

    #[test]
    fn test_revolution_frees_temporary_profile() {
        let (kernel, mut scene) = scene();
        let profile = scene
            .create_path(
                sharp(&[
                    DVec3::new(0.5, 0.0, 0.0),
                    DVec3::new(0.8, 0.5, 0.0),
                    DVec3::new(0.4, 1.0, 0.0),
                ]),
                false,
            )
            .unwrap();
        let axis = scene
            .create_path(sharp(&[DVec3::ZERO, DVec3::new(0.0, 1.0, 0.0)]), false)
            .unwrap();
        kernel.clear_journal();

        let revolution = scene.revolve(profile, axis).unwrap();
        let node = scene.node(revolution).unwrap();
        assert_eq!(node.state(), BuildState::Built);
        let NodeKind::Revolution { derived, .. } = &node.kind else {
            panic!("not a revolution");
        };
        assert_eq!(derived.as_ref().map(|d| d.points.len()), Some(5));

        let journal = kernel.journal();
        let wire = journal
            .iter()
            .find_map(|call| match call {
                KernelCall::CreatePath { output, .. } => output.clone(),
                _ => None,
            })
            .unwrap();
        assert!(journal.contains(&KernelCall::Free(wire)));
        assert_eq!(kernel.live_handles(), scene.live_handles());
    }

    #[test]
    fn test_apply_transform_moves_subtree() {
        let (kernel, mut scene) = scene();
        let a = scene
            .create_primitive(
                PrimitiveKind::Box {
                    width: 1.0,
                    height: 1.0,
                    length: 1.0,
                },
                Pose::IDENTITY,
            )
            .unwrap();
        let b = scene
            .create_primitive(PrimitiveKind::Sphere { radius: 0.5 }, Pose::IDENTITY)
            .unwrap();
        let combined = scene.combine(a, b, BooleanOp::Join).unwrap();

        scene
            .set_position(combined, DVec3::new(0.0, 3.0, 0.0))
            .unwrap();
        scene.apply_transform(combined).unwrap();

        let frame = kernel.frame(scene.node(a).unwrap().handle().unwrap()).unwrap();
        assert_relative_eq!(frame.w_axis.y, 3.0, epsilon = 1e-12);
        assert_relative_eq!(scene.world_position(b).unwrap().y, 3.0, epsilon = 1e-12);
    }
}
