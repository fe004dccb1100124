//! Control-point editing on path nodes

use arp_kernel::CornerStyle;
use glam::DVec3;

use super::Scene;
use crate::error::{SceneError, SceneResult};
use crate::geometry::{self, centroid, flattened};
use crate::node::{BuildState, ControlPoint, NodeId, PathShape, PointId};

/// Saved state of a path, used to undo drawing steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathSnapshot {
    pub points: Vec<ControlPoint>,
    pub closed: bool,
    /// Whether the path was part of the drawing
    pub attached: bool,
}

impl Scene {
    pub fn path_shape(&self, id: NodeId) -> SceneResult<&PathShape> {
        self.node(id)?.kind.as_path().ok_or(SceneError::NotAPath(id))
    }

    fn path_shape_mut(&mut self, id: NodeId) -> SceneResult<&mut PathShape> {
        self.node_mut(id)?
            .kind
            .as_path_mut()
            .ok_or(SceneError::NotAPath(id))
    }

    fn to_local(&self, path: NodeId, world: DVec3) -> SceneResult<DVec3> {
        Ok(self.content_frame(path)?.inverse().transform_point3(world))
    }

    /// Add a point at a world position to the end of a path. Does not rebuild.
    pub fn append_point(
        &mut self,
        path: NodeId,
        world: DVec3,
        corner: CornerStyle,
        fixed: bool,
    ) -> SceneResult<PointId> {
        let local = self.to_local(path, world)?;
        let point = if fixed {
            ControlPoint::new(local, corner)
        } else {
            ControlPoint::floating(local, corner)
        };
        let id = point.id;
        self.path_shape_mut(path)?.points.push(point);
        self.invalidate(path)?;
        Ok(id)
    }

    /// Insert a point given in the path's own frame. Does not rebuild.
    pub fn insert_point(&mut self, path: NodeId, index: usize, point: ControlPoint) -> SceneResult<()> {
        let shape = self.path_shape_mut(path)?;
        let index = index.min(shape.points.len());
        shape.points.insert(index, point);
        self.invalidate(path)
    }

    pub fn remove_last_point(&mut self, path: NodeId) -> SceneResult<Option<ControlPoint>> {
        let removed = self.path_shape_mut(path)?.points.pop();
        self.invalidate(path)?;
        Ok(removed)
    }

    /// Remove a point. Does not rebuild.
    pub fn remove_point(&mut self, path: NodeId, point: PointId) -> SceneResult<(usize, ControlPoint)> {
        let shape = self.path_shape_mut(path)?;
        let index = shape.index_of(point).ok_or(SceneError::PointNotFound(point))?;
        let removed = shape.points.remove(index);
        self.invalidate(path)?;
        Ok((index, removed))
    }

    pub fn remove_non_fixed_points(&mut self, path: NodeId) -> SceneResult<()> {
        self.path_shape_mut(path)?.remove_non_fixed_points();
        self.invalidate(path)
    }

    /// The point still following the cursor, if any
    pub fn non_fixed_point(&self, path: NodeId) -> SceneResult<Option<PointId>> {
        Ok(self.path_shape(path)?.non_fixed_point().map(|p| p.id))
    }

    pub fn set_point_fixed(&mut self, path: NodeId, point: PointId, fixed: bool) -> SceneResult<()> {
        self.path_shape_mut(path)?
            .point_mut(point)
            .ok_or(SceneError::PointNotFound(point))?
            .set_fixed(fixed);
        self.invalidate(path)
    }

    pub fn set_point_active(&mut self, path: NodeId, point: PointId, active: bool) -> SceneResult<()> {
        self.path_shape_mut(path)?
            .point_mut(point)
            .ok_or(SceneError::PointNotFound(point))?
            .active = active;
        self.invalidate(path)
    }

    /// Set the explicit closed flag. Does not rebuild.
    pub fn set_closed(&mut self, path: NodeId, closed: bool) -> SceneResult<()> {
        self.path_shape_mut(path)?.closed = closed;
        self.invalidate(path)
    }

    pub fn point_world(&self, path: NodeId, point: PointId) -> SceneResult<DVec3> {
        let local = self
            .path_shape(path)?
            .point(point)
            .ok_or(SceneError::PointNotFound(point))?
            .position;
        Ok(self.content_frame(path)?.transform_point3(local))
    }

    /// Positions of all control points in world coordinates
    pub fn points_world(&self, path: NodeId) -> SceneResult<Vec<DVec3>> {
        let frame = self.content_frame(path)?;
        Ok(self
            .path_shape(path)?
            .points
            .iter()
            .map(|p| frame.transform_point3(p.position))
            .collect())
    }

    /// Mean of the control points in world coordinates
    pub fn path_center(&self, path: NodeId) -> SceneResult<DVec3> {
        Ok(centroid(&self.points_world(path)?))
    }

    /// Direction of largest spread of the control points, or zero for an empty path
    pub fn principal_component(&self, path: NodeId) -> SceneResult<DVec3> {
        Ok(geometry::principal_direction(&self.points_world(path)?).unwrap_or(DVec3::ZERO))
    }

    /// 0, 1, 2 or 3 depending on whether the points coincide, lie on a line,
    /// lie on a plane or span space
    pub fn coincident_dimensions(&self, path: NodeId) -> SceneResult<usize> {
        Ok(geometry::coincident_dimensions(
            &self.points_world(path)?,
            self.config.coincidence_tolerance,
        ))
    }

    /// Project the control points onto their best plane and rebuild
    pub fn flatten(&mut self, path: NodeId) -> SceneResult<()> {
        let flat = flattened(&self.points_world(path)?, self.config.coincidence_tolerance);
        let inverse = self.content_frame(path)?.inverse();
        let shape = self.path_shape_mut(path)?;
        for (point, world) in shape.points.iter_mut().zip(flat) {
            point.position = inverse.transform_point3(world);
        }
        self.invalidate(path)?;
        self.rebuild(path)
    }

    /// Insert a point halfway between two neighbouring points, then rebuild
    /// and flatten. Returns the new point and its index.
    pub fn insert_between(
        &mut self,
        path: NodeId,
        first: PointId,
        second: PointId,
    ) -> SceneResult<(PointId, usize)> {
        let shape = self.path_shape(path)?;
        let i = shape.index_of(first).ok_or(SceneError::PointNotFound(first))?;
        let j = shape.index_of(second).ok_or(SceneError::PointNotFound(second))?;
        let index = shape
            .insertion_index(i, j)
            .ok_or(SceneError::PointsNotAdjacent)?;

        let (a, b) = (&shape.points[i], &shape.points[j]);
        let point = ControlPoint::new((a.position + b.position) * 0.5, a.corner);
        let id = point.id;
        self.insert_point(path, index, point)?;
        self.rebuild(path)?;
        self.flatten(path)?;
        tracing::debug!("Inserted point {} at index {}", id, index);
        Ok((id, index))
    }

    /// Move a point to a world position without rebuilding
    pub fn set_point_world(&mut self, path: NodeId, point: PointId, world: DVec3) -> SceneResult<()> {
        let local = self.to_local(path, world)?;
        self.path_shape_mut(path)?
            .point_mut(point)
            .ok_or(SceneError::PointNotFound(point))?
            .position = local;
        self.invalidate(path)
    }

    /// Move a point to a world position and rebuild the path and its ancestors
    pub fn move_point(&mut self, path: NodeId, point: PointId, world: DVec3) -> SceneResult<()> {
        self.set_point_world(path, point, world)?;
        self.rebuild(path)
    }

    /// Switch a point between sharp and round and rebuild. Returns the new style.
    pub fn toggle_corner_style(&mut self, path: NodeId, point: PointId) -> SceneResult<CornerStyle> {
        let control = self
            .path_shape_mut(path)?
            .point_mut(point)
            .ok_or(SceneError::PointNotFound(point))?;
        control.corner = control.corner.toggled();
        let corner = control.corner;
        self.invalidate(path)?;
        self.rebuild(path)?;
        Ok(corner)
    }

    pub fn snapshot_path(&self, path: NodeId) -> SceneResult<PathSnapshot> {
        let shape = self.path_shape(path)?;
        Ok(PathSnapshot {
            points: shape.points.clone(),
            closed: shape.closed,
            attached: self.is_attached(path),
        })
    }

    /// Put a path back into a saved state.
    ///
    /// Points that were still following the cursor are placed at the current
    /// cursor position. The path is rebuilt when it has enough points,
    /// otherwise its shape is dropped.
    pub fn restore_path(&mut self, path: NodeId, snapshot: &PathSnapshot) -> SceneResult<()> {
        let cursor = self.to_local(path, self.cursor)?;
        let tolerance = self.config.same_point_tolerance;
        let shape = self.path_shape_mut(path)?;
        shape.points = snapshot.points.clone();
        shape.closed = snapshot.closed;
        for point in shape.points.iter_mut().filter(|p| !p.fixed) {
            point.position = cursor;
        }
        let outline = shape.outline(tolerance);
        let buildable = outline.positions.len() >= if outline.closed { 3 } else { 2 };
        self.invalidate(path)?;

        if self.node(path)?.parent.is_none() {
            let listed = self.roots.contains(&path);
            if snapshot.attached && !listed {
                self.roots.push(path);
            } else if !snapshot.attached && listed {
                self.roots.retain(|r| *r != path);
            }
        }

        if buildable {
            self.rebuild(path)
        } else {
            self.clear_shape(path, BuildState::Unbuilt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use approx::assert_relative_eq;
    use arp_kernel::{KernelCall, PreviewKernel};
    use std::sync::Arc;

    fn scene() -> (Arc<PreviewKernel>, Scene) {
        let kernel = Arc::new(PreviewKernel::new());
        let scene = Scene::new(kernel.clone(), SceneConfig::default());
        (kernel, scene)
    }

    fn path(scene: &mut Scene, points: &[DVec3], closed: bool) -> NodeId {
        scene
            .create_path(
                points
                    .iter()
                    .map(|p| ControlPoint::new(*p, CornerStyle::Sharp))
                    .collect(),
                closed,
            )
            .unwrap()
    }

    #[test]
    fn test_points_stay_put_across_rebuilds() {
        let (_, mut scene) = scene();
        let points = [DVec3::new(1.0, 1.0, 0.0), DVec3::new(2.0, 1.0, 0.0), DVec3::new(2.0, 3.0, 0.0)];
        let id = path(&mut scene, &points, false);
        let world = scene.points_world(id).unwrap();
        for (a, b) in world.iter().zip(points.iter()) {
            assert!(a.abs_diff_eq(*b, 1e-12));
        }

        let appended = scene
            .append_point(id, DVec3::new(5.0, 5.0, 5.0), CornerStyle::Round, true)
            .unwrap();
        scene.rebuild(id).unwrap();
        assert!(scene
            .point_world(id, appended)
            .unwrap()
            .abs_diff_eq(DVec3::new(5.0, 5.0, 5.0), 1e-12));
    }

    #[test]
    fn test_dimensions_and_center() {
        let (_, mut scene) = scene();
        let line = path(&mut scene, &[DVec3::ZERO, DVec3::X, DVec3::X * 2.0], false);
        assert_eq!(scene.coincident_dimensions(line).unwrap(), 1);
        assert!(scene.path_center(line).unwrap().abs_diff_eq(DVec3::X, 1e-12));
        assert_relative_eq!(scene.principal_component(line).unwrap().x.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let (_, mut scene) = scene();
        let id = path(
            &mut scene,
            &[
                DVec3::ZERO,
                DVec3::new(1.0, 0.0, 0.1),
                DVec3::new(1.0, 1.0, -0.1),
                DVec3::new(0.0, 1.0, 0.05),
            ],
            true,
        );
        scene.flatten(id).unwrap();
        assert!(scene.coincident_dimensions(id).unwrap() <= 2);
        let once = scene.points_world(id).unwrap();
        scene.flatten(id).unwrap();
        let twice = scene.points_world(id).unwrap();
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!(a.distance(*b) < 1e-9);
        }
    }

    #[test]
    fn test_insert_between_neighbours() {
        let (_, mut scene) = scene();
        let id = path(&mut scene, &[DVec3::ZERO, DVec3::X, DVec3::new(1.0, 1.0, 0.0)], true);
        let ids: Vec<_> = scene.path_shape(id).unwrap().points.iter().map(|p| p.id).collect();

        let (inserted, index) = scene.insert_between(id, ids[0], ids[1]).unwrap();
        assert_eq!(index, 1);
        assert!(scene
            .point_world(id, inserted)
            .unwrap()
            .abs_diff_eq(DVec3::new(0.5, 0.0, 0.0), 1e-9));

        // The seam of a closed path appends at the end
        let (_, seam) = scene.insert_between(id, ids[2], ids[0]).unwrap();
        assert_eq!(seam, 4);

        let far = scene.path_shape(id).unwrap().points[2].id;
        assert!(matches!(
            scene.insert_between(id, ids[0], far),
            Err(SceneError::PointsNotAdjacent)
        ));
    }

    #[test]
    fn test_toggle_corner_style() {
        let (_, mut scene) = scene();
        let id = path(&mut scene, &[DVec3::ZERO, DVec3::X], false);
        let point = scene.path_shape(id).unwrap().points[1].id;
        assert_eq!(scene.toggle_corner_style(id, point).unwrap(), CornerStyle::Round);
        assert_eq!(scene.toggle_corner_style(id, point).unwrap(), CornerStyle::Sharp);
        assert!(matches!(
            scene.toggle_corner_style(id, uuid::Uuid::new_v4()),
            Err(SceneError::PointNotFound(_))
        ));
    }

    #[test]
    fn test_restore_moves_floating_point_to_cursor() {
        let (kernel, mut scene) = scene();
        let id = path(&mut scene, &[DVec3::ZERO, DVec3::X], false);
        scene
            .append_point(id, DVec3::Y, CornerStyle::Sharp, false)
            .unwrap();
        let snapshot = scene.snapshot_path(id).unwrap();
        assert!(snapshot.attached);

        scene.set_cursor_position(DVec3::new(0.0, 0.0, 4.0));
        scene.restore_path(id, &snapshot).unwrap();
        let floating = scene.non_fixed_point(id).unwrap().unwrap();
        assert!(scene
            .point_world(id, floating)
            .unwrap()
            .abs_diff_eq(DVec3::new(0.0, 0.0, 4.0), 1e-12));

        // Too few points left: the shape is dropped and the path detached
        scene.restore_path(id, &PathSnapshot::default()).unwrap();
        assert!(scene.node(id).unwrap().handle().is_none());
        assert!(!scene.is_attached(id));
        assert!(kernel.live_handles().is_empty());
    }

    #[test]
    fn test_inactive_and_removed_points_leave_the_build() {
        let (kernel, mut scene) = scene();
        let id = path(
            &mut scene,
            &[DVec3::ZERO, DVec3::X, DVec3::new(1.0, 1.0, 0.0), DVec3::Y],
            false,
        );
        let second = scene.path_shape(id).unwrap().points[1].id;
        kernel.clear_journal();

        scene.set_point_active(id, second, false).unwrap();
        scene.rebuild(id).unwrap();
        let removed = scene.remove_last_point(id).unwrap().unwrap();
        assert!(removed.position.abs_diff_eq(DVec3::Y, 1e-12));
        scene.rebuild(id).unwrap();

        let counts: Vec<_> = kernel
            .journal()
            .into_iter()
            .filter_map(|call| match call {
                KernelCall::CreatePath { point_count, .. } => Some(point_count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![3, 2]);
        assert_eq!(scene.path_shape(id).unwrap().points.len(), 3);
    }
}
