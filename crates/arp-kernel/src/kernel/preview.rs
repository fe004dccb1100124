//! In-memory preview kernel
//!
//! Keeps every shape as an approximate triangle mesh in a handle table. It
//! implements the full gateway so the scene graph can run without a B-rep
//! backend, and it journals every call and every breach of the handle
//! discipline so tests can check ownership invariants.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use glam::{DMat4, DQuat, DVec3};
use parking_lot::Mutex;

use super::journal::{HandleViolation, KernelCall};
use super::traits::{
    Axis, BooleanOp, CornerStyle, GeometryKernel, KernelError, KernelResult, PrimitiveKind,
    ShapeHandle,
};
use crate::constants::{HANDLE_PREFIX, POINT_TOLERANCE, REVOLVE_SEGMENTS};
use crate::mesh::primitive::{primitive_mesh, tube_outline};
use crate::mesh::{TessellatedMesh, write_stl};

/// Polyline points of a path shape, in the shape's local frame
#[derive(Debug, Clone)]
struct Wire {
    points: Vec<DVec3>,
    closed: bool,
}

#[derive(Debug, Clone)]
struct PreviewShape {
    /// Triangles in the local frame
    mesh: TessellatedMesh,
    /// Outline edges in the local frame
    edges: Vec<(DVec3, DVec3)>,
    wire: Option<Wire>,
    /// Local-to-world placement
    frame: DMat4,
}

impl PreviewShape {
    fn solid(mesh: TessellatedMesh) -> Self {
        let edges = mesh
            .bounds()
            .map(|(min, max)| box_edges(min, max))
            .unwrap_or_default();
        Self {
            mesh,
            edges,
            wire: None,
            frame: DMat4::IDENTITY,
        }
    }

    fn wire(points: Vec<DVec3>, closed: bool) -> Self {
        let mut edges: Vec<_> = points.windows(2).map(|w| (w[0], w[1])).collect();
        if closed {
            if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
                edges.push((last, first));
            }
        }
        Self {
            mesh: outline_mesh(&edges),
            edges,
            wire: Some(Wire { points, closed }),
            frame: DMat4::IDENTITY,
        }
    }

    fn world_mesh(&self) -> TessellatedMesh {
        self.mesh.transformed(self.frame)
    }

    fn world_points(&self) -> Option<(Vec<DVec3>, bool)> {
        self.wire.as_ref().map(|wire| {
            let points = wire
                .points
                .iter()
                .map(|p| self.frame.transform_point3(*p))
                .collect();
            (points, wire.closed)
        })
    }

    fn world_center(&self) -> DVec3 {
        let bounds = match self.world_points() {
            Some((points, _)) => points_bounds(&points),
            None => self.world_mesh().bounds(),
        };
        match bounds {
            Some((min, max)) => (min + max) * 0.5,
            None => self.frame.transform_point3(DVec3::ZERO),
        }
    }

    /// Move the local frame to `pivot` while keeping the world geometry fixed
    fn repivot(&mut self, pivot: DMat4) {
        let to_new_local = pivot.inverse() * self.frame;
        self.mesh = self.mesh.transformed(to_new_local);
        for (a, b) in &mut self.edges {
            *a = to_new_local.transform_point3(*a);
            *b = to_new_local.transform_point3(*b);
        }
        if let Some(wire) = &mut self.wire {
            for p in &mut wire.points {
                *p = to_new_local.transform_point3(*p);
            }
        }
        self.frame = pivot;
    }
}

#[derive(Debug, Default)]
struct PreviewState {
    next_id: u64,
    shapes: HashMap<ShapeHandle, PreviewShape>,
    freed: HashSet<ShapeHandle>,
    journal: Vec<KernelCall>,
    violations: Vec<HandleViolation>,
    fail_next: usize,
}

impl PreviewState {
    fn insert(&mut self, shape: PreviewShape) -> ShapeHandle {
        self.next_id += 1;
        let handle = ShapeHandle::new(format!("{}-{}", HANDLE_PREFIX, self.next_id));
        self.shapes.insert(handle.clone(), shape);
        handle
    }

    fn check(&mut self, handle: &ShapeHandle) -> KernelResult<()> {
        if self.shapes.contains_key(handle) {
            return Ok(());
        }
        let violation = if self.freed.contains(handle) {
            HandleViolation::UseAfterFree(handle.clone())
        } else {
            HandleViolation::Unknown(handle.clone())
        };
        tracing::error!("Kernel handle violation: {}", violation);
        self.violations.push(violation);
        Err(KernelError::UnknownHandle(handle.clone()))
    }

    fn shape(&mut self, handle: &ShapeHandle) -> KernelResult<&PreviewShape> {
        self.check(handle)?;
        self.shapes
            .get(handle)
            .ok_or_else(|| KernelError::UnknownHandle(handle.clone()))
    }

    fn shape_mut(&mut self, handle: &ShapeHandle) -> KernelResult<&mut PreviewShape> {
        self.check(handle)?;
        self.shapes
            .get_mut(handle)
            .ok_or_else(|| KernelError::UnknownHandle(handle.clone()))
    }
}

/// Kernel backend holding approximate shapes in memory
#[derive(Debug, Default)]
pub struct PreviewKernel {
    state: Mutex<PreviewState>,
    latency: Option<Duration>,
}

impl PreviewKernel {
    /// Create an empty preview kernel
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every construction call sleep for `latency` before running,
    /// to mimic a real kernel on worker threads
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `count` construction calls
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// All calls received so far, oldest first
    pub fn journal(&self) -> Vec<KernelCall> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Handle discipline breaches observed so far
    pub fn violations(&self) -> Vec<HandleViolation> {
        self.state.lock().violations.clone()
    }

    /// Handles that were issued and not yet freed, sorted
    pub fn live_handles(&self) -> Vec<ShapeHandle> {
        let mut handles: Vec<_> = self.state.lock().shapes.keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn is_live(&self, handle: &ShapeHandle) -> bool {
        self.state.lock().shapes.contains_key(handle)
    }

    /// Number of handles freed successfully
    pub fn free_count(&self) -> usize {
        self.state.lock().freed.len()
    }

    /// World-space polyline of a path shape
    pub fn path_points(&self, handle: &ShapeHandle) -> Option<(Vec<DVec3>, bool)> {
        self.state
            .lock()
            .shapes
            .get(handle)
            .and_then(PreviewShape::world_points)
    }

    /// Local-to-world placement of a shape
    pub fn frame(&self, handle: &ShapeHandle) -> Option<DMat4> {
        self.state.lock().shapes.get(handle).map(|s| s.frame)
    }

    fn construct<F>(
        &self,
        build: F,
        record: impl FnOnce(Option<ShapeHandle>) -> KernelCall,
    ) -> KernelResult<ShapeHandle>
    where
        F: FnOnce(&mut PreviewState) -> KernelResult<PreviewShape>,
    {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }

        let mut state = self.state.lock();
        let result = if state.fail_next > 0 {
            state.fail_next -= 1;
            Err(KernelError::GeometryConstructionFailed(
                "injected failure".into(),
            ))
        } else {
            build(&mut *state).map(|shape| state.insert(shape))
        };

        let call = record(result.as_ref().ok().cloned());
        match &result {
            Ok(handle) => tracing::debug!("Kernel {} -> {}", call.name(), handle),
            Err(e) => tracing::debug!("Kernel {} failed: {}", call.name(), e),
        }
        state.journal.push(call);
        result
    }

    fn with_shape<T>(
        &self,
        call: KernelCall,
        handle: &ShapeHandle,
        f: impl FnOnce(&mut PreviewShape) -> KernelResult<T>,
    ) -> KernelResult<T> {
        let mut state = self.state.lock();
        state.journal.push(call);
        f(state.shape_mut(handle)?)
    }
}

impl GeometryKernel for PreviewKernel {
    fn name(&self) -> &str {
        "preview"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create_primitive(&self, kind: &PrimitiveKind) -> KernelResult<ShapeHandle> {
        let kind = *kind;
        self.construct(
            |_| {
                if !kind.is_valid() {
                    return Err(KernelError::GeometryConstructionFailed(format!(
                        "invalid {} dimensions",
                        kind.name()
                    )));
                }
                Ok(PreviewShape::solid(primitive_mesh(&kind)))
            },
            |output| KernelCall::CreatePrimitive { kind, output },
        )
    }

    fn create_path(
        &self,
        points: &[DVec3],
        corners: &[CornerStyle],
        closed: bool,
    ) -> KernelResult<ShapeHandle> {
        let required = if closed { 3 } else { 2 };
        self.construct(
            |_| {
                if points.len() < required {
                    return Err(KernelError::GeometryConstructionFailed(format!(
                        "path needs at least {} points, got {}",
                        required,
                        points.len()
                    )));
                }
                if corners.len() != points.len() {
                    return Err(KernelError::GeometryConstructionFailed(format!(
                        "{} corner styles for {} points",
                        corners.len(),
                        points.len()
                    )));
                }
                Ok(PreviewShape::wire(points.to_vec(), closed))
            },
            |output| KernelCall::CreatePath {
                point_count: points.len(),
                closed,
                output,
            },
        )
    }

    fn boolean(
        &self,
        op: BooleanOp,
        a: &ShapeHandle,
        b: &ShapeHandle,
    ) -> KernelResult<ShapeHandle> {
        self.construct(
            |state| {
                let mut mesh = state.shape(a)?.world_mesh();
                let other = state.shape(b)?.world_mesh();
                // Approximation: only a join keeps the second operand's surface
                if op == BooleanOp::Join {
                    mesh.append(&other);
                }
                Ok(PreviewShape::solid(mesh))
            },
            |output| KernelCall::Boolean {
                op,
                a: a.clone(),
                b: b.clone(),
                output,
            },
        )
    }

    fn sweep(&self, profile: &ShapeHandle, path: &ShapeHandle) -> KernelResult<ShapeHandle> {
        self.construct(
            |state| {
                let (route, _) = state
                    .shape(path)?
                    .world_points()
                    .filter(|(points, _)| points.len() >= 2)
                    .ok_or_else(|| {
                        KernelError::GeometryConstructionFailed(
                            "sweep path must be a wire with at least 2 points".into(),
                        )
                    })?;
                let profile = state.shape(profile)?;
                let profile_mesh = profile.world_mesh();
                let start = route[0];

                let mut mesh = TessellatedMesh::new();
                for p in &route {
                    mesh.append(&profile_mesh.transformed(DMat4::from_translation(*p - start)));
                }
                if let Some((ring, closed)) = profile.world_points() {
                    let rings: Vec<Vec<DVec3>> = route
                        .iter()
                        .map(|p| ring.iter().map(|q| *q + (*p - start)).collect())
                        .collect();
                    mesh.append(&ring_strip(&rings, closed));
                }
                Ok(PreviewShape::solid(mesh))
            },
            |output| KernelCall::Sweep {
                profile: profile.clone(),
                path: path.clone(),
                output,
            },
        )
    }

    fn revolve(&self, profile: &ShapeHandle, axis: &Axis) -> KernelResult<ShapeHandle> {
        let axis = *axis;
        self.construct(
            |state| {
                let ring = match state.shape(profile)?.world_points() {
                    Some((points, true)) if points.len() >= 3 => points,
                    _ => {
                        return Err(KernelError::GeometryConstructionFailed(
                            "revolve profile must be a closed wire with at least 3 points".into(),
                        ));
                    }
                };
                if axis.direction.length_squared() < 0.5 {
                    return Err(KernelError::GeometryConstructionFailed(
                        "revolve axis has no direction".into(),
                    ));
                }
                // An axis anchored on the profile itself yields a degenerate face
                if ring
                    .iter()
                    .any(|p| p.distance(axis.position) < POINT_TOLERANCE)
                {
                    return Err(KernelError::GeometryConstructionFailed(
                        "revolve axis origin lies on the profile".into(),
                    ));
                }

                let rings: Vec<Vec<DVec3>> = (0..=REVOLVE_SEGMENTS)
                    .map(|step| {
                        let angle =
                            step as f64 / REVOLVE_SEGMENTS as f64 * std::f64::consts::TAU;
                        let rotation = DQuat::from_axis_angle(axis.direction, angle);
                        ring.iter()
                            .map(|p| axis.position + rotation * (*p - axis.position))
                            .collect()
                    })
                    .collect();
                Ok(PreviewShape::solid(ring_strip(&rings, true)))
            },
            |output| KernelCall::Revolve {
                profile: profile.clone(),
                output,
            },
        )
    }

    fn loft(&self, profiles: &[ShapeHandle]) -> KernelResult<ShapeHandle> {
        self.construct(
            |state| {
                if profiles.is_empty() {
                    return Err(KernelError::GeometryConstructionFailed(
                        "loft needs at least one profile".into(),
                    ));
                }
                let mut mesh = TessellatedMesh::new();
                let mut rings = Vec::with_capacity(profiles.len());
                let mut closed = true;
                for handle in profiles {
                    let shape = state.shape(handle)?;
                    mesh.append(&shape.world_mesh());
                    if let Some((points, is_closed)) = shape.world_points() {
                        closed &= is_closed;
                        rings.push(points);
                    }
                }
                if rings.len() == profiles.len() {
                    mesh.append(&ring_strip(&rings, closed));
                }
                Ok(PreviewShape::solid(mesh))
            },
            |output| KernelCall::Loft {
                profiles: profiles.to_vec(),
                output,
            },
        )
    }

    fn set_transform(&self, handle: &ShapeHandle, transform: DMat4) -> KernelResult<()> {
        self.with_shape(KernelCall::SetTransform(handle.clone()), handle, |shape| {
            shape.frame = transform;
            Ok(())
        })
    }

    fn set_pivot(&self, handle: &ShapeHandle, pivot: DMat4) -> KernelResult<()> {
        self.with_shape(KernelCall::SetPivot(handle.clone()), handle, |shape| {
            shape.repivot(pivot);
            Ok(())
        })
    }

    fn center(&self, handle: &ShapeHandle) -> KernelResult<DVec3> {
        self.with_shape(KernelCall::Center(handle.clone()), handle, |shape| {
            Ok(shape.world_center())
        })
    }

    fn triangulate(&self, handle: &ShapeHandle) -> KernelResult<TessellatedMesh> {
        self.with_shape(KernelCall::Triangulate(handle.clone()), handle, |shape| {
            Ok(shape.mesh.clone())
        })
    }

    fn tube_outline(&self, handle: &ShapeHandle) -> KernelResult<TessellatedMesh> {
        self.with_shape(KernelCall::TubeOutline(handle.clone()), handle, |shape| {
            Ok(outline_mesh(&shape.edges))
        })
    }

    fn export_stl(&self, handle: &ShapeHandle, path: &Path) -> KernelResult<()> {
        let mesh = self.with_shape(KernelCall::ExportStl(handle.clone()), handle, |shape| {
            Ok(shape.world_mesh())
        })?;
        write_stl(&mesh, path).map_err(|e| KernelError::Export(e.to_string()))
    }

    fn free(&self, handle: &ShapeHandle) {
        let mut state = self.state.lock();
        state.journal.push(KernelCall::Free(handle.clone()));
        if state.shapes.remove(handle).is_some() {
            state.freed.insert(handle.clone());
            tracing::debug!("Kernel free {}", handle);
            return;
        }

        let violation = if state.freed.contains(handle) {
            HandleViolation::DoubleFree(handle.clone())
        } else {
            HandleViolation::Unknown(handle.clone())
        };
        tracing::error!("Kernel handle violation: {}", violation);
        state.violations.push(violation);
    }
}

fn outline_mesh(edges: &[(DVec3, DVec3)]) -> TessellatedMesh {
    let segments: Vec<_> = edges
        .iter()
        .map(|(a, b)| (a.as_vec3(), b.as_vec3()))
        .collect();
    tube_outline(&segments)
}

fn points_bounds(points: &[DVec3]) -> Option<(DVec3, DVec3)> {
    let first = *points.first()?;
    Some(
        points
            .iter()
            .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p))),
    )
}

fn box_edges(min: DVec3, max: DVec3) -> Vec<(DVec3, DVec3)> {
    let corner = |i: usize| {
        DVec3::new(
            if i & 1 == 0 { min.x } else { max.x },
            if i & 2 == 0 { min.y } else { max.y },
            if i & 4 == 0 { min.z } else { max.z },
        )
    };
    let mut edges = Vec::with_capacity(12);
    for i in 0..8usize {
        for bit in [1usize, 2, 4] {
            if i & bit == 0 {
                edges.push((corner(i), corner(i | bit)));
            }
        }
    }
    edges
}

/// Quads between consecutive rings of points
fn ring_strip(rings: &[Vec<DVec3>], closed: bool) -> TessellatedMesh {
    let mut mesh = TessellatedMesh::new();
    for pair in rings.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        let n = lower.len().min(upper.len());
        let spans = if closed { n } else { n.saturating_sub(1) };
        for i in 0..spans {
            let j = (i + 1) % n;
            push_quad(&mut mesh, [lower[i], lower[j], upper[j], upper[i]]);
        }
    }
    mesh
}

fn push_quad(mesh: &mut TessellatedMesh, corners: [DVec3; 4]) {
    let normal = (corners[1] - corners[0])
        .cross(corners[3] - corners[0])
        .normalize_or_zero()
        .as_vec3()
        .to_array();
    let base = mesh.vertices.len() as u32;
    for c in corners {
        mesh.vertices.push(c.as_vec3().to_array());
        mesh.normals.push(normal);
    }
    mesh.indices
        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}
