//! Geometry nodes
//!
//! Every node owns at most one kernel shape handle. Composite nodes refer to
//! their operands by id; the operands live in the same arena with their
//! `parent` pointing back at the composite.

mod path;
mod pose;
mod revolution;

use arp_kernel::{BooleanOp, PrimitiveKind, ShapeHandle, TessellatedMesh};
use glam::DMat4;
use uuid::Uuid;

pub use path::{ControlPoint, PathOutline, PathShape, PointId};
pub use pose::Pose;
pub use revolution::{RevolutionProfile, derive_profile};

/// Node identifier
pub type NodeId = Uuid;

/// The variant-specific part of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Primitive(PrimitiveKind),
    Path(PathShape),
    Boolean {
        op: BooleanOp,
        a: NodeId,
        b: NodeId,
    },
    Sweep {
        profile: NodeId,
        path: NodeId,
    },
    Revolution {
        profile: NodeId,
        axis: NodeId,
        /// Closed profile used by the last build
        derived: Option<RevolutionProfile>,
    },
    Loft {
        profiles: Vec<NodeId>,
    },
}

impl NodeKind {
    /// Operand nodes in the order they are passed to the kernel
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Primitive(_) | NodeKind::Path(_) => Vec::new(),
            NodeKind::Boolean { a, b, .. } => vec![*a, *b],
            NodeKind::Sweep { profile, path } => vec![*profile, *path],
            NodeKind::Revolution { profile, axis, .. } => vec![*profile, *axis],
            NodeKind::Loft { profiles } => profiles.clone(),
        }
    }

    /// Operand whose placement defines the composite's origin
    pub fn pivot_operand(&self) -> Option<NodeId> {
        match self {
            NodeKind::Primitive(_) | NodeKind::Path(_) => None,
            NodeKind::Boolean { a, .. } => Some(*a),
            NodeKind::Sweep { profile, .. } => Some(*profile),
            NodeKind::Revolution { axis, .. } => Some(*axis),
            NodeKind::Loft { profiles } => profiles.first().copied(),
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, NodeKind::Primitive(_) | NodeKind::Path(_))
    }

    pub fn as_path(&self) -> Option<&PathShape> {
        match self {
            NodeKind::Path(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn as_path_mut(&mut self) -> Option<&mut PathShape> {
        match self {
            NodeKind::Path(shape) => Some(shape),
            _ => None,
        }
    }

    /// Default display name
    pub fn default_name(&self) -> &'static str {
        match self {
            NodeKind::Primitive(kind) => kind.name(),
            NodeKind::Path(_) => "path",
            NodeKind::Boolean { .. } => "boolean",
            NodeKind::Sweep { .. } => "sweep",
            NodeKind::Revolution { .. } => "revolution",
            NodeKind::Loft { .. } => "loft",
        }
    }
}

/// Build lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildState {
    #[default]
    Unbuilt,
    Built,
    Failed,
}

/// Interaction flags set by selection and arrangement tools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub highlighted: bool,
    pub selected: bool,
    /// Shows the operand subtree instead of the node's own mesh
    pub visited: bool,
}

pub const CLOSED_PATH_COLOR: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
pub const OPEN_PATH_COLOR: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
pub const OUTLINE_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// A node of the geometry scene graph
#[derive(Debug, Clone)]
pub struct GeometryNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Placement relative to the parent's content frame
    pub(crate) pose: Pose,
    /// Transform of the operand subtree relative to this node
    pub(crate) content: DMat4,
    pub(crate) parent: Option<NodeId>,
    pub(crate) handle: Option<ShapeHandle>,
    pub(crate) state: BuildState,
    /// Bumped whenever an input of this node's build changes
    pub(crate) generation: u64,
    pub(crate) mesh: Option<TessellatedMesh>,
    pub(crate) outline: Option<TessellatedMesh>,
    pub flags: NodeFlags,
    pub(crate) color: [f32; 4],
    pub(crate) line_color: [f32; 4],
    pub(crate) hole: bool,
}

impl GeometryNode {
    pub fn new(kind: NodeKind) -> Self {
        let id = Uuid::new_v4();
        let line_color = match &kind {
            NodeKind::Path(shape) if shape.closed => CLOSED_PATH_COLOR,
            NodeKind::Path(_) => OPEN_PATH_COLOR,
            _ => OUTLINE_COLOR,
        };
        Self {
            id,
            name: kind.default_name().to_string(),
            kind,
            pose: Pose::IDENTITY,
            content: DMat4::IDENTITY,
            parent: None,
            handle: None,
            state: BuildState::Unbuilt,
            generation: 0,
            mesh: None,
            outline: None,
            flags: NodeFlags::default(),
            color: color_for(id),
            line_color,
            hole: false,
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn handle(&self) -> Option<&ShapeHandle> {
        self.handle.as_ref()
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Content frame relative to this node
    pub fn content_transform(&self) -> DMat4 {
        self.content
    }

    /// Triangulated shape in the node's local frame, present after a successful build
    pub fn mesh(&self) -> Option<&TessellatedMesh> {
        self.mesh.as_ref()
    }

    pub fn outline(&self) -> Option<&TessellatedMesh> {
        self.outline.as_ref()
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub fn line_color(&self) -> [f32; 4] {
        self.line_color
    }

    pub fn is_hole(&self) -> bool {
        self.hole
    }

    pub(crate) fn set_hole(&mut self, hole: bool) {
        self.hole = hole;
        self.color[3] = if hole { 0.5 } else { 1.0 };
    }

    pub fn is_path(&self) -> bool {
        matches!(self.kind, NodeKind::Path(_))
    }

    /// Local transform of the operand that defines this node's origin,
    /// relative to the content frame. Paths pivot on their first point.
    pub(crate) fn pivot_local(&self, operand_pose: Option<&Pose>) -> DMat4 {
        match &self.kind {
            NodeKind::Primitive(_) => DMat4::IDENTITY,
            NodeKind::Path(shape) => shape
                .points
                .first()
                .map(|p| DMat4::from_translation(p.position))
                .unwrap_or(DMat4::IDENTITY),
            _ => operand_pose.map(Pose::to_mat4).unwrap_or(DMat4::IDENTITY),
        }
    }
}

/// Pastel color derived from the node id
fn color_for(id: Uuid) -> [f32; 4] {
    let bytes = id.as_bytes();
    let hue = u16::from_le_bytes([bytes[0], bytes[1]]) as f32 / u16::MAX as f32;
    let [r, g, b] = hsv_to_rgb(hue, 0.3, 0.9);
    [r, g, b, 1.0]
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let sector = (h.fract() * 6.0).floor();
    let f = h.fract() * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u32 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}
