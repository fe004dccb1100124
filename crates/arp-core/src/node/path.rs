//! Paths and their control points

use arp_kernel::CornerStyle;
use glam::DVec3;
use uuid::Uuid;

/// Control point identifier
pub type PointId = Uuid;

/// A control point of a path. Positions are expressed in the path's content frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPoint {
    pub id: PointId,
    pub position: DVec3,
    pub corner: CornerStyle,
    /// Already placed by the user
    pub fixed: bool,
    /// Visible and part of the built curve
    pub active: bool,
    pub highlighted: bool,
    pub selected: bool,
}

impl ControlPoint {
    /// A placed point
    pub fn new(position: DVec3, corner: CornerStyle) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            corner,
            fixed: true,
            active: true,
            highlighted: false,
            selected: false,
        }
    }

    /// The point still following the cursor
    pub fn floating(position: DVec3, corner: CornerStyle) -> Self {
        Self {
            fixed: false,
            ..Self::new(position, corner)
        }
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
        if fixed {
            self.active = true;
        }
    }
}

/// Ordered control points plus the explicit closed flag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathShape {
    pub points: Vec<ControlPoint>,
    pub closed: bool,
}

/// Points and styles handed to the kernel for one path build
#[derive(Debug, Clone, PartialEq)]
pub struct PathOutline {
    pub positions: Vec<DVec3>,
    pub corners: Vec<CornerStyle>,
    pub closed: bool,
}

impl PathShape {
    pub fn new(points: Vec<ControlPoint>, closed: bool) -> Self {
        Self { points, closed }
    }

    /// Closed either explicitly or because the ends meet within `tolerance`
    pub fn closed_for_build(&self, tolerance: f64) -> bool {
        if self.closed {
            return true;
        }
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() > 1 => {
                first.position.distance(last.position) < tolerance
            }
            _ => false,
        }
    }

    /// Select the points that take part in a build.
    ///
    /// Only active points count. A closed path also skips points that are not
    /// fixed yet and a trailing duplicate of the first point.
    pub fn outline(&self, tolerance: f64) -> PathOutline {
        let closed = self.closed_for_build(tolerance);
        let mut emitted: Vec<&ControlPoint> = self
            .points
            .iter()
            .filter(|p| p.active && (!closed || p.fixed))
            .collect();

        if closed && emitted.len() > 1 {
            let first = emitted[0].position;
            if emitted
                .last()
                .is_some_and(|last| last.position.distance(first) < tolerance)
            {
                emitted.pop();
            }
        }

        PathOutline {
            positions: emitted.iter().map(|p| p.position).collect(),
            corners: emitted.iter().map(|p| p.corner).collect(),
            closed,
        }
    }

    pub fn index_of(&self, id: PointId) -> Option<usize> {
        self.points.iter().position(|p| p.id == id)
    }

    pub fn point(&self, id: PointId) -> Option<&ControlPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    pub fn point_mut(&mut self, id: PointId) -> Option<&mut ControlPoint> {
        self.points.iter_mut().find(|p| p.id == id)
    }

    /// The last point that is not fixed yet
    pub fn non_fixed_point(&self) -> Option<&ControlPoint> {
        self.points.iter().rev().find(|p| !p.fixed)
    }

    pub fn remove_non_fixed_points(&mut self) {
        self.points.retain(|p| p.fixed);
    }

    /// Index at which a point between `i` and `j` goes, or `None` if the two
    /// are not neighbours. The seam of a closed path counts as adjacent.
    pub fn insertion_index(&self, i: usize, j: usize) -> Option<usize> {
        let n = self.points.len();
        if i >= n || j >= n || i == j {
            return None;
        }
        let seam = (i == 0 && j == n - 1) || (i == n - 1 && j == 0);
        if seam && self.closed && n > 2 {
            return Some(n);
        }
        match i.abs_diff(j) {
            1 => Some(i.max(j)),
            _ => None,
        }
    }
}
