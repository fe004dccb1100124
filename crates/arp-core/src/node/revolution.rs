//! Derivation of the closed profile and axis used by a revolution

use arp_kernel::{Axis, CornerStyle};
use glam::DVec3;

use crate::geometry::flattened;

/// Closed profile and axis computed from a profile path and an axis path
#[derive(Debug, Clone, PartialEq)]
pub struct RevolutionProfile {
    /// Profile closed by its projections onto the axis, in world coordinates
    pub points: Vec<DVec3>,
    pub corners: Vec<CornerStyle>,
    /// Axis recomputed from the flattened profile
    pub axis: Axis,
    /// Distance of the profile's last point from the axis
    pub radius_top: f64,
    /// Distance of the profile's first point from the axis
    pub radius_bottom: f64,
    /// Tilt of the drawn axis against world up, in degrees
    pub angle: f64,
}

/// Close `profile` against the line through `axis_start` and `axis_end`.
///
/// The first and last profile points are projected onto the axis and added
/// as sharp corners, the loop is flattened onto its best plane, and the axis
/// is re-derived from the flattened ends. Its origin is moved back by
/// `axis_offset` along the direction so that it never lies on the profile.
///
/// Returns `None` when the profile has fewer than two points or the axis
/// has no length.
pub fn derive_profile(
    profile: &[(DVec3, CornerStyle)],
    axis_start: DVec3,
    axis_end: DVec3,
    coincidence_tolerance: f64,
    axis_offset: f64,
) -> Option<RevolutionProfile> {
    if profile.len() < 2 {
        return None;
    }
    let drawn = Axis::new(axis_start, axis_end - axis_start);
    if drawn.direction == DVec3::ZERO {
        return None;
    }

    let first = profile[0].0;
    let last = profile[profile.len() - 1].0;
    let bottom = drawn.project(first);
    let top = drawn.project(last);

    let mut points = Vec::with_capacity(profile.len() + 2);
    let mut corners = Vec::with_capacity(profile.len() + 2);
    points.push(bottom);
    corners.push(CornerStyle::Sharp);
    for (i, (position, corner)) in profile.iter().enumerate() {
        points.push(*position);
        let end = i == 0 || i == profile.len() - 1;
        corners.push(if end { CornerStyle::Sharp } else { *corner });
    }
    points.push(top);
    corners.push(CornerStyle::Sharp);

    let points = flattened(&points, coincidence_tolerance);
    let start = points[0];
    let direction = (points[points.len() - 1] - start).normalize_or_zero();
    if direction == DVec3::ZERO {
        return None;
    }

    Some(RevolutionProfile {
        axis: Axis::new(start - direction * axis_offset, direction),
        radius_top: last.distance(top),
        radius_bottom: first.distance(bottom),
        angle: drawn.direction.y.clamp(-1.0, 1.0).acos().to_degrees(),
        points,
        corners,
    })
}
