//! Point-set analysis for paths
//!
//! Principal axes come from the eigen-decomposition of the 3x3 covariance
//! matrix of the points. Dimensionality and flattening are both measured
//! against those axes.

use glam::DVec3;
use nalgebra as na;

/// Centroid of the points, or the origin for an empty set
pub fn centroid(points: &[DVec3]) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }
    points.iter().copied().sum::<DVec3>() / points.len() as f64
}

/// Principal axes of a point set, sorted by decreasing variance
#[derive(Debug, Clone, Copy)]
pub struct PrincipalAxes {
    pub centroid: DVec3,
    pub axes: [DVec3; 3],
    pub variances: [f64; 3],
}

impl PrincipalAxes {
    pub fn of(points: &[DVec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let center = centroid(points);

        let mut covariance = na::Matrix3::<f64>::zeros();
        for p in points {
            let d = na::Vector3::new(p.x - center.x, p.y - center.y, p.z - center.z);
            covariance += d * d.transpose();
        }
        covariance /= points.len() as f64;

        let eigen = covariance.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));

        let column = |i: usize| {
            let c = eigen.eigenvectors.column(i);
            DVec3::new(c[0], c[1], c[2]).normalize_or_zero()
        };
        Some(Self {
            centroid: center,
            axes: order.map(column),
            variances: order.map(|i| eigen.eigenvalues[i].max(0.0)),
        })
    }

    /// Largest deviation of any point from the centroid along each axis
    fn extents(&self, points: &[DVec3]) -> [f64; 3] {
        self.axes.map(|axis| {
            points
                .iter()
                .map(|p| (*p - self.centroid).dot(axis).abs())
                .fold(0.0, f64::max)
        })
    }
}

/// Returns 0 if all points coincide, 1 if they lie on a line, 2 if they lie
/// on a plane and 3 otherwise, each within `tolerance`
pub fn coincident_dimensions(points: &[DVec3], tolerance: f64) -> usize {
    match PrincipalAxes::of(points) {
        Some(axes) => axes
            .extents(points)
            .iter()
            .filter(|extent| **extent > tolerance)
            .count(),
        None => 0,
    }
}

/// Project the points onto their best-fitting plane, or onto the best line
/// or the centroid when the set is degenerate within `tolerance`
pub fn flattened(points: &[DVec3], tolerance: f64) -> Vec<DVec3> {
    let Some(axes) = PrincipalAxes::of(points) else {
        return Vec::new();
    };
    let center = axes.centroid;

    match coincident_dimensions(points, tolerance) {
        0 => vec![center; points.len()],
        1 => {
            let direction = axes.axes[0];
            points
                .iter()
                .map(|p| center + direction * (*p - center).dot(direction))
                .collect()
        }
        _ => {
            let normal = axes.axes[2];
            points
                .iter()
                .map(|p| *p - normal * (*p - center).dot(normal))
                .collect()
        }
    }
}

/// First principal component (direction of largest spread)
pub fn principal_direction(points: &[DVec3]) -> Option<DVec3> {
    PrincipalAxes::of(points).map(|axes| axes.axes[0])
}
