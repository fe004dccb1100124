//! Local placement of a node relative to its parent frame

use arp_kernel::constants::POINT_TOLERANCE;
use glam::{DMat4, DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Position, orientation and scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: DVec3,
    pub rotation: DQuat,
    pub scale: DVec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
        scale: DVec3::ONE,
    };

    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn to_mat4(&self) -> DMat4 {
        DMat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Decompose an affine matrix.
    ///
    /// Shear is not representable and is dropped, so placing a node under a
    /// rotated parent with non-uniform scale can move it slightly. A warning
    /// is logged when that happens.
    pub fn from_mat4(matrix: DMat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        let pose = Self {
            position,
            rotation: rotation.normalize(),
            scale,
        };
        let residual = pose.residual(&matrix);
        if residual > POINT_TOLERANCE {
            tracing::warn!("Dropped shear of {:.3e} decomposing a placement", residual);
        }
        pose
    }

    /// Largest element difference between `matrix` and this pose's matrix
    pub(crate) fn residual(&self, matrix: &DMat4) -> f64 {
        (self.to_mat4() - *matrix)
            .to_cols_array()
            .iter()
            .fold(0.0, |max, v| max.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_matrix_roundtrip() {
        let pose = Pose {
            position: DVec3::new(1.0, -2.0, 0.5),
            rotation: DQuat::from_rotation_y(0.7),
            scale: DVec3::new(2.0, 1.0, 0.5),
        };
        let back = Pose::from_mat4(pose.to_mat4());
        assert_relative_eq!(back.position.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(back.position.y, -2.0, epsilon = 1e-12);
        assert_relative_eq!(back.scale.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(back.scale.z, 0.5, epsilon = 1e-12);
        assert!(back.rotation.angle_between(pose.rotation) < 1e-9);
    }

    #[test]
    fn test_shear_is_dropped() {
        let parent = Pose {
            position: DVec3::ZERO,
            rotation: DQuat::from_rotation_z(0.5),
            scale: DVec3::new(3.0, 1.0, 1.0),
        };
        let child = Pose {
            rotation: DQuat::from_rotation_z(0.3),
            ..Pose::IDENTITY
        };
        let sheared = parent.to_mat4().inverse() * child.to_mat4();
        let pose = Pose::from_mat4(sheared);
        assert!(pose.residual(&sheared) > POINT_TOLERANCE);

        let clean = Pose::from_mat4(child.to_mat4());
        assert!(clean.residual(&child.to_mat4()) < 1e-12);
    }
}
