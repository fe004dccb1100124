//! Mesh generation for primitive solids and edge outlines
//!
//! Shapes are y-up: cylinders run along Y and pyramids point towards +Y.

use std::f32::consts::PI;

use glam::Vec3;

use super::TessellatedMesh;
use crate::constants::{
    CYLINDER_SEGMENTS, OUTLINE_TUBE_RADIUS, OUTLINE_TUBE_SIDES, SPHERE_LAT_SEGMENTS,
    SPHERE_LON_SEGMENTS,
};
use crate::kernel::PrimitiveKind;

/// Tessellate a primitive centered at the origin
pub fn primitive_mesh(kind: &PrimitiveKind) -> TessellatedMesh {
    match *kind {
        PrimitiveKind::Box {
            width,
            height,
            length,
        } => box_mesh([width as f32, height as f32, length as f32]),
        PrimitiveKind::Sphere { radius } => {
            sphere_mesh(radius as f32, SPHERE_LAT_SEGMENTS, SPHERE_LON_SEGMENTS)
        }
        PrimitiveKind::Cylinder { radius, height } => {
            cylinder_mesh(radius as f32, height as f32, CYLINDER_SEGMENTS)
        }
        PrimitiveKind::Pyramid {
            width,
            height,
            length,
        } => pyramid_mesh(width as f32, height as f32, length as f32),
    }
}

/// Corners of each box face, counter-clockwise seen from outside. Corner
/// `i` sits on the positive side of x, y and z where bits 0, 1 and 2 are set.
const BOX_FACES: [[usize; 4]; 6] = [
    [1, 3, 7, 5],
    [0, 4, 6, 2],
    [2, 6, 7, 3],
    [0, 1, 5, 4],
    [4, 5, 7, 6],
    [0, 2, 3, 1],
];

/// Box with the given [x, y, z] extents, centered at the origin
pub fn box_mesh(size: [f32; 3]) -> TessellatedMesh {
    let half = Vec3::from_array(size) / 2.0;
    let corner = |i: usize| {
        let sign = |bit: usize| if i & (1 << bit) != 0 { 1.0 } else { -1.0 };
        half * Vec3::new(sign(0), sign(1), sign(2))
    };
    let faces: Vec<Vec<Vec3>> = BOX_FACES
        .iter()
        .map(|face| face.iter().map(|&i| corner(i)).collect())
        .collect();
    faceted(&faces)
}

/// Flat-shaded mesh over convex polygons, each wound counter-clockwise
/// seen from outside
fn faceted(faces: &[Vec<Vec3>]) -> TessellatedMesh {
    let mut vertices = Vec::new();
    let mut normals = Vec::new();
    let mut indices = Vec::new();
    for face in faces.iter().filter(|f| f.len() >= 3) {
        let normal = (face[1] - face[0])
            .cross(face[2] - face[0])
            .normalize_or_zero()
            .to_array();
        let base = vertices.len() as u32;
        for corner in face {
            vertices.push(corner.to_array());
            normals.push(normal);
        }
        for i in 1..face.len() as u32 - 1 {
            indices.extend_from_slice(&[base, base + i, base + i + 1]);
        }
    }
    TessellatedMesh::from_parts(vertices, normals, indices)
}

/// UV sphere
pub fn sphere_mesh(radius: f32, lat_segments: u32, lon_segments: u32) -> TessellatedMesh {
    let mut mesh = TessellatedMesh::new();

    for lat in 0..=lat_segments {
        let theta = (lat as f32 / lat_segments as f32) * PI;
        let (sin_theta, cos_theta) = theta.sin_cos();

        for lon in 0..=lon_segments {
            let phi = (lon as f32 / lon_segments as f32) * 2.0 * PI;
            let (sin_phi, cos_phi) = phi.sin_cos();

            // y is the pole axis
            let n = [sin_theta * cos_phi, cos_theta, sin_theta * sin_phi];
            mesh.vertices
                .push([radius * n[0], radius * n[1], radius * n[2]]);
            mesh.normals.push(n);
        }
    }

    for lat in 0..lat_segments {
        for lon in 0..lon_segments {
            let current = lat * (lon_segments + 1) + lon;
            let next = current + lon_segments + 1;
            mesh.indices
                .extend_from_slice(&[current, current + 1, next, current + 1, next + 1, next]);
        }
    }

    mesh
}

/// Capped cylinder along the Y axis
pub fn cylinder_mesh(radius: f32, height: f32, segments: u32) -> TessellatedMesh {
    let half = height / 2.0;
    let mut mesh = TessellatedMesh::new();
    let rim = |i: u32| {
        let theta = (i as f32 / segments as f32) * 2.0 * PI;
        (theta.cos(), theta.sin())
    };

    for i in 0..=segments {
        let (c, s) = rim(i);
        mesh.vertices.push([radius * c, -half, radius * s]);
        mesh.normals.push([c, 0.0, s]);
        mesh.vertices.push([radius * c, half, radius * s]);
        mesh.normals.push([c, 0.0, s]);
    }
    for i in 0..segments {
        let base = i * 2;
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 1, base + 3, base + 2]);
    }

    for (y, ny) in [(half, 1.0f32), (-half, -1.0)] {
        let center = mesh.vertices.len() as u32;
        mesh.vertices.push([0.0, y, 0.0]);
        mesh.normals.push([0.0, ny, 0.0]);
        let start = mesh.vertices.len() as u32;
        for i in 0..=segments {
            let (c, s) = rim(i);
            mesh.vertices.push([radius * c, y, radius * s]);
            mesh.normals.push([0.0, ny, 0.0]);
        }
        for i in 0..segments {
            if ny > 0.0 {
                mesh.indices
                    .extend_from_slice(&[center, start + i + 1, start + i]);
            } else {
                mesh.indices
                    .extend_from_slice(&[center, start + i, start + i + 1]);
            }
        }
    }

    mesh
}

/// Pyramid with a width x length base at y = 0 and its apex at y = height
pub fn pyramid_mesh(width: f32, height: f32, length: f32) -> TessellatedMesh {
    let hx = width / 2.0;
    let hz = length / 2.0;
    let apex = Vec3::new(0.0, height, 0.0);
    let base = [
        Vec3::new(-hx, 0.0, -hz),
        Vec3::new(hx, 0.0, -hz),
        Vec3::new(hx, 0.0, hz),
        Vec3::new(-hx, 0.0, hz),
    ];

    let mut faces: Vec<Vec<Vec3>> = (0..4)
        .map(|i| vec![base[(i + 1) % 4], base[i], apex])
        .collect();
    faces.push(base.to_vec());
    faceted(&faces)
}

/// Thin square tubes along each segment, used to draw shape outlines
pub fn tube_outline(segments: &[(Vec3, Vec3)]) -> TessellatedMesh {
    let mut mesh = TessellatedMesh::new();
    for &(start, end) in segments {
        let dir = end - start;
        if dir.length_squared() <= f32::EPSILON {
            continue;
        }
        let dir = dir.normalize();
        let (u, v) = dir.any_orthonormal_pair();

        let base = mesh.vertices.len() as u32;
        for side in 0..OUTLINE_TUBE_SIDES {
            let angle = side as f32 / OUTLINE_TUBE_SIDES as f32 * 2.0 * PI;
            let normal = u * angle.cos() + v * angle.sin();
            let offset = normal * OUTLINE_TUBE_RADIUS;
            mesh.vertices.push((start + offset).to_array());
            mesh.normals.push(normal.to_array());
            mesh.vertices.push((end + offset).to_array());
            mesh.normals.push(normal.to_array());
        }
        for side in 0..OUTLINE_TUBE_SIDES {
            let a = base + side * 2;
            let b = base + ((side + 1) % OUTLINE_TUBE_SIDES) * 2;
            mesh.indices
                .extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    mesh
}
