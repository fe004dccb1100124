//! Tessellated meshes produced by the kernel
//!
//! Meshes are plain triangle soups with per-vertex normals. They are what the
//! scene stores for display after a successful rebuild, and what gets written
//! out on STL export.

pub mod primitive;

use std::path::Path;

use glam::{DMat4, DVec3, Vec3};

/// A tessellated mesh output from the kernel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TessellatedMesh {
    /// Vertex positions (3 floats per vertex)
    pub vertices: Vec<[f32; 3]>,
    /// Vertex normals (3 floats per vertex)
    pub normals: Vec<[f32; 3]>,
    /// Triangle indices (3 indices per triangle)
    pub indices: Vec<u32>,
}

impl TessellatedMesh {
    /// Create an empty tessellated mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mesh from (vertices, normals, indices)
    pub fn from_parts(vertices: Vec<[f32; 3]>, normals: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            normals,
            indices,
        }
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Get the number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Append another mesh, re-indexing its triangles
    pub fn append(&mut self, other: &TessellatedMesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.normals.extend_from_slice(&other.normals);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Copy of this mesh with `transform` applied to positions and normals
    pub fn transformed(&self, transform: DMat4) -> Self {
        let normal_matrix = transform.inverse().transpose();
        let vertices = self
            .vertices
            .iter()
            .map(|v| {
                let p = transform.transform_point3(Vec3::from(*v).as_dvec3());
                p.as_vec3().to_array()
            })
            .collect();
        let normals = self
            .normals
            .iter()
            .map(|n| {
                let n = normal_matrix
                    .transform_vector3(Vec3::from(*n).as_dvec3())
                    .normalize_or_zero();
                n.as_vec3().to_array()
            })
            .collect();
        Self {
            vertices,
            normals,
            indices: self.indices.clone(),
        }
    }

    /// Axis-aligned bounds as (min, max)
    pub fn bounds(&self) -> Option<(DVec3, DVec3)> {
        let first = Vec3::from(*self.vertices.first()?).as_dvec3();
        Some(self.vertices.iter().fold((first, first), |(min, max), v| {
            let p = Vec3::from(*v).as_dvec3();
            (min.min(p), max.max(p))
        }))
    }
}

/// Write a mesh as a binary STL file
pub fn write_stl(mesh: &TessellatedMesh, path: impl AsRef<Path>) -> Result<(), StlError> {
    let path = path.as_ref();

    let mut triangles = Vec::with_capacity(mesh.triangle_count());
    for chunk in mesh.indices.chunks(3) {
        if chunk.len() != 3 {
            continue;
        }

        let corner = |i: u32| -> Result<[f32; 3], StlError> {
            mesh.vertices
                .get(i as usize)
                .copied()
                .ok_or(StlError::InvalidIndex(i))
        };
        let v0 = corner(chunk[0])?;
        let v1 = corner(chunk[1])?;
        let v2 = corner(chunk[2])?;

        let e1 = Vec3::from(v1) - Vec3::from(v0);
        let e2 = Vec3::from(v2) - Vec3::from(v0);
        let normal = e1.cross(e2).try_normalize().unwrap_or(Vec3::Z);

        triangles.push(stl_io::Triangle {
            normal: stl_io::Normal::new(normal.to_array()),
            vertices: [
                stl_io::Vertex::new(v0),
                stl_io::Vertex::new(v1),
                stl_io::Vertex::new(v2),
            ],
        });
    }

    let mut file = std::fs::File::create(path).map_err(|e| StlError::Io(e.to_string()))?;
    stl_io::write_stl(&mut file, triangles.iter()).map_err(|e| StlError::Write(e.to_string()))?;

    tracing::debug!("Wrote {} triangles to {:?}", triangles.len(), path);
    Ok(())
}

/// STL-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StlError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to write STL: {0}")]
    Write(String),

    #[error("Triangle references missing vertex {0}")]
    InvalidIndex(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle() -> TessellatedMesh {
        TessellatedMesh::from_parts(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0.0, 0.0, 1.0]; 3],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn test_append_reindexes() {
        let mut mesh = triangle();
        mesh.append(&triangle());
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(&mesh.indices[3..], &[3, 4, 5]);
    }

    #[test]
    fn test_transformed_moves_vertices() {
        let moved = triangle().transformed(DMat4::from_translation(DVec3::new(0.0, 0.0, 2.0)));
        let (min, max) = moved.bounds().unwrap();
        assert_relative_eq!(min.z, 2.0);
        assert_relative_eq!(max.z, 2.0);
        assert_relative_eq!(max.x, 1.0);
    }

    #[test]
    fn test_write_stl_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triangle.stl");
        write_stl(&triangle(), &path).unwrap();

        let mut file = std::fs::File::open(&path).unwrap();
        let read = stl_io::read_stl(&mut file).unwrap();
        assert_eq!(read.faces.len(), 1);
        assert_eq!(read.vertices.len(), 3);
    }

    #[test]
    fn test_write_stl_rejects_bad_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut mesh = triangle();
        mesh.indices = vec![0, 1, 7];
        let result = write_stl(&mesh, dir.path().join("bad.stl"));
        assert!(matches!(result, Err(StlError::InvalidIndex(7))));
    }
}
